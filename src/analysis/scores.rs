//! Staff score editing.
//!
//! Edits are given as `USER:DIMENSION=SCORE`, applied to the user's score
//! sheet with each score clamped to the rubric range, and sent back as the
//! full dimension list.

use std::str::FromStr;

use crate::error::EditError;
use crate::models::{DimensionScore, ScoredUser};

/// One requested change to a user's dimension score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreEdit {
    pub user_id: i64,
    pub dimension: String,
    pub score: f64,
}

impl FromStr for ScoreEdit {
    type Err = EditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || EditError::Malformed(s.to_string());

        let (user, rest) = s.split_once(':').ok_or_else(malformed)?;
        // dimension names may contain '=' less often than ':', so split on the last one
        let (dimension, score) = rest.rsplit_once('=').ok_or_else(malformed)?;

        let user_id = user.trim().parse().map_err(|_| malformed())?;
        let score: f64 = score.trim().parse().map_err(|_| malformed())?;
        let dimension = dimension.trim();
        if dimension.is_empty() || !score.is_finite() {
            return Err(malformed());
        }

        Ok(Self {
            user_id,
            dimension: dimension.to_string(),
            score,
        })
    }
}

/// Editable copy of one user's scores.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreSheet {
    pub user_id: i64,
    pub scores: Vec<DimensionScore>,
}

impl ScoreSheet {
    pub fn from_user(user: &ScoredUser) -> Self {
        Self {
            user_id: user.id,
            scores: user.scores.clone(),
        }
    }

    /// Sets a dimension score clamped to `0..=max_score` and returns the
    /// stored value.
    pub fn set(&mut self, dimension: &str, score: f64, max_score: u32) -> Result<f64, EditError> {
        let entry = self
            .scores
            .iter_mut()
            .find(|s| s.dimension_name == dimension)
            .ok_or_else(|| EditError::UnknownDimension {
                user_id: self.user_id,
                dimension: dimension.to_string(),
            })?;

        entry.score = score.clamp(0.0, max_score as f64);
        Ok(entry.score)
    }

    /// Sum of all dimension scores.
    pub fn total(&self) -> f64 {
        self.scores.iter().map(|s| s.score).sum()
    }
}

/// Applies every edit for one user, in order.
pub fn apply_edits(
    users: &[ScoredUser],
    user_id: i64,
    edits: &[&ScoreEdit],
    max_score: u32,
) -> Result<ScoreSheet, EditError> {
    let user = users
        .iter()
        .find(|u| u.id == user_id)
        .ok_or(EditError::UnknownUser(user_id))?;

    let mut sheet = ScoreSheet::from_user(user);
    for edit in edits {
        sheet.set(&edit.dimension, edit.score, max_score)?;
    }
    Ok(sheet)
}

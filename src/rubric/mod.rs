//! Rubric definitions.
//!
//! A rubric is an ordered set of criteria, each carrying the static text
//! that is sent to the evaluator and copied into the snapshot when the
//! criterion starts. Rubrics come from the built-in set, from a JSON file
//! in payload or structured form, or from the server's rubric store.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

const GENERIC_RUBRIC: &str = include_str!("../../rubrics/generic.json");
const MBA_RUBRIC: &str = include_str!("../../rubrics/mba.json");

/// Static text for one criterion, keyed by criterion name in the payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RubricCriterion {
    #[serde(default)]
    pub criteria_explanation: String,
    #[serde(default)]
    pub criteria_output: String,
    #[serde(default)]
    pub score_explanation: String,
}

/// A named, ordered set of criteria.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rubric {
    pub name: String,
    criteria: Vec<(String, RubricCriterion)>,
}

impl Rubric {
    pub fn new(name: impl Into<String>, criteria: Vec<(String, RubricCriterion)>) -> Self {
        Self {
            name: name.into(),
            criteria,
        }
    }

    /// Names of the built-in rubrics.
    pub fn builtin_names() -> &'static [&'static str] {
        &["generic", "mba"]
    }

    /// Loads a built-in rubric by name (case-insensitive).
    pub fn builtin(name: &str) -> Result<Self> {
        let source = match name.to_lowercase().as_str() {
            "generic" => GENERIC_RUBRIC,
            "mba" | "m.b.a" => MBA_RUBRIC,
            other => bail!(
                "Unknown rubric '{}'. Built-in rubrics: {}",
                other,
                Self::builtin_names().join(", ")
            ),
        };

        Self::from_json_str(source, name)
            .with_context(|| format!("Built-in rubric '{}' is malformed", name))
    }

    /// Loads a rubric from a JSON file in payload or structured form.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read rubric file: {}", path.display()))?;

        let fallback = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "custom".to_string());

        Self::from_json_str(&content, &fallback)
            .with_context(|| format!("Failed to parse rubric file: {}", path.display()))
    }

    /// Parses either form. A top-level `dimensions` array marks the
    /// structured form; anything else is read as a payload object.
    pub fn from_json_str(content: &str, fallback_name: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(content)?;

        if value.get("dimensions").is_some_and(Value::is_array) {
            let structured: StructuredRubric = serde_json::from_value(value)?;
            return Ok(structured.flatten());
        }

        let Value::Object(map) = value else {
            bail!("rubric must be a JSON object");
        };

        let mut criteria = Vec::with_capacity(map.len());
        for (name, entry) in map {
            let criterion: RubricCriterion = serde_json::from_value(entry)
                .with_context(|| format!("invalid criterion '{}'", name))?;
            criteria.push((name, criterion));
        }

        Ok(Self::new(fallback_name, criteria))
    }

    /// Rubric text for a criterion, if the rubric defines it.
    pub fn lookup(&self, criterion: &str) -> Option<&RubricCriterion> {
        self.criteria
            .iter()
            .find(|(name, _)| name == criterion)
            .map(|(_, c)| c)
    }

    pub fn criterion_names(&self) -> impl Iterator<Item = &str> {
        self.criteria.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.criteria.len()
    }

    pub fn is_empty(&self) -> bool {
        self.criteria.is_empty()
    }

    /// The `rubric` field sent when the stream opens, keyed by criterion
    /// name in rubric order.
    pub fn payload(&self) -> Value {
        let mut map = Map::new();
        for (name, criterion) in &self.criteria {
            map.insert(
                name.clone(),
                serde_json::to_value(criterion).unwrap_or(Value::Null),
            );
        }
        Value::Object(map)
    }
}

/// Rubric as stored by the server and authored in rubric files.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuredRubric {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub name: String,
    #[serde(default)]
    pub dimensions: Vec<Dimension>,
}

/// One criterion in structured form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dimension {
    pub name: String,
    #[serde(default)]
    pub criteria_explanation: String,
    /// Step label → instruction.
    #[serde(default)]
    pub criteria_output: Map<String, Value>,
    /// Score label → `{Description, Examples, Explanation}`.
    #[serde(default)]
    pub score_explanation: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ScoreLevel {
    #[serde(rename = "Description", default)]
    description: String,
    #[serde(rename = "Examples", default)]
    examples: String,
    #[serde(rename = "Explanation", default)]
    explanation: String,
}

impl StructuredRubric {
    /// Converts to the payload form the evaluator expects.
    pub fn flatten(&self) -> Rubric {
        let criteria = self
            .dimensions
            .iter()
            .map(|d| (d.name.clone(), d.flatten()))
            .collect();
        Rubric::new(self.name.clone(), criteria)
    }
}

impl Dimension {
    fn flatten(&self) -> RubricCriterion {
        let criteria_output = self
            .criteria_output
            .values()
            .enumerate()
            .map(|(i, v)| format!("{}. {}", i + 1, plain_text(v)))
            .collect::<Vec<_>>()
            .join("\n");

        let score_explanation = self
            .score_explanation
            .iter()
            .map(|(score, details)| {
                let level: ScoreLevel = match details {
                    Value::String(s) => ScoreLevel {
                        description: s.clone(),
                        ..ScoreLevel::default()
                    },
                    other => serde_json::from_value(other.clone()).unwrap_or_default(),
                };
                let mut block = format!("{}: {}.", score, level.description);
                // absent parts are skipped rather than rendered blank
                for part in [&level.examples, &level.explanation] {
                    if !part.is_empty() {
                        block.push_str("\n   ");
                        block.push_str(part);
                    }
                }
                block
            })
            .collect::<Vec<_>>()
            .join("\n\n");

        RubricCriterion {
            criteria_explanation: self.criteria_explanation.clone(),
            criteria_output,
            score_explanation,
        }
    }
}

fn plain_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

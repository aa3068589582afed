//! Batch aggregation and statistics.
//!
//! This module computes cross-document figures for the batch summary:
//! per-criterion means, document ranking and per-degree averages. Only
//! completed documents contribute scores.

use crate::models::DocumentEvaluation;
use std::collections::BTreeMap;

/// Completed documents with their normalized score.
fn scored(documents: &[DocumentEvaluation]) -> impl Iterator<Item = (&DocumentEvaluation, f64)> {
    documents
        .iter()
        .filter(|d| d.is_complete())
        .filter_map(|d| d.normalized_score.map(|s| (d, s)))
}

/// Mean score per criterion, in the order criteria first appear.
pub fn criterion_means(documents: &[DocumentEvaluation]) -> Vec<(String, f64)> {
    let mut totals: Vec<(String, u32, usize)> = Vec::new();

    for doc in documents.iter().filter(|d| d.is_complete()) {
        for criterion in doc.snapshot.result.criteria() {
            match totals.iter_mut().find(|(name, _, _)| *name == criterion.name) {
                Some((_, sum, count)) => {
                    *sum += criterion.score;
                    *count += 1;
                }
                None => totals.push((criterion.name.clone(), criterion.score, 1)),
            }
        }
    }

    totals
        .into_iter()
        .map(|(name, sum, count)| (name, sum as f64 / count as f64))
        .collect()
}

/// Completed documents ordered by normalized score, highest first.
pub fn rank_by_score(documents: &[DocumentEvaluation]) -> Vec<(&DocumentEvaluation, f64)> {
    let mut ranked: Vec<_> = scored(documents).collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    ranked
}

/// Highest and lowest scoring completed documents.
pub fn score_extremes(
    documents: &[DocumentEvaluation],
) -> Option<((&DocumentEvaluation, f64), (&DocumentEvaluation, f64))> {
    let ranked = rank_by_score(documents);
    let highest = *ranked.first()?;
    let lowest = *ranked.last()?;
    Some((highest, lowest))
}

/// Document count and mean normalized score per degree.
pub fn degree_means(documents: &[DocumentEvaluation]) -> BTreeMap<String, (usize, f64)> {
    let mut grouped: BTreeMap<String, Vec<f64>> = BTreeMap::new();

    for (doc, score) in scored(documents) {
        let degree = doc
            .snapshot
            .result
            .subject_metadata
            .as_ref()
            .and_then(|s| s.degree.clone())
            .unwrap_or_else(|| "Unknown".to_string());
        grouped.entry(degree).or_default().push(score);
    }

    grouped
        .into_iter()
        .map(|(degree, scores)| {
            let mean = scores.iter().sum::<f64>() / scores.len() as f64;
            (degree, (scores.len(), mean))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EvaluationStatus, Snapshot, StreamEnd, SubjectMetadata};
    use crate::rubric::Rubric;
    use crate::stream::{EvaluationEvent, SessionId, StreamAggregator};

    fn document(name: &str, degree: &str, scores: &[(&str, u32)], complete: bool) -> DocumentEvaluation {
        let mut agg = StreamAggregator::new(SessionId::new("s"), Rubric::default());
        agg.reset(name);
        agg.apply(&EvaluationEvent::Metadata(SubjectMetadata {
            name: Some(name.to_string()),
            degree: Some(degree.to_string()),
            topic: None,
        }));
        for (criterion, score) in scores {
            agg.apply(&EvaluationEvent::CriterionStart {
                criterion: criterion.to_string(),
            });
            agg.apply(&EvaluationEvent::CriterionComplete {
                criterion: criterion.to_string(),
                score: *score,
            });
        }
        if complete {
            agg.apply(&EvaluationEvent::Complete(Default::default()));
        }
        DocumentEvaluation::new(name.to_string(), agg.current_snapshot(), StreamEnd::Finished)
    }

    fn batch() -> Vec<DocumentEvaluation> {
        vec![
            document("a.pdf", "PhD", &[("Rigor", 4), ("Frame", 2)], true),
            document("b.pdf", "MBA", &[("Rigor", 2), ("Frame", 2)], true),
            document("c.pdf", "PhD", &[("Rigor", 5), ("Frame", 5)], true),
            document("d.pdf", "PhD", &[("Rigor", 1)], false),
        ]
    }

    #[test]
    fn test_criterion_means_skip_incomplete() {
        let means = criterion_means(&batch());
        assert_eq!(means[0].0, "Rigor");
        assert!((means[0].1 - 11.0 / 3.0).abs() < 1e-9);
        assert_eq!(means[1], ("Frame".to_string(), 3.0));
    }

    #[test]
    fn test_rank_and_extremes() {
        let docs = batch();
        let ranked = rank_by_score(&docs);
        assert_eq!(ranked.len(), 3);
        assert_eq!(ranked[0].0.document, "c.pdf");
        assert_eq!(ranked[2].0.document, "b.pdf");

        let ((high, high_score), (low, low_score)) = score_extremes(&docs).unwrap();
        assert_eq!(high.document, "c.pdf");
        assert_eq!(high_score, 5.0);
        assert_eq!(low.document, "b.pdf");
        assert_eq!(low_score, 2.0);
    }

    #[test]
    fn test_degree_means() {
        let means = degree_means(&batch());
        assert_eq!(means.get("PhD"), Some(&(2, 4.0)));
        assert_eq!(means.get("MBA"), Some(&(1, 2.0)));
    }

    #[test]
    fn test_empty_batch() {
        let failed = DocumentEvaluation::new(
            "x.pdf".to_string(),
            Snapshot {
                status: EvaluationStatus::Failed,
                ..Snapshot::default()
            },
            StreamEnd::Finished,
        );
        assert!(score_extremes(&[failed.clone()]).is_none());
        assert!(criterion_means(&[failed.clone()]).is_empty());
        assert!(degree_means(&[failed]).is_empty());
    }
}

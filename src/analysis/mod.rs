//! Analysis across evaluations: batch statistics and staff score edits.

pub mod aggregator;
pub mod scores;

pub use aggregator::*;
pub use scores::{apply_edits, ScoreEdit};

//! Report export and console progress.

pub mod generator;
pub mod progress;

pub use generator::{format_score, generate_json_report, generate_markdown_report, ReportOptions};
pub use progress::ProgressDisplay;

//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use clap::Parser;
use std::path::PathBuf;

use crate::analysis::ScoreEdit;

/// GradEx - streamed dissertation evaluation client
///
/// Uploads PDF/DOCX dissertations to a GradEx server, follows the
/// streamed per-criterion evaluation, and exports a Markdown/JSON report.
///
/// Examples:
///   gradex thesis.pdf
///   gradex thesis.pdf --rubric mba --format json --output result.json
///   gradex --dir ./submissions --fail-below 3.0
///   gradex --dir ./submissions --submit-batch
///   gradex --edit-score "12:Academic rigor=4"
///   gradex --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Documents to evaluate (.pdf or .docx)
    #[arg(value_name = "FILES")]
    pub files: Vec<PathBuf>,

    /// Evaluate every .pdf and .docx beneath this directory
    #[arg(short, long, value_name = "DIR")]
    pub dir: Option<PathBuf>,

    /// GradEx API base URL
    ///
    /// Can also be set via GRADEX_API_URL env var or .gradex.toml config.
    #[arg(long, value_name = "URL", env = "GRADEX_API_URL")]
    pub api_url: Option<String>,

    /// Built-in rubric to evaluate against (generic, mba)
    #[arg(short, long, value_name = "NAME", env = "GRADEX_RUBRIC")]
    pub rubric: Option<String>,

    /// JSON rubric file, in payload or structured form
    ///
    /// Takes precedence over --rubric.
    #[arg(long, value_name = "FILE")]
    pub rubric_file: Option<PathBuf>,

    /// Feedback instruction sent with the evaluation request
    #[arg(long, value_name = "TEXT")]
    pub feedback: Option<String>,

    /// Session id used for reconnects
    ///
    /// If not specified, a fresh id is generated for this run.
    #[arg(long, value_name = "ID")]
    pub session_id: Option<String>,

    /// Output file path for the report
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output format (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Path to configuration file
    ///
    /// If not specified, looks for .gradex.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// HTTP request timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Do not post completed results back to the server
    #[arg(long)]
    pub no_post: bool,

    /// Generate scope-aware feedback after each completed evaluation
    #[arg(long)]
    pub scoped_feedback: bool,

    /// Do not open the notification channel
    ///
    /// Without it, a dropped connection cannot be resumed.
    #[arg(long)]
    pub no_notifications: bool,

    /// Upload all documents for server-side batch processing and exit
    #[arg(long)]
    pub submit_batch: bool,

    /// List available rubrics and exit
    #[arg(long)]
    pub list_rubrics: bool,

    /// Edit a stored score, as USER:DIMENSION=SCORE (repeatable)
    #[arg(long, value_name = "EDIT")]
    pub edit_score: Vec<ScoreEdit>,

    /// Fail if any document's score is below this value
    ///
    /// Useful for CI pipelines. Exit code 2 when the threshold is not met.
    #[arg(long, value_name = "SCORE")]
    pub fail_below: Option<f64>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Generate a default .gradex.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Whether the run evaluates or uploads documents, as opposed to a
    /// standalone action like `--list-rubrics`.
    pub fn needs_documents(&self) -> bool {
        !(self.init_config || self.list_rubrics || !self.edit_score.is_empty())
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        // Check for conflicting options
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if let Some(ref url) = self.api_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err("API URL must start with 'http://' or 'https://'".to_string());
            }
        }

        if let Some(timeout) = self.timeout {
            if timeout == 0 {
                return Err("Timeout must be at least 1 second".to_string());
            }
        }

        if let Some(threshold) = self.fail_below {
            if !(0.0..=5.0).contains(&threshold) {
                return Err("--fail-below must be between 0 and 5".to_string());
            }
        }

        if let Some(ref dir) = self.dir {
            if !dir.is_dir() {
                return Err(format!("Directory does not exist: {}", dir.display()));
            }
        }

        if self.needs_documents() && self.files.is_empty() && self.dir.is_none() {
            return Err("No documents given: pass FILES or --dir".to_string());
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}

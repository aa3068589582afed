//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.gradex.toml` files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Name of the configuration file looked up in the working directory.
pub const CONFIG_FILE: &str = ".gradex.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// GradEx server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Evaluation request settings.
    #[serde(default)]
    pub evaluation: EvaluationConfig,

    /// Report settings.
    #[serde(default)]
    pub report: ReportConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Default output file path.
    #[serde(default = "default_output")]
    pub output: String,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
            verbose: false,
        }
    }
}

fn default_output() -> String {
    "gradex_report.md".to_string()
}

/// GradEx server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// API base URL. WebSocket URLs are derived from it.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// HTTP request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Open the notification channel used for reconnects.
    #[serde(default = "default_true")]
    pub notifications: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            timeout_seconds: default_timeout(),
            notifications: true,
        }
    }
}

fn default_api_url() -> String {
    "http://localhost:8006/dissertation".to_string()
}

fn default_timeout() -> u64 {
    600 // extraction of large scanned documents is slow
}

/// Evaluation request settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationConfig {
    /// Built-in rubric name.
    #[serde(default = "default_rubric")]
    pub rubric: String,

    /// JSON rubric file, overriding `rubric`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rubric_file: Option<String>,

    /// Feedback instruction sent with every request.
    #[serde(default = "default_feedback")]
    pub feedback: String,

    /// Highest score a criterion can receive.
    #[serde(default = "default_max_score")]
    pub max_score: u32,

    /// Post completed results to the server.
    #[serde(default = "default_true")]
    pub post_results: bool,

    /// Generate scope-aware feedback after completion.
    #[serde(default)]
    pub scoped_feedback: bool,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            rubric: default_rubric(),
            rubric_file: None,
            feedback: default_feedback(),
            max_score: default_max_score(),
            post_results: true,
            scoped_feedback: false,
        }
    }
}

fn default_rubric() -> String {
    "generic".to_string()
}

fn default_feedback() -> String {
    "Please provide constructive feedback based on evaluation.".to_string()
}

fn default_max_score() -> u32 {
    5
}

/// Report generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Criterion rows per table page.
    #[serde(default = "default_rows_per_page")]
    pub rows_per_page: usize,

    /// Name shown in the report footer.
    #[serde(default = "default_branding")]
    pub branding: String,

    /// Append each criterion's rubric text.
    #[serde(default)]
    pub include_rubric_text: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            rows_per_page: default_rows_per_page(),
            branding: default_branding(),
            include_rubric_text: false,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_rows_per_page() -> usize {
    6
}

fn default_branding() -> String {
    "Spanda AI".to_string()
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings.
    /// This method only overrides config when CLI provides explicit values.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref url) = args.api_url {
            self.server.api_url = url.trim_end_matches('/').to_string();
        }
        if let Some(timeout) = args.timeout {
            self.server.timeout_seconds = timeout;
        }
        if args.no_notifications {
            self.server.notifications = false;
        }

        // A built-in name on the command line replaces a configured file
        if let Some(ref rubric) = args.rubric {
            self.evaluation.rubric = rubric.clone();
            self.evaluation.rubric_file = None;
        }
        if let Some(ref path) = args.rubric_file {
            self.evaluation.rubric_file = Some(path.display().to_string());
        }
        if let Some(ref feedback) = args.feedback {
            self.evaluation.feedback = feedback.clone();
        }
        if args.no_post {
            self.evaluation.post_results = false;
        }
        if args.scoped_feedback {
            self.evaluation.scoped_feedback = true;
        }

        if let Some(ref output) = args.output {
            self.general.output = output.display().to_string();
        }

        // Flags always override
        if args.verbose {
            self.general.verbose = true;
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Args;
    use clap::Parser;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.api_url, "http://localhost:8006/dissertation");
        assert_eq!(config.server.timeout_seconds, 600);
        assert_eq!(config.evaluation.rubric, "generic");
        assert_eq!(config.evaluation.max_score, 5);
        assert!(config.evaluation.post_results);
        assert_eq!(config.report.rows_per_page, 6);
        assert_eq!(config.report.branding, "Spanda AI");
    }

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
[general]
output = "custom_report.md"
verbose = true

[server]
api_url = "https://gradex.example.org/dissertation"
notifications = false

[evaluation]
rubric = "mba"
scoped_feedback = true

[report]
rows_per_page = 10
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.general.output, "custom_report.md");
        assert!(config.general.verbose);
        assert_eq!(config.server.api_url, "https://gradex.example.org/dissertation");
        assert!(!config.server.notifications);
        assert_eq!(config.server.timeout_seconds, 600);
        assert_eq!(config.evaluation.rubric, "mba");
        assert!(config.evaluation.scoped_feedback);
        assert_eq!(
            config.evaluation.feedback,
            "Please provide constructive feedback based on evaluation."
        );
        assert_eq!(config.report.rows_per_page, 10);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[evaluation]\nmax_score = 10").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.evaluation.max_score, 10);

        writeln!(file, "this is not toml").unwrap();
        assert!(Config::load(file.path()).is_err());
    }

    #[test]
    fn test_merge_with_args() {
        let mut config = Config::default();
        config.evaluation.rubric_file = Some("custom.json".to_string());

        let args = Args::try_parse_from([
            "gradex",
            "a.pdf",
            "--api-url",
            "https://remote.example.org/dissertation/",
            "--rubric",
            "mba",
            "--no-post",
            "--no-notifications",
            "--timeout",
            "30",
        ])
        .unwrap();
        config.merge_with_args(&args);

        assert_eq!(config.server.api_url, "https://remote.example.org/dissertation");
        assert_eq!(config.server.timeout_seconds, 30);
        assert!(!config.server.notifications);
        assert_eq!(config.evaluation.rubric, "mba");
        assert!(config.evaluation.rubric_file.is_none());
        assert!(!config.evaluation.post_results);
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(!toml_str.is_empty());
        assert!(toml_str.contains("[general]"));
        assert!(toml_str.contains("[server]"));
        assert!(toml_str.contains("[evaluation]"));
        assert!(toml_str.contains("[report]"));

        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.server.api_url, Config::default().server.api_url);
    }
}

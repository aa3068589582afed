//! GradEx - streamed dissertation evaluation client
//!
//! A CLI tool that uploads dissertations to a GradEx server, follows the
//! streamed per-criterion evaluation over WebSocket, and exports the
//! result as a Markdown or JSON report.
//!
//! Exit codes:
//!   0 - Success (every document evaluated, no score below threshold)
//!   1 - Runtime error (config, connection, failed or incomplete evaluation)
//!   2 - A document scored below the --fail-below threshold

mod analysis;
mod cli;
mod config;
mod error;
mod models;
mod report;
mod rubric;
mod runner;
mod scanner;
mod stream;
mod transport;

use anyhow::{Context, Result};
use chrono::Utc;
use cli::{Args, OutputFormat};
use config::{Config, CONFIG_FILE};
use models::{BatchSummary, DocumentEvaluation, Report, ReportMetadata, StreamEnd};
use report::{format_score, ProgressDisplay, ReportOptions};
use rubric::Rubric;
use runner::{EvaluationRunner, RunnerOptions};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;
use stream::{SessionId, StreamAggregator};
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;
use transport::{ApiClient, Endpoints};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    // Initialize logging
    init_logging(&args);

    info!("GradEx v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    match run(args).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Run failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .gradex.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(CONFIG_FILE);

    if path.exists() {
        eprintln!("⚠️  {} already exists. Remove it first or edit it manually.", CONFIG_FILE);
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content).with_context(|| format!("Failed to write {}", CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE);
    println!("   Edit it to customize the server, rubric, feedback, and report layout.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args) {
    let level = args.log_level();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

/// Dispatch to the requested action. Returns the exit code.
async fn run(args: Args) -> Result<i32> {
    let mut config = load_config(&args)?;
    config.merge_with_args(&args);

    let endpoints = Endpoints::new(&config.server.api_url);
    let client = ApiClient::new(endpoints, config.server.timeout_seconds)
        .context("Failed to build HTTP client")?;

    if args.list_rubrics {
        return list_rubrics(&client).await;
    }

    if !args.edit_score.is_empty() {
        return edit_scores(&client, &args, &config).await;
    }

    let rubric = resolve_rubric(&client, &config).await?;
    let documents = scanner::collect_documents(&args.files, args.dir.as_deref())?;
    if documents.is_empty() {
        anyhow::bail!("No .pdf or .docx documents found");
    }

    if args.submit_batch {
        return submit_batch(&client, &documents, &rubric).await;
    }

    run_evaluations(client, &args, &config, rubric, documents).await
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", CONFIG_FILE);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {}", e);
            Ok(Config::default())
        }
    }
}

/// A rubric file wins over the rubric name. Names of the form
/// `server:<id>` are fetched from the server.
async fn resolve_rubric(client: &ApiClient, config: &Config) -> Result<Rubric> {
    if let Some(ref path) = config.evaluation.rubric_file {
        return Rubric::load(Path::new(path));
    }

    let name = &config.evaluation.rubric;
    match name.strip_prefix("server:") {
        Some(id) => {
            let id: i64 = id
                .parse()
                .with_context(|| format!("Invalid server rubric id: {}", id))?;
            let rubric = client
                .fetch_rubric(id)
                .await
                .with_context(|| format!("Failed to fetch rubric {}", id))?;
            Ok(rubric.flatten())
        }
        None => Rubric::builtin(name),
    }
}

/// Handle --list-rubrics.
async fn list_rubrics(client: &ApiClient) -> Result<i32> {
    println!("📚 Built-in rubrics:");
    for name in Rubric::builtin_names() {
        let rubric = Rubric::builtin(name)?;
        println!("   {} ({} criteria)", name, rubric.len());
        for criterion in rubric.criterion_names() {
            println!("     - {}", criterion);
        }
    }

    match client.list_rubrics().await {
        Ok(rubrics) if rubrics.is_empty() => println!("\n🌐 No rubrics stored on the server."),
        Ok(rubrics) => {
            println!("\n🌐 Server rubrics (use --rubric server:<id>):");
            for rubric in rubrics {
                let id = rubric.id.map(|id| id.to_string()).unwrap_or_default();
                println!(
                    "   [{}] {} ({} dimensions)",
                    id,
                    rubric.name,
                    rubric.dimensions.len()
                );
            }
        }
        Err(e) => warn!("Could not list server rubrics: {}", e),
    }

    Ok(0)
}

/// Handle --edit-score: apply the edits per user and upload each sheet.
async fn edit_scores(client: &ApiClient, args: &Args, config: &Config) -> Result<i32> {
    let users = client.list_users().await.context("Failed to fetch users")?;

    let mut by_user: BTreeMap<i64, Vec<&analysis::ScoreEdit>> = BTreeMap::new();
    for edit in &args.edit_score {
        by_user.entry(edit.user_id).or_default().push(edit);
    }

    for (user_id, edits) in by_user {
        let sheet = analysis::apply_edits(&users, user_id, &edits, config.evaluation.max_score)?;
        client
            .update_scores(user_id, &sheet.scores)
            .await
            .with_context(|| format!("Failed to update scores for user {}", user_id))?;

        println!(
            "✏️  Updated {} score(s) for user {} (total {:.1})",
            edits.len(),
            user_id,
            sheet.total()
        );
    }

    Ok(0)
}

/// Handle --submit-batch.
async fn submit_batch(client: &ApiClient, documents: &[PathBuf], rubric: &Rubric) -> Result<i32> {
    println!(
        "📤 Submitting {} document(s) with rubric '{}'...",
        documents.len(),
        rubric.name
    );

    let response = client
        .submit_batch(documents, &rubric.payload())
        .await
        .context("Batch submission failed")?;

    println!("✅ Batch accepted by the server.");
    debug!("Batch response: {}", response);
    Ok(0)
}

/// Evaluate every document in turn and write the report.
async fn run_evaluations(
    client: ApiClient,
    args: &Args,
    config: &Config,
    rubric: Rubric,
    documents: Vec<PathBuf>,
) -> Result<i32> {
    let start_time = Instant::now();

    let session_id = match args.session_id {
        Some(ref id) => SessionId::new(id.clone()),
        None => SessionId::generate(),
    };
    let api_url = config.server.api_url.clone();
    let rubric_name = rubric.name.clone();

    println!("🎓 Evaluating {} document(s)", documents.len());
    println!("   Server: {}", api_url);
    println!("   Rubric: {} ({} criteria)", rubric_name, rubric.len());
    println!("   Session: {}\n", session_id);

    let options = RunnerOptions {
        feedback: config.evaluation.feedback.clone(),
        post_results: config.evaluation.post_results,
        scoped_feedback: config.evaluation.scoped_feedback,
        notifications: config.server.notifications,
    };
    let aggregator = StreamAggregator::new(session_id.clone(), rubric);
    let mut runner = EvaluationRunner::new(client, aggregator, options);
    runner.start_notifications();

    let mut evaluations: Vec<DocumentEvaluation> = Vec::new();
    for path in &documents {
        let document = path.display().to_string();
        let progress = ProgressDisplay::spawn(&document, runner.subscribe(), !args.quiet);
        let evaluation = runner.evaluate(path).await;
        progress.finish(&evaluation.snapshot);

        let cancelled = evaluation.end == StreamEnd::Cancelled;
        evaluations.push(evaluation);
        if cancelled {
            warn!("Interrupted, skipping remaining documents");
            break;
        }
    }

    // Build the report
    println!("\n📝 Generating report...");

    let duration = start_time.elapsed().as_secs_f64();
    let summary = (evaluations.len() > 1).then(|| BatchSummary::from_documents(&evaluations));
    let report = Report {
        metadata: ReportMetadata {
            generated_at: Utc::now(),
            rubric: rubric_name,
            api_url,
            session_id: session_id.to_string(),
            duration_seconds: duration,
        },
        documents: evaluations,
        summary,
    };

    let report_options = ReportOptions {
        rows_per_page: config.report.rows_per_page,
        branding: config.report.branding.clone(),
        max_score: config.evaluation.max_score,
        include_rubric_text: config.report.include_rubric_text,
    };
    let output = match args.format {
        OutputFormat::Json => report::generate_json_report(&report)?,
        OutputFormat::Markdown => report::generate_markdown_report(&report, &report_options),
    };

    let output_path = output_path(args, config);
    std::fs::write(&output_path, &output)
        .with_context(|| format!("Failed to write report to {}", output_path.display()))?;

    // Print summary
    println!("\n📊 Evaluation Summary:");
    for doc in &report.documents {
        println!(
            "   {} {} {}",
            doc.snapshot.status.emoji(),
            doc.document,
            format_score(doc.normalized_score, config.evaluation.max_score)
        );
    }
    if let Some(ref summary) = report.summary {
        println!(
            "   ✅ Completed: {} | ❌ Failed: {} | 🔌 Disconnected: {}",
            summary.completed, summary.failed, summary.disconnected
        );
    }
    println!("   Duration: {:.1}s", duration);
    println!("\n✅ Report saved to: {}", output_path.display());

    Ok(exit_code(&report.documents, args.fail_below))
}

/// The configured output path. A JSON report keeps the default file
/// name but gets a `.json` extension.
fn output_path(args: &Args, config: &Config) -> PathBuf {
    let path = PathBuf::from(&config.general.output);
    if args.output.is_none() && args.format == OutputFormat::Json {
        path.with_extension("json")
    } else {
        path
    }
}

/// 1 if any document did not complete, 2 if any scored below the threshold.
fn exit_code(documents: &[DocumentEvaluation], fail_below: Option<f64>) -> i32 {
    if documents.iter().any(|d| !d.is_complete()) {
        eprintln!("\n⛔ Not every document completed evaluation (exit code 1).");
        return 1;
    }

    if let Some(threshold) = fail_below {
        let below: Vec<_> = documents
            .iter()
            .filter(|d| d.normalized_score.is_some_and(|s| s < threshold))
            .collect();

        if !below.is_empty() {
            for doc in &below {
                eprintln!("   {} scored below {:.2}", doc.document, threshold);
            }
            eprintln!("\n⛔ Scores below --fail-below threshold. Failing (exit code 2).");
            return 2;
        }
    }

    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use models::{EvaluationStatus, Snapshot};
    use stream::events::CompletionSummary;
    use stream::EvaluationEvent;

    fn completed(document: &str, score: u32) -> DocumentEvaluation {
        let mut aggregator = StreamAggregator::new(SessionId::new("exit-code"), Rubric::default());
        aggregator.reset(document);
        for event in [
            EvaluationEvent::CriterionStart {
                criterion: "Rigor".to_string(),
            },
            EvaluationEvent::CriterionComplete {
                criterion: "Rigor".to_string(),
                score,
            },
            EvaluationEvent::Complete(CompletionSummary::default()),
        ] {
            aggregator.apply(&event);
        }
        DocumentEvaluation::new(
            document.to_string(),
            aggregator.current_snapshot(),
            StreamEnd::Finished,
        )
    }

    fn failed(document: &str) -> DocumentEvaluation {
        let snapshot = Snapshot {
            status: EvaluationStatus::Failed,
            message: Some("server error".to_string()),
            ..Snapshot::default()
        };
        DocumentEvaluation::new(document.to_string(), snapshot, StreamEnd::Finished)
    }

    #[test]
    fn test_exit_code_success() {
        let documents = vec![completed("a.pdf", 4), completed("b.pdf", 5)];
        assert!(documents.iter().all(|d| d.is_complete()));
        assert_eq!(exit_code(&documents, Some(3.0)), 0);
        assert_eq!(exit_code(&documents, None), 0);
    }

    #[test]
    fn test_exit_code_incomplete_document() {
        let documents = vec![completed("a.pdf", 4), failed("b.pdf")];
        assert_eq!(exit_code(&documents, None), 1);
    }

    #[test]
    fn test_exit_code_below_threshold() {
        let documents = vec![completed("a.pdf", 4), completed("b.pdf", 2)];
        assert_eq!(exit_code(&documents, Some(3.0)), 2);
        assert_eq!(exit_code(&documents, Some(2.0)), 0);
    }

    #[test]
    fn test_exit_code_incomplete_wins_over_threshold() {
        let documents = vec![completed("a.pdf", 1), failed("b.pdf")];
        assert_eq!(exit_code(&documents, Some(3.0)), 1);
    }
}

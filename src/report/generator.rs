//! Markdown report generation.
//!
//! This module generates the exported evaluation report: one section per
//! document with a paginated criterion table, followed by a batch summary
//! when several documents were evaluated.

use crate::analysis::{criterion_means, degree_means, score_extremes};
use crate::models::{
    BatchSummary, CriterionEvaluation, DocumentEvaluation, Report, ReportMetadata, StreamEnd,
};
use anyhow::Result;

/// Layout settings taken from the `[report]` and `[evaluation]` config.
#[derive(Debug, Clone)]
pub struct ReportOptions {
    pub rows_per_page: usize,
    pub branding: String,
    pub max_score: u32,
    pub include_rubric_text: bool,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            rows_per_page: 6,
            branding: "Spanda AI".to_string(),
            max_score: 5,
            include_rubric_text: false,
        }
    }
}

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &Report, options: &ReportOptions) -> String {
    let mut output = String::new();

    output.push_str("# Dissertation Evaluation\n\n");

    output.push_str(&generate_metadata_section(&report.metadata));

    for document in &report.documents {
        output.push_str(&generate_document_section(document, options));
    }

    if let Some(ref summary) = report.summary {
        output.push_str(&generate_summary_section(summary, &report.documents, options));
    }

    output.push_str(&generate_footer(&options.branding));

    output
}

/// Generate the metadata section.
fn generate_metadata_section(metadata: &ReportMetadata) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!(
        "- **Date:** {}\n",
        metadata.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!("- **Rubric:** {}\n", metadata.rubric));
    section.push_str(&format!("- **Server:** {}\n", metadata.api_url));
    section.push_str(&format!("- **Session:** `{}`\n", metadata.session_id));
    section.push_str(&format!(
        "- **Duration:** {:.1}s\n",
        metadata.duration_seconds
    ));
    section.push('\n');

    section
}

/// `X.XX/max`, or `N/A` when nothing was scored.
pub fn format_score(score: Option<f64>, max_score: u32) -> String {
    match score {
        Some(score) => format!("{:.2}/{}", score, max_score),
        None => "N/A".to_string(),
    }
}

/// Generate the section for one evaluated document.
fn generate_document_section(document: &DocumentEvaluation, options: &ReportOptions) -> String {
    let mut section = String::new();
    let snapshot = &document.snapshot;

    section.push_str(&format!("## {}\n\n", document.document));

    if let Some(ref subject) = snapshot.result.subject_metadata {
        if let Some(ref name) = subject.name {
            section.push_str(&format!("- **Name:** {}\n", name));
        }
        if let Some(ref degree) = subject.degree {
            section.push_str(&format!("- **Degree:** {}\n", degree));
        }
        if let Some(ref topic) = subject.topic {
            section.push_str(&format!("- **Topic:** {}\n", topic));
        }
    }

    let status = match document.end {
        StreamEnd::Disconnected => format!("{} (disconnected)", snapshot.status),
        StreamEnd::Cancelled => format!("{} (cancelled)", snapshot.status),
        StreamEnd::Finished => snapshot.status.to_string(),
    };
    section.push_str(&format!(
        "- **Status:** {} {}\n",
        snapshot.status.emoji(),
        status
    ));
    section.push_str(&format!(
        "- **Total Score:** {}\n\n",
        format_score(document.normalized_score, options.max_score)
    ));

    if let Some(ref message) = snapshot.message {
        section.push_str(&format!("> {}\n\n", message));
    }

    section.push_str(&generate_criteria_table(
        snapshot.result.criteria(),
        options.rows_per_page,
    ));

    if options.include_rubric_text {
        section.push_str(&generate_rubric_section(snapshot.result.criteria()));
    }

    if let Some(ref scoped) = document.scoped_feedback {
        section.push_str("### Scoped Feedback\n\n");
        section.push_str(scoped);
        section.push_str("\n\n");
    }

    section
}

/// Generate the criterion table, split into pages.
fn generate_criteria_table(criteria: &[CriterionEvaluation], rows_per_page: usize) -> String {
    if criteria.is_empty() {
        return "No criteria were evaluated.\n\n".to_string();
    }

    let mut table = String::new();
    let rows_per_page = rows_per_page.max(1);
    let pages = criteria.len().div_ceil(rows_per_page);

    for (i, page) in criteria.chunks(rows_per_page).enumerate() {
        table.push_str("| Criterion | Feedback | Score |\n");
        table.push_str("|:---|:---|:---:|\n");
        for criterion in page {
            table.push_str(&format!(
                "| {} | {} | {} |\n",
                escape_cell(&criterion.name),
                escape_cell(criterion.feedback.trim()),
                criterion.score
            ));
        }
        table.push_str(&format!("\n*Page {} of {}*\n\n", i + 1, pages));
    }

    table
}

/// Generate the rubric text shown under each criterion.
fn generate_rubric_section(criteria: &[CriterionEvaluation]) -> String {
    let mut section = String::new();

    section.push_str("### Rubric\n\n");
    for criterion in criteria {
        section.push_str(&format!("#### {}\n\n", criterion.name));
        if !criterion.criteria_explanation.is_empty() {
            section.push_str(&format!("{}\n\n", criterion.criteria_explanation));
        }
        if !criterion.score_explanation.is_empty() {
            section.push_str("```\n");
            section.push_str(&criterion.score_explanation);
            section.push_str("\n```\n\n");
        }
    }

    section
}

/// Generate the batch summary section.
fn generate_summary_section(
    summary: &BatchSummary,
    documents: &[DocumentEvaluation],
    options: &ReportOptions,
) -> String {
    let mut section = String::new();

    section.push_str("## Batch Summary\n\n");
    section.push_str("| Documents | ✅ Completed | ❌ Failed | 🔌 Disconnected | Mean Score |\n");
    section.push_str("|:---:|:---:|:---:|:---:|:---:|\n");
    section.push_str(&format!(
        "| {} | {} | {} | {} | {} |\n\n",
        summary.documents,
        summary.completed,
        summary.failed,
        summary.disconnected,
        format_score(summary.mean_score, options.max_score)
    ));

    let means = criterion_means(documents);
    if !means.is_empty() {
        section.push_str("### Mean Score by Criterion\n\n");
        section.push_str("| Criterion | Mean |\n");
        section.push_str("|:---|:---:|\n");
        for (name, mean) in means {
            section.push_str(&format!("| {} | {:.2} |\n", escape_cell(&name), mean));
        }
        section.push('\n');
    }

    let degrees = degree_means(documents);
    if degrees.len() > 1 {
        section.push_str("### Mean Score by Degree\n\n");
        section.push_str("| Degree | Documents | Mean |\n");
        section.push_str("|:---|:---:|:---:|\n");
        for (degree, (count, mean)) in degrees {
            section.push_str(&format!(
                "| {} | {} | {:.2} |\n",
                escape_cell(&degree),
                count,
                mean
            ));
        }
        section.push('\n');
    }

    if let Some(((highest, high), (lowest, low))) = score_extremes(documents) {
        section.push_str(&format!(
            "- **Highest:** `{}` ({})\n",
            highest.document,
            format_score(Some(high), options.max_score)
        ));
        section.push_str(&format!(
            "- **Lowest:** `{}` ({})\n\n",
            lowest.document,
            format_score(Some(low), options.max_score)
        ));
    }

    section
}

/// Generate the report footer.
fn generate_footer(branding: &str) -> String {
    let mut footer = String::new();

    footer.push_str("---\n\n");
    footer.push_str(&format!("*Evaluation powered by {}*\n", branding));

    footer
}

/// Makes text safe for a single Markdown table cell.
fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|")
        .replace("\r\n", "<br>")
        .replace('\n', "<br>")
}

/// Generate a JSON report.
pub fn generate_json_report(report: &Report) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}

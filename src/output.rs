use crate::models::RunSummary;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Output format options
#[derive(Debug, Clone, ValueEnum, Serialize, Deserialize)]
pub enum OutputFormat {
    Plain,
    Json,
}

/// Print the run summary in the specified format
pub fn print_results(summary: &RunSummary, format: OutputFormat) {
    match format {
        OutputFormat::Plain => print!("{}", render_plain(summary)),
        OutputFormat::Json => print_json(summary),
    }
}

/// Render the summary as plain text
fn render_plain(summary: &RunSummary) -> String {
    let mut out = String::new();

    out.push_str("📝 DETAILED RESULTS\n");
    out.push_str("-------------------\n");
    for result in &summary.results {
        let votes: Vec<String> = result
            .tally
            .iter()
            .map(|c| format!("{}:{}", c.label, c.count))
            .collect();
        out.push_str(&format!(
            "Question #{} (Subject: {}): consensus {} [{}], correct {} => {}\n",
            result.question_id,
            result.subject,
            result.chosen,
            votes.join(" "),
            result.correct_answer,
            if result.is_correct { "CORRECT" } else { "WRONG" }
        ));
    }
    for id in &summary.dropped_question_ids {
        out.push_str(&format!("Question #{}: no clear choice (dropped)\n", id));
    }
    out.push('\n');

    out.push_str("📊 SUMMARY\n");
    out.push_str("----------\n");
    out.push_str(&format!("Model: {}\n", summary.model));
    out.push_str(&format!("Samples per question: {}\n", summary.samples_per_question));
    out.push_str(&format!(
        "Evaluated {} questions ({} dropped: {} without a parsable answer, {} with every sample failed).\n",
        summary.evaluated,
        summary.dropped,
        summary.dropped.saturating_sub(summary.failed_questions),
        summary.failed_questions
    ));
    out.push_str(&format!("Model got {} correct.\n", summary.correct));
    out.push_str(&format!("Accuracy: {:.2}%\n", summary.accuracy));
    out.push_str(&format!(
        "Cache: {} hits, {} misses, {} backend calls\n",
        summary.gateway.cache_hits, summary.gateway.cache_misses, summary.gateway.backend_calls
    ));
    match &summary.confidence {
        Some(report) => out.push_str(&format!(
            "{} [width {:.1} points]\n",
            report,
            report.width()
        )),
        None => out.push_str("No confidence interval: no question was evaluated.\n"),
    }
    out
}

/// Print the summary in JSON format
fn print_json(summary: &RunSummary) {
    match serde_json::to_string_pretty(summary) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error serializing results to JSON: {}", e),
    }
}

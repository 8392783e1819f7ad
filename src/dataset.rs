//! Fixed-column question CSV: index, question, A, B, C, D, answer, subject.
//! The first row is a header and is skipped.

use crate::models::{Label, Question};
use anyhow::{Context, Result};
use std::io::Read;
use std::path::Path;
use tracing::{info, warn};

const COLUMNS: usize = 8;

pub fn load_questions(path: &Path) -> Result<Vec<Question>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open dataset: {}", path.display()))?;
    let questions = read_questions(file)
        .with_context(|| format!("Failed to read dataset: {}", path.display()))?;
    info!("Loaded {} questions from {}", questions.len(), path.display());
    Ok(questions)
}

pub fn read_questions<R: Read>(reader: R) -> Result<Vec<Question>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut questions = Vec::new();
    for (row, record) in csv_reader.records().enumerate() {
        let record = record.with_context(|| format!("Malformed CSV row {}", row + 1))?;
        if record.len() < COLUMNS {
            warn!(
                "Skipping row {}: expected {} columns, found {}",
                row + 1,
                COLUMNS,
                record.len()
            );
            continue;
        }

        let answer = match record[6].parse::<Label>() {
            Ok(label) => label,
            Err(e) => {
                warn!("Skipping row {}: {}", row + 1, e);
                continue;
            }
        };

        questions.push(Question {
            id: record[0].to_string(),
            stem: record[1].to_string(),
            choices: [
                record[2].to_string(),
                record[3].to_string(),
                record[4].to_string(),
                record[5].to_string(),
            ],
            answer,
            subject: record[7].to_string(),
        });
    }
    Ok(questions)
}

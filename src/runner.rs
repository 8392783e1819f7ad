use crate::bootstrap::{BootstrapConfig, bootstrap};
use crate::config::Config;
use crate::dataset::load_questions;
use crate::gateway::Gateway;
use crate::models::{ConsensusResult, Question, RunSummary};
use crate::sampler::{NoConsensus, Sampler, SamplerOptions};
use anyhow::{Context, Result};
use futures_util::{StreamExt, stream};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Drives a full evaluation pass: sample every question, vote, bootstrap
pub struct Runner {
    config: Config,
    gateway: Arc<Gateway>,
    sampler: Sampler,
}

impl Runner {
    pub fn new(config: Config, gateway: Arc<Gateway>) -> Self {
        let options = SamplerOptions {
            samples_per_question: config.sampling.samples_per_question,
            params: config.sampling.params(&config.backend.stop),
            prompt_style: config.sampling.prompt_style,
            sample_keying: config.cache.sample_keying,
            max_retries: config.sampling.max_retries,
            retry_delay: Duration::from_millis(config.sampling.retry_delay_ms),
        };
        Self {
            sampler: Sampler::new(gateway.clone(), options),
            gateway,
            config,
        }
    }

    /// Load the configured dataset and evaluate it
    pub async fn run_from_config(&self) -> Result<RunSummary> {
        let path = self
            .config
            .run
            .dataset_path
            .as_ref()
            .context("run.dataset_path is not set")?;
        let questions = load_questions(path)?;
        self.run(questions).await
    }

    /// Evaluate the given questions
    pub async fn run(&self, mut questions: Vec<Question>) -> Result<RunSummary> {
        // Initialization failure is fatal, so surface it before any work is scheduled
        let model = self
            .gateway
            .model_id()
            .await
            .context("Failed to initialize inference backend")?;

        if let Some(limit) = self.config.run.limit {
            questions.truncate(limit);
        }

        let outcomes = self.evaluate_all(&questions).await;

        let mut results = Vec::new();
        let mut dropped_question_ids = Vec::new();
        let mut failed_questions = 0;
        for (question, outcome) in questions.iter().zip(outcomes) {
            match outcome {
                Ok(result) => results.push(result),
                Err(dropped) => {
                    if dropped.all_failed() {
                        failed_questions += 1;
                    }
                    dropped_question_ids.push(question.id.clone());
                }
            }
        }

        if !dropped_question_ids.is_empty() {
            warn!(
                "{} of {} questions were dropped: {} with no parsable answer, {} where every sample failed",
                dropped_question_ids.len(),
                questions.len(),
                dropped_question_ids.len() - failed_questions,
                failed_questions
            );
        }

        debug!(
            "Response cache holds {} entries",
            self.gateway.cache().len()
        );

        let confidence = self.estimate_confidence(&results).await?;
        let correct = results.iter().filter(|r| r.is_correct).count();
        let accuracy = if results.is_empty() {
            0.0
        } else {
            100.0 * correct as f64 / results.len() as f64
        };

        let summary = RunSummary {
            model,
            samples_per_question: self.sampler.options().samples_per_question,
            evaluated: results.len(),
            dropped: dropped_question_ids.len(),
            failed_questions,
            correct,
            accuracy,
            confidence,
            gateway: self.gateway.stats(),
            results,
            dropped_question_ids,
        };

        self.store_results_if_configured(&summary)?;
        Ok(summary)
    }

    /// Evaluate questions on a bounded worker pool, keeping input order
    async fn evaluate_all(
        &self,
        questions: &[Question],
    ) -> Vec<Result<ConsensusResult, NoConsensus>> {
        let total = questions.len();
        stream::iter(questions.iter().enumerate())
            .map(|(index, question)| async move {
                debug!("Sampling question {}/{} (id {})", index + 1, total, question.id);
                let outcome = self.sampler.evaluate(question).await;
                self.log_outcome(index + 1, total, question, outcome.as_ref());
                outcome
            })
            .buffered(self.config.run.max_workers)
            .collect()
            .await
    }

    fn log_outcome(
        &self,
        question_num: usize,
        total: usize,
        question: &Question,
        outcome: Result<&ConsensusResult, &NoConsensus>,
    ) {
        match outcome {
            Ok(result) => info!(
                "Question {}/{} (id {}, {}): consensus {} vs correct {} => {}",
                question_num,
                total,
                question.id,
                question.subject,
                result.chosen,
                result.correct_answer,
                if result.is_correct { "CORRECT" } else { "WRONG" }
            ),
            Err(dropped) if dropped.all_failed() => info!(
                "Question {}/{} (id {}): all {} samples failed, dropped",
                question_num, total, question.id, dropped.failed
            ),
            Err(dropped) => info!(
                "Question {}/{} (id {}): no clear choice ({} unparsed, {} failed), dropped",
                question_num, total, question.id, dropped.unparsed, dropped.failed
            ),
        }
    }

    /// Bootstrap the correctness vector; `None` when nothing was evaluated
    async fn estimate_confidence(
        &self,
        results: &[ConsensusResult],
    ) -> Result<Option<crate::bootstrap::ConfidenceReport>> {
        let vector = correctness_vector(results);
        if vector.is_empty() {
            warn!("No questions were evaluated; skipping confidence interval");
            return Ok(None);
        }

        let settings = &self.config.bootstrap;
        let config = BootstrapConfig {
            resamples: settings.resamples,
            confidence_level: settings.confidence_level,
            seed: settings.seed,
        };
        debug!(
            "Bootstrapping {} resamples over {} questions",
            config.resamples,
            vector.len()
        );

        let report = tokio::task::spawn_blocking(move || bootstrap(&vector, &config))
            .await
            .context("Bootstrap task failed")??;
        Ok(Some(report))
    }

    /// Store the summary if a storage path is configured
    fn store_results_if_configured(&self, summary: &RunSummary) -> Result<()> {
        if let Some(storage_path) = &self.config.run.storage_path {
            self.store_results(summary, storage_path)?;
        }
        Ok(())
    }

    /// Store the summary to a JSON file
    fn store_results(&self, summary: &RunSummary, path: &str) -> Result<()> {
        let json_content =
            serde_json::to_string_pretty(summary).context("Failed to serialize results to JSON")?;

        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        std::fs::write(path, json_content)
            .with_context(|| format!("Failed to write results to: {}", path))?;

        info!("Results stored to: {}", path);
        Ok(())
    }
}

/// One entry per evaluated question: 1.0 when the consensus was right
pub fn correctness_vector(results: &[ConsensusResult]) -> Vec<f64> {
    results
        .iter()
        .map(|r| if r.is_correct { 1.0 } else { 0.0 })
        .collect()
}

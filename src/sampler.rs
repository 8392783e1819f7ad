use crate::gateway::Gateway;
use crate::models::{ConsensusResult, Label, LabelCount, Question, SamplingParams};
use crate::parse::parse_answer;
use crate::prompt::{PromptStyle, SampleKeying, question_prompt, sample_key};
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// How a question is sampled
#[derive(Debug, Clone)]
pub struct SamplerOptions {
    pub samples_per_question: usize,
    pub params: SamplingParams,
    pub prompt_style: PromptStyle,
    pub sample_keying: SampleKeying,
    pub max_retries: u32,
    /// Pause before the first retry, doubled for each later one
    pub retry_delay: Duration,
}

/// One sample of a question, in issuance order
#[derive(Debug, Clone, PartialEq)]
pub enum Sample {
    Completed(String),
    /// Every attempt failed; carries the last error
    Failed(String),
}

/// Vote counter that remembers the order in which labels first appeared
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VoteTally {
    counts: Vec<LabelCount>,
}

impl VoteTally {
    pub fn record(&mut self, label: Label) {
        match self.counts.iter_mut().find(|c| c.label == label) {
            Some(entry) => entry.count += 1,
            None => self.counts.push(LabelCount { label, count: 1 }),
        }
    }

    /// Most votes; ties go to the label seen first
    pub fn leader(&self) -> Option<Label> {
        let mut best: Option<&LabelCount> = None;
        for entry in &self.counts {
            if best.is_none_or(|b| entry.count > b.count) {
                best = Some(entry);
            }
        }
        best.map(|b| b.label)
    }

    pub fn count(&self, label: Label) -> usize {
        self.counts
            .iter()
            .find(|c| c.label == label)
            .map_or(0, |c| c.count)
    }

    pub fn total(&self) -> usize {
        self.counts.iter().map(|c| c.count).sum()
    }

    pub fn into_counts(self) -> Vec<LabelCount> {
        self.counts
    }
}

impl FromIterator<Label> for VoteTally {
    fn from_iter<I: IntoIterator<Item = Label>>(iter: I) -> Self {
        let mut tally = VoteTally::default();
        for label in iter {
            tally.record(label);
        }
        tally
    }
}

/// Why a question produced no vote
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoConsensus {
    pub unparsed: usize,
    pub failed: usize,
}

impl NoConsensus {
    /// Every sample failed at the backend; nothing was there to parse
    pub fn all_failed(&self) -> bool {
        self.unparsed == 0 && self.failed > 0
    }
}

/// Majority-vote the samples of one question. Errs when no sample parsed.
pub fn aggregate(
    question: &Question,
    samples: &[Sample],
    style: PromptStyle,
) -> Result<ConsensusResult, NoConsensus> {
    let mut tally = VoteTally::default();
    let mut unparsed = 0;
    let mut failed = 0;
    let mut completions = Vec::with_capacity(samples.len());

    for sample in samples {
        match sample {
            Sample::Completed(text) => {
                match parse_answer(text, style).label() {
                    Some(label) => tally.record(label),
                    None => unparsed += 1,
                }
                completions.push(text.clone());
            }
            Sample::Failed(_) => failed += 1,
        }
    }

    let Some(chosen) = tally.leader() else {
        return Err(NoConsensus { unparsed, failed });
    };
    debug!(
        "Question {}: {} with {}/{} votes ({} unparsed, {} failed)",
        question.id,
        chosen,
        tally.count(chosen),
        tally.total(),
        unparsed,
        failed
    );
    Ok(ConsensusResult {
        question_id: question.id.clone(),
        subject: question.subject.clone(),
        chosen,
        correct_answer: question.answer,
        is_correct: chosen == question.answer,
        tally: tally.into_counts(),
        unparsed,
        failed,
        samples: completions,
    })
}

/// Self-consistency sampler: N gateway queries per question, then a vote
pub struct Sampler {
    gateway: Arc<Gateway>,
    options: SamplerOptions,
}

impl Sampler {
    pub fn new(gateway: Arc<Gateway>, options: SamplerOptions) -> Self {
        Self { gateway, options }
    }

    pub fn options(&self) -> &SamplerOptions {
        &self.options
    }

    /// Issue all samples concurrently; the result keeps issuance order
    pub async fn sample(&self, question: &Question) -> Vec<Sample> {
        let prompt = question_prompt(question, self.options.prompt_style);
        let calls = (0..self.options.samples_per_question)
            .map(|index| self.sample_once(&question.id, &prompt, index));
        join_all(calls).await
    }

    async fn sample_once(&self, question_id: &str, prompt: &str, index: usize) -> Sample {
        let key = sample_key(prompt, index, self.options.sample_keying);
        let mut attempt = 0;
        loop {
            match self.gateway.query_keyed(&key, prompt, &self.options.params).await {
                Ok(text) => return Sample::Completed(text),
                Err(e) if attempt < self.options.max_retries => {
                    let delay = self.options.retry_delay * (1u32 << attempt.min(10));
                    attempt += 1;
                    debug!(
                        "Question {} sample {} failed, retrying in {}ms ({}/{}): {}",
                        question_id,
                        index,
                        delay.as_millis(),
                        attempt,
                        self.options.max_retries,
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    warn!("Question {} sample {} failed: {}", question_id, index, e);
                    return Sample::Failed(e.to_string());
                }
            }
        }
    }

    /// Sample and vote on one question
    pub async fn evaluate(&self, question: &Question) -> Result<ConsensusResult, NoConsensus> {
        let samples = self.sample(question).await;
        aggregate(question, &samples, self.options.prompt_style)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::{MockBackend, MockLoader};
    use crate::cache::MemoryCache;
    use crate::gateway::GatewayOptions;
    use std::time::Instant;

    fn question() -> Question {
        Question {
            id: "42".to_string(),
            subject: "biology".to_string(),
            stem: "Powerhouse of the cell?".to_string(),
            choices: [
                "Nucleus".into(),
                "Ribosome".into(),
                "Mitochondrion".into(),
                "Golgi".into(),
            ],
            answer: Label::A,
        }
    }

    fn completed(labels: &[&str]) -> Vec<Sample> {
        labels
            .iter()
            .map(|l| Sample::Completed(format!("Some reasoning.\nAnswer: {}", l)))
            .collect()
    }

    fn options(keying: SampleKeying, max_retries: u32) -> SamplerOptions {
        SamplerOptions {
            samples_per_question: 5,
            params: SamplingParams {
                temperature: 0.4,
                top_p: 0.9,
                max_tokens: 256,
                stop: vec![],
            },
            prompt_style: PromptStyle::ChainOfThought,
            sample_keying: keying,
            max_retries,
            retry_delay: Duration::ZERO,
        }
    }

    fn sampler_over(loader: Arc<MockLoader>, options: SamplerOptions) -> Sampler {
        let gateway = Gateway::new(
            loader,
            Arc::new(MemoryCache::new()),
            GatewayOptions {
                timeout: Duration::from_secs(5),
                max_concurrent_requests: 4,
            },
        );
        Sampler::new(Arc::new(gateway), options)
    }

    #[test]
    fn test_majority_vote() {
        let result = aggregate(
            &question(),
            &completed(&["A", "A", "B", "C", "A"]),
            PromptStyle::ChainOfThought,
        )
        .unwrap();

        assert_eq!(result.chosen, Label::A);
        assert!(result.is_correct);
        assert_eq!(
            result.tally,
            vec![
                LabelCount { label: Label::A, count: 3 },
                LabelCount { label: Label::B, count: 1 },
                LabelCount { label: Label::C, count: 1 },
            ]
        );
        assert_eq!(result.samples.len(), 5);
    }

    #[test]
    fn test_tie_goes_to_first_occurrence() {
        let result = aggregate(
            &question(),
            &completed(&["B", "A", "B", "A"]),
            PromptStyle::ChainOfThought,
        )
        .unwrap();

        assert_eq!(result.chosen, Label::B);
        assert!(!result.is_correct);
    }

    #[test]
    fn test_all_unparsed_yields_nothing() {
        let samples = vec![
            Sample::Completed("I am not sure.".to_string()),
            Sample::Completed("Answer: none of these".to_string()),
            Sample::Failed("timed out".to_string()),
        ];
        assert_eq!(
            aggregate(&question(), &samples, PromptStyle::ChainOfThought).unwrap_err(),
            NoConsensus {
                unparsed: 2,
                failed: 1
            }
        );
    }

    #[test]
    fn test_abstentions_and_failures_are_counted() {
        let samples = vec![
            Sample::Completed("Answer: D".to_string()),
            Sample::Completed("no idea".to_string()),
            Sample::Failed("backend down".to_string()),
            Sample::Completed("answer: d".to_string()),
        ];
        let result = aggregate(&question(), &samples, PromptStyle::ChainOfThought).unwrap();

        assert_eq!(result.chosen, Label::D);
        assert_eq!(result.unparsed, 1);
        assert_eq!(result.failed, 1);
        assert_eq!(result.samples, vec!["Answer: D", "no idea", "answer: d"]);
    }

    #[test]
    fn test_vote_tally_helpers() {
        let tally: VoteTally = [Label::C, Label::A, Label::C].into_iter().collect();
        assert_eq!(tally.count(Label::C), 2);
        assert_eq!(tally.count(Label::B), 0);
        assert_eq!(tally.total(), 3);
        assert_eq!(tally.leader(), Some(Label::C));
        assert_eq!(VoteTally::default().leader(), None);
    }

    #[tokio::test]
    async fn test_per_sample_keys_let_samples_differ() {
        let prompt = question_prompt(&question(), PromptStyle::ChainOfThought);
        let loader = Arc::new(MockLoader::new(MockBackend::replying("x").script(
            &prompt,
            &["Answer: A", "Answer: A", "Answer: B", "Answer: C", "Answer: A"],
        )));
        let sampler = sampler_over(loader.clone(), options(SampleKeying::PerSample, 0));

        let result = sampler.evaluate(&question()).await.unwrap();

        assert_eq!(loader.backend.call_count(), 5);
        assert_eq!(result.chosen, Label::A);
        let tally: VoteTally = result
            .tally
            .iter()
            .flat_map(|c| std::iter::repeat_n(c.label, c.count))
            .collect();
        assert_eq!(tally.count(Label::A), 3);
        assert_eq!(tally.count(Label::B), 1);
        assert_eq!(tally.count(Label::C), 1);
    }

    #[tokio::test]
    async fn test_shared_keys_collapse_to_one_completion() {
        let prompt = question_prompt(&question(), PromptStyle::ChainOfThought);
        let loader = Arc::new(MockLoader::new(MockBackend::replying("x").script(
            &prompt,
            &["Answer: A", "Answer: B", "Answer: C", "Answer: D", "Answer: A"],
        )));
        let sampler = sampler_over(loader.clone(), options(SampleKeying::Shared, 0));

        let samples = sampler.sample(&question()).await;

        assert_eq!(samples.len(), 5);
        assert_eq!(loader.backend.call_count(), 1);
        assert!(samples.iter().all(|s| s == &samples[0]));
        assert_eq!(sampler.gateway.cache().len(), 1);
    }

    #[tokio::test]
    async fn test_retries_back_off_exponentially() {
        let loader = Arc::new(MockLoader::new(MockBackend::failing("server overloaded")));
        let mut opts = options(SampleKeying::PerSample, 2);
        opts.samples_per_question = 1;
        opts.retry_delay = Duration::from_millis(40);
        let sampler = sampler_over(loader.clone(), opts);

        let started = Instant::now();
        let samples = sampler.sample(&question()).await;

        // 40ms before the first retry, 80ms before the second
        assert!(started.elapsed() >= Duration::from_millis(120));
        assert_eq!(loader.backend.call_count(), 3);
        assert!(matches!(samples[0], Sample::Failed(_)));
    }

    #[tokio::test]
    async fn test_failed_samples_are_retried_then_dropped() {
        let loader = Arc::new(MockLoader::new(MockBackend::failing("server overloaded")));
        let sampler = sampler_over(loader.clone(), options(SampleKeying::PerSample, 2));

        let samples = sampler.sample(&question()).await;

        assert_eq!(loader.backend.call_count(), 15);
        assert!(samples.iter().all(|s| matches!(s, Sample::Failed(m) if m.contains("server overloaded"))));
        let dropped = sampler.evaluate(&question()).await.unwrap_err();
        assert_eq!(dropped.failed, 5);
        assert!(dropped.all_failed());
    }
}

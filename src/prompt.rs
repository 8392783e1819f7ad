use crate::models::{ChatMessage, Label, Question};
use serde::{Deserialize, Serialize};

/// How questions are put to the model
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PromptStyle {
    /// Brief reasoning followed by a terminal `Answer: X` line
    #[default]
    ChainOfThought,
    /// Bare request for the single best letter
    Direct,
}

/// How sample calls map onto cache keys
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SampleKeying {
    /// Every sample index gets its own cache entry, so N samples can differ
    #[default]
    PerSample,
    /// All samples of a question share the prompt as key (at most one distinct completion)
    Shared,
}

const SAMPLE_KEY_SEPARATOR: char = '\u{1f}';

/// Render the prompt for a question in the given style
pub fn question_prompt(question: &Question, style: PromptStyle) -> String {
    let mut prompt = format!(
        "Question (Subject: {}):\n{}\n\nChoices:\n",
        question.subject, question.stem
    );
    for label in Label::ALL {
        prompt.push_str(&format!("{}) {}\n", label, question.choice(label)));
    }
    prompt.push('\n');

    match style {
        PromptStyle::ChainOfThought => prompt.push_str(
            "Provide a detailed, step-by-step chain of thought to reason about the correct choice \
             (DO NOT exceed 60 tokens of reasoning).\n\
             Then finalize your answer at the end in the exact format:\n\n\
             Answer: X\n\n\
             (where X is one of A, B, C, or D, with no extra text).\n",
        ),
        PromptStyle::Direct => {
            prompt.push_str("Please select the single best answer (A, B, C, or D).\n")
        }
    }
    prompt
}

/// Flatten a chat history into the single prompt string the backend sees
pub fn format_chat(messages: &[ChatMessage]) -> String {
    let mut prompt = String::new();
    for message in messages {
        match message.role.as_str() {
            "system" => prompt.push_str(&format!("<<SYS>>\n{}\n<</SYS>>\n\n", message.content)),
            "user" => prompt.push_str(&format!("<|user|>\n{}\n", message.content)),
            "assistant" => prompt.push_str(&format!("<|assistant|>\n{}\n", message.content)),
            _ => {}
        }
    }
    prompt.push_str("<|assistant|>\n");
    prompt
}

/// Cache key for one sample of a prompt
pub fn sample_key(prompt: &str, index: usize, keying: SampleKeying) -> String {
    match keying {
        SampleKeying::PerSample => format!("{}{}sample:{}", prompt, SAMPLE_KEY_SEPARATOR, index),
        SampleKeying::Shared => prompt.to_string(),
    }
}

use crate::bootstrap::ConfidenceReport;
use crate::gateway::GatewayStats;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the four answer choices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Label {
    A,
    B,
    C,
    D,
}

impl Label {
    pub const ALL: [Label; 4] = [Label::A, Label::B, Label::C, Label::D];

    /// Case-insensitive conversion from a single character
    pub fn from_char(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'A' => Some(Label::A),
            'B' => Some(Label::B),
            'C' => Some(Label::C),
            'D' => Some(Label::D),
            _ => None,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            Label::A => 'A',
            Label::B => 'B',
            Label::C => 'C',
            Label::D => 'D',
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

impl FromStr for Label {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let mut chars = trimmed.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => {
                Label::from_char(c).ok_or_else(|| format!("Not an answer label: {:?}", s))
            }
            _ => Err(format!("Not an answer label: {:?}", s)),
        }
    }
}

/// A four-choice question, read-only once loaded
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub subject: String,
    pub stem: String,
    /// Choice texts in A..D order
    pub choices: [String; 4],
    pub answer: Label,
}

impl Question {
    pub fn choice(&self, label: Label) -> &str {
        &self.choices[label.index()]
    }
}

/// Sampling parameters handed to the backend for one generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
    /// Stop strings / terminator tokens
    #[serde(default)]
    pub stop: Vec<String>,
}

/// A single chat turn as received by the remote endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelCount {
    pub label: Label,
    pub count: usize,
}

/// Majority-voted verdict for one question
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub question_id: String,
    pub subject: String,
    pub chosen: Label,
    pub correct_answer: Label,
    pub is_correct: bool,
    /// Vote counts in order of first occurrence
    pub tally: Vec<LabelCount>,
    pub unparsed: usize,
    pub failed: usize,
    /// Raw completions, in issuance order
    pub samples: Vec<String>,
}

/// Everything a run produces
#[derive(Debug, Serialize, Deserialize)]
pub struct RunSummary {
    pub model: String,
    pub samples_per_question: usize,
    pub evaluated: usize,
    pub dropped: usize,
    /// Dropped questions whose samples all failed at the backend
    #[serde(default)]
    pub failed_questions: usize,
    pub correct: usize,
    /// Plain accuracy over evaluated questions, in percent
    pub accuracy: f64,
    /// Absent when no question produced a consensus
    pub confidence: Option<ConfidenceReport>,
    pub gateway: GatewayStats,
    pub results: Vec<ConsensusResult>,
    pub dropped_question_ids: Vec<String>,
}

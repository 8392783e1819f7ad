//! Extraction of a discrete answer from free-text model output.
//!
//! Grammar for chain-of-thought completions: arbitrary reasoning, then the
//! literal `Answer:` token (any case), optional whitespace and opening
//! punctuation, then a single letter A-D standing alone as a word. The first
//! such occurrence wins. Anything else is an abstention, never an error.

use crate::models::Label;
use crate::prompt::PromptStyle;
use once_cell::sync::Lazy;
use regex::Regex;

static ANSWER_LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\banswer:\s*[(\["'*]*([abcd])\b"#).expect("answer-line regex is valid")
});

static BARE_LETTER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([ABCD])\b").expect("bare-letter regex is valid"));

/// Outcome of parsing one completion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParsedAnswer {
    Label(Label),
    Unparsed,
}

impl ParsedAnswer {
    pub fn label(self) -> Option<Label> {
        match self {
            ParsedAnswer::Label(label) => Some(label),
            ParsedAnswer::Unparsed => None,
        }
    }
}

/// Parse a completion produced under the given prompt style
pub fn parse_answer(text: &str, style: PromptStyle) -> ParsedAnswer {
    let re = match style {
        PromptStyle::ChainOfThought => &*ANSWER_LINE_RE,
        PromptStyle::Direct => &*BARE_LETTER_RE,
    };

    re.captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().chars().next())
        .and_then(Label::from_char)
        .map_or(ParsedAnswer::Unparsed, ParsedAnswer::Label)
}

//! Error types for the evaluation pipeline

use thiserror::Error;

/// Failures surfaced by the inference gateway
#[derive(Error, Debug, Clone)]
pub enum GatewayError {
    /// The backend could not be loaded. Fatal to the process.
    #[error("Backend initialization failed: {message}")]
    Initialization { message: String },

    /// A single query failed or timed out.
    #[error("Inference failed for prompt {}: {cause}", preview(.prompt))]
    Inference { prompt: String, cause: String },
}

impl GatewayError {
    pub fn inference(prompt: &str, cause: impl std::fmt::Display) -> Self {
        GatewayError::Inference {
            prompt: prompt.to_string(),
            cause: cause.to_string(),
        }
    }
}

/// Failures while persisting the response cache
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Cache serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Failures of the bootstrap estimator
#[derive(Error, Debug, PartialEq)]
pub enum StatsError {
    #[error("Cannot bootstrap an empty sample")]
    EmptyInput,

    #[error("Confidence level must be in (0, 1), got {0}")]
    InvalidConfidenceLevel(f64),

    #[error("Number of bootstrap resamples must be positive")]
    NoResamples,
}

/// Short, single-line rendering of a prompt for error messages
fn preview(prompt: &str) -> String {
    const MAX_CHARS: usize = 60;
    let flat: String = prompt
        .chars()
        .map(|c| if c.is_whitespace() { ' ' } else { c })
        .collect();
    if flat.chars().count() > MAX_CHARS {
        let head: String = flat.chars().take(MAX_CHARS).collect();
        format!("{:?}...", head)
    } else {
        format!("{:?}", flat)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inference_error_keeps_full_prompt() {
        let prompt = "x".repeat(200);
        let err = GatewayError::inference(&prompt, "out of memory");
        match &err {
            GatewayError::Inference { prompt: p, cause } => {
                assert_eq!(p.len(), 200);
                assert_eq!(cause, "out of memory");
            }
            other => panic!("unexpected variant: {:?}", other),
        }
        let rendered = err.to_string();
        assert!(rendered.contains("out of memory"));
        assert!(rendered.contains("..."));
        assert!(rendered.len() < 200);
    }

    #[test]
    fn test_preview_flattens_newlines() {
        assert_eq!(preview("a\nb"), "\"a b\"");
    }

    #[test]
    fn test_stats_error_messages() {
        assert_eq!(
            StatsError::InvalidConfidenceLevel(1.5).to_string(),
            "Confidence level must be in (0, 1), got 1.5"
        );
    }
}

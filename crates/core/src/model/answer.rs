use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A captured answer for one question.
///
/// Answers are opaque to the controller: free text for written questions,
/// one or more option ids for choice questions. On the wire this is either
/// a string or an array of strings, hence the untagged representation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerValue {
    Text(String),
    Selections(Vec<String>),
}

impl AnswerValue {
    #[must_use]
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    /// Single-choice answer.
    #[must_use]
    pub fn selection(option: impl Into<String>) -> Self {
        Self::Selections(vec![option.into()])
    }

    #[must_use]
    pub fn selections(options: Vec<String>) -> Self {
        Self::Selections(options)
    }

    /// True when the answer carries no usable content. Blank answers do not
    /// count as progress.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        match self {
            AnswerValue::Text(text) => text.trim().is_empty(),
            AnswerValue::Selections(options) => options.is_empty(),
        }
    }
}

/// Self-reported confidence a student attaches to an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    Low,
    Medium,
    High,
}

impl ConfidenceLevel {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceLevel::Low => "low",
            ConfidenceLevel::Medium => "medium",
            ConfidenceLevel::High => "high",
        }
    }
}

impl fmt::Display for ConfidenceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid confidence level: {0}")]
pub struct ParseConfidenceError(String);

impl FromStr for ConfidenceLevel {
    type Err = ParseConfidenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(ConfidenceLevel::Low),
            "medium" => Ok(ConfidenceLevel::Medium),
            "high" => Ok(ConfidenceLevel::High),
            other => Err(ParseConfidenceError(other.to_string())),
        }
    }
}

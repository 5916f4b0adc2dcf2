//! Rubric item scores.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How much a technique trusts its own score.
///
/// Parsing is lenient: any label other than `high` / `medium` / `low`
/// (case-insensitive) becomes [`Confidence::Medium`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }

    /// Parse a label, falling back to `Medium` for anything unrecognised.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "high" => Self::High,
            "medium" => Self::Medium,
            "low" => Self::Low,
            other => {
                tracing::warn!(label = %other, "unrecognised confidence label, treating as medium");
                Self::Medium
            }
        }
    }
}

impl Default for Confidence {
    fn default() -> Self {
        Self::Medium
    }
}

impl From<String> for Confidence {
    fn from(label: String) -> Self {
        Self::from_label(&label)
    }
}

impl From<&str> for Confidence {
    fn from(label: &str) -> Self {
        Self::from_label(label)
    }
}

impl From<Confidence> for String {
    fn from(confidence: Confidence) -> Self {
        confidence.as_str().to_string()
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether an item counts towards the normalised score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    #[default]
    Evaluated,
    Excluded,
    DataMissing,
}

/// Score for a single rubric item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ItemScore {
    pub item_id: String,
    pub score: f64,
    pub max_score: f64,
    /// Agent that produced the score.
    pub evaluated_by: String,
    pub technique_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub confidence: Confidence,
    #[serde(default)]
    pub status: ItemStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl ItemScore {
    /// Create an evaluated, high-confidence score stamped with the current time.
    pub fn new(
        item_id: impl Into<String>,
        score: f64,
        max_score: f64,
        evaluated_by: impl Into<String>,
        technique_id: impl Into<String>,
    ) -> Self {
        Self {
            item_id: item_id.into(),
            score,
            max_score,
            evaluated_by: evaluated_by.into(),
            technique_id: technique_id.into(),
            timestamp: Utc::now(),
            confidence: Confidence::High,
            status: ItemStatus::Evaluated,
            notes: None,
        }
    }

    pub fn with_confidence(mut self, confidence: Confidence) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_status(mut self, status: ItemStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn is_evaluated(&self) -> bool {
        self.status == ItemStatus::Evaluated
    }
}

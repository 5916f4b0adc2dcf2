//! Methodology trace events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One step in the append-only methodology trace.
///
/// Identity is `(step, agent, technique_id, item_id, action)`; two events with
/// the same identity are the same event regardless of timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TraceEvent {
    pub step: u32,
    pub timestamp: DateTime<Utc>,
    pub agent: String,
    pub technique_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score_delta: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence_ref: Option<String>,
}

/// Borrowed identity key of a [`TraceEvent`].
pub type TraceKey<'a> = (u32, &'a str, &'a str, Option<&'a str>, &'a str);

impl TraceEvent {
    pub fn new(
        step: u32,
        agent: impl Into<String>,
        technique_id: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            step,
            timestamp: Utc::now(),
            agent: agent.into(),
            technique_id: technique_id.into(),
            item_id: None,
            action: action.into(),
            score_delta: None,
            evidence_ref: None,
        }
    }

    pub fn with_item(mut self, item_id: impl Into<String>) -> Self {
        self.item_id = Some(item_id.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_score_delta(mut self, delta: f64) -> Self {
        self.score_delta = Some(delta);
        self
    }

    pub fn with_evidence(mut self, evidence_ref: impl Into<String>) -> Self {
        self.evidence_ref = Some(evidence_ref.into());
        self
    }

    pub fn key(&self) -> TraceKey<'_> {
        (
            self.step,
            self.agent.as_str(),
            self.technique_id.as_str(),
            self.item_id.as_deref(),
            self.action.as_str(),
        )
    }
}

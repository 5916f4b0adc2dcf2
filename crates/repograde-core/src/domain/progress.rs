//! Progress events streamed to observers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::item::Confidence;

/// Wire-level progress event kind.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    EvaluationStart,
    CategoryStart,
    CategoryComplete,
    TechniqueStart,
    TechniqueComplete,
    TechniqueError,
    DeepSynthesisStart,
    DeepSynthesisComplete,
    QualityGateComplete,
    MetricsUpdate,
    Heartbeat,
    EvaluationComplete,
    EvaluationError,
}

impl EventType {
    /// Critical events report a terminal outcome; losing one would hide it.
    pub fn is_critical(&self) -> bool {
        matches!(self, Self::EvaluationComplete | Self::EvaluationError)
    }

    /// Terminal events end a subscriber's stream after delivery.
    pub fn is_terminal(&self) -> bool {
        self.is_critical()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EvaluationStart => "evaluation_start",
            Self::CategoryStart => "category_start",
            Self::CategoryComplete => "category_complete",
            Self::TechniqueStart => "technique_start",
            Self::TechniqueComplete => "technique_complete",
            Self::TechniqueError => "technique_error",
            Self::DeepSynthesisStart => "deep_synthesis_start",
            Self::DeepSynthesisComplete => "deep_synthesis_complete",
            Self::QualityGateComplete => "quality_gate_complete",
            Self::MetricsUpdate => "metrics_update",
            Self::Heartbeat => "heartbeat",
            Self::EvaluationComplete => "evaluation_complete",
            Self::EvaluationError => "evaluation_error",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress percent reported by synthesized heartbeats.
pub const HEARTBEAT_PROGRESS: f64 = -1.0;

/// An ephemeral progress notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressEvent {
    pub evaluation_id: String,
    pub event_type: EventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub technique_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub technique_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
    /// 0-100, or -1 for heartbeats.
    pub progress_percent: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<Confidence>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn new(evaluation_id: impl Into<String>, event_type: EventType) -> Self {
        Self {
            evaluation_id: evaluation_id.into(),
            event_type,
            technique_id: None,
            technique_name: None,
            category_id: None,
            progress_percent: 0.0,
            score: None,
            max_score: None,
            confidence: None,
            duration_ms: None,
            error_message: None,
            message: None,
            timestamp: Utc::now(),
        }
    }

    pub fn heartbeat(evaluation_id: impl Into<String>) -> Self {
        Self::new(evaluation_id, EventType::Heartbeat).with_progress(HEARTBEAT_PROGRESS)
    }

    pub fn with_category(mut self, category_id: impl Into<String>) -> Self {
        self.category_id = Some(category_id.into());
        self
    }

    pub fn with_technique(mut self, technique_id: impl Into<String>) -> Self {
        let technique_id = technique_id.into();
        self.technique_name = Some(technique_id.replace(['-', '_'], " "));
        self.technique_id = Some(technique_id);
        self
    }

    pub fn with_progress(mut self, percent: f64) -> Self {
        self.progress_percent = percent;
        self
    }

    pub fn with_score(mut self, score: f64, max_score: f64) -> Self {
        self.score = Some(score);
        self.max_score = Some(max_score);
        self
    }

    pub fn with_confidence(mut self, confidence: Confidence) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error_message = Some(error.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn is_critical(&self) -> bool {
        self.event_type.is_critical()
    }
}

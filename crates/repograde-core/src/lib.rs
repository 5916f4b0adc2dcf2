//! repograde core library
//!
//! Concurrency and orchestration engine for rubric-based repository
//! evaluation:
//! - [`worker`]: bounded-concurrency, per-technique-timeout category executor
//! - [`reducers`]: order-independent merge functions for branch fan-in
//! - [`channel`]: sync-to-async progress channel with live subscribers
//! - [`scoring`]: confidence-weighted, coverage-aware score normalisation

pub mod channel;
pub mod config;
pub mod domain;
pub mod evaluation;
pub mod metrics;
pub mod obs;
pub mod reducers;
pub mod scoring;
pub mod telemetry;
pub mod worker;

pub use channel::{EmitOutcome, ProgressChannel, ProgressEmitter, ProgressStream, PublishOutcome};
pub use config::{ChannelConfig, ConfigError, EngineConfig, WorkerConfig};
pub use domain::{
    AgentContribution, CategoryNotice, CategoryResult, ChannelError, Confidence,
    EvaluationContext, EvaluationState, EventType, ExcludedTechnique, ItemScore, ItemStatus,
    PartialEvaluationState, ProgressEvent, TechniqueError, TechniqueFailure, TechniqueOutcome,
    TokenUsage, TraceEvent, HEARTBEAT_PROGRESS,
};
pub use evaluation::{run_evaluation, CategoryPlan, EvaluationReport};
pub use metrics::METRICS;
pub use obs::EvaluationSpan;
pub use reducers::{
    fold_partial_states, merge_agent_contributions, merge_excluded_techniques,
    merge_item_scores, merge_methodology_trace, merge_partial_states, merge_techniques_used,
};
pub use scoring::{
    adjust_score_by_confidence, apply_confidence_adjustment_to_scores,
    calculate_exclusion_normalized_score, calculate_exclusion_normalized_score_for,
    classify_item_status, is_information_absent, score_evaluation, ScoreSummary,
    TOTAL_RUBRIC_ITEMS,
};
pub use telemetry::init_tracing;
pub use worker::{
    CategoryRun, CategoryWorker, ConcurrencyPolicy, FnTechniqueRunner, TechniqueRunner,
};

/// repograde version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

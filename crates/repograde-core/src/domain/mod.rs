//! Domain models for repograde.
//!
//! Canonical definitions for the entities that flow through an evaluation:
//! - `ItemScore`: one rubric item's score as produced by a technique
//! - `TraceEvent`: append-only methodology trace
//! - `TechniqueOutcome`: immutable result of one technique run
//! - `PartialEvaluationState` / `EvaluationState`: branch-local and global state
//! - `ProgressEvent`: ephemeral progress notification

pub mod error;
pub mod item;
pub mod outcome;
pub mod progress;
pub mod state;
pub mod trace;

pub use error::{ChannelError, TechniqueError};
pub use item::{Confidence, ItemScore, ItemStatus};
pub use outcome::{EvaluationContext, TechniqueOutcome, TokenUsage};
pub use progress::{EventType, ProgressEvent, HEARTBEAT_PROGRESS};
pub use state::{
    AgentContribution, CategoryNotice, CategoryResult, EvaluationState, ExcludedTechnique,
    PartialEvaluationState, TechniqueFailure,
};
pub use trace::TraceEvent;

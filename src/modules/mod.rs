//! Cross-cutting services module
//!
//! Event dispatch and metrics shared by every attempt a client runs.

pub mod events;
pub mod metrics;

pub use events::{
    AttemptEvent, AttemptStage, ErrorEvent, EventDispatcher, EventHandler, LoggingHandler,
    MetricsHandler, OutcomeEvent, PostResponseEvent, PreRequestEvent,
};
pub use metrics::{MetricsCollector, MetricsSnapshot, StageStats};

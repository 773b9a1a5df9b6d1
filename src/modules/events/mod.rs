//! Event system for rollcall attempts.
//!
//! Provides hooks for metrics, logging, and custom reactions around each
//! network exchange and attempt verdict. Handlers are injected into the
//! client at construction time; nothing here is process-global.

use chrono::{DateTime, Utc};
use http::Method;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use super::metrics::MetricsCollector;
use crate::portal::core::RollcallOutcome;

/// Network step of an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttemptStage {
    Fetch,
    Login,
    Refresh,
}

impl AttemptStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStage::Fetch => "fetch",
            AttemptStage::Login => "login",
            AttemptStage::Refresh => "refresh",
        }
    }
}

impl fmt::Display for AttemptStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured pre-request event.
#[derive(Debug, Clone)]
pub struct PreRequestEvent {
    pub username: String,
    pub stage: AttemptStage,
    pub url: Url,
    pub method: Method,
    pub timestamp: DateTime<Utc>,
}

/// Structured post-response event.
#[derive(Debug, Clone)]
pub struct PostResponseEvent {
    pub username: String,
    pub stage: AttemptStage,
    pub url: Url,
    pub method: Method,
    pub status: u16,
    pub latency: Duration,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct OutcomeEvent {
    pub username: String,
    pub outcome: RollcallOutcome,
    pub message: String,
    pub elapsed: Duration,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ErrorEvent {
    pub username: String,
    pub stage: Option<AttemptStage>,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum AttemptEvent {
    PreRequest(PreRequestEvent),
    PostResponse(PostResponseEvent),
    Outcome(OutcomeEvent),
    Error(ErrorEvent),
}

/// Trait implemented by event handlers.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &AttemptEvent);
}

/// Dispatcher that broadcasts events to registered handlers.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self { handlers: Vec::new() }
    }

    pub fn register_handler(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    pub fn dispatch(&self, event: AttemptEvent) {
        for handler in &self.handlers {
            handler.handle(&event);
        }
    }
}

/// Logs events using the `log` crate.
#[derive(Debug)]
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn handle(&self, event: &AttemptEvent) {
        match event {
            AttemptEvent::PreRequest(pre) => {
                log::debug!("[{}] {} -> {} {}", pre.username, pre.stage, pre.method, pre.url);
            }
            AttemptEvent::PostResponse(post) => {
                log::debug!(
                    "[{}] {} <- {} {} -> {} ({:.2}s)",
                    post.username,
                    post.stage,
                    post.method,
                    post.url,
                    post.status,
                    post.latency.as_secs_f64()
                );
            }
            AttemptEvent::Outcome(outcome) => {
                log::info!(
                    "[{}] rollcall {} in {:.2}s: {}",
                    outcome.username,
                    outcome.outcome,
                    outcome.elapsed.as_secs_f64(),
                    outcome.message
                );
            }
            AttemptEvent::Error(error) => match error.stage {
                Some(stage) => log::warn!("[{}] {} failed: {}", error.username, stage, error.error),
                None => log::warn!("[{}] attempt failed: {}", error.username, error.error),
            },
        }
    }
}

/// Metrics handler that feeds the metrics collector.
#[derive(Clone, Debug)]
pub struct MetricsHandler {
    metrics: MetricsCollector,
}

impl MetricsHandler {
    pub fn new(metrics: MetricsCollector) -> Self {
        Self { metrics }
    }
}

impl EventHandler for MetricsHandler {
    fn handle(&self, event: &AttemptEvent) {
        match event {
            AttemptEvent::PostResponse(post) => {
                self.metrics
                    .record_response(post.stage, post.status, post.latency);
            }
            AttemptEvent::Outcome(outcome) => {
                self.metrics.record_outcome(outcome.outcome, outcome.elapsed);
            }
            AttemptEvent::Error(error) => {
                self.metrics.record_error(error.stage);
            }
            AttemptEvent::PreRequest(_) => {}
        }
    }
}

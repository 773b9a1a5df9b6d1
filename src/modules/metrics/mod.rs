//! Metrics collection utilities.
//!
//! Aggregates attempt verdicts and per-stage request latency (average and
//! p95 over a sliding window) for observability.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::events::AttemptStage;
use crate::portal::core::RollcallOutcome;

/// Stage-scoped request statistics.
#[derive(Debug, Clone)]
pub struct StageStats {
    pub stage: AttemptStage,
    pub total_requests: u64,
    pub failures: u64,
    pub average_latency: Option<Duration>,
    pub p95_latency: Option<Duration>,
    pub last_status: Option<u16>,
}

impl StageStats {
    fn from_accumulator(stage: AttemptStage, acc: &StageAccumulator) -> Self {
        let (avg, p95) = acc.latency_stats();
        Self {
            stage,
            total_requests: acc.total_requests,
            failures: acc.failures,
            average_latency: avg,
            p95_latency: p95,
            last_status: acc.last_status,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub started_at: DateTime<Utc>,
    pub attempts: u64,
    pub errors: u64,
    pub outcomes: HashMap<RollcallOutcome, u64>,
    pub average_attempt_time: Option<Duration>,
    pub stages: Vec<StageStats>,
}

impl MetricsSnapshot {
    pub fn outcome_count(&self, outcome: RollcallOutcome) -> u64 {
        self.outcomes.get(&outcome).copied().unwrap_or(0)
    }

    pub fn stage(&self, stage: AttemptStage) -> Option<&StageStats> {
        self.stages.iter().find(|stats| stats.stage == stage)
    }
}

#[derive(Debug)]
struct StageAccumulator {
    total_requests: u64,
    failures: u64,
    latencies: VecDeque<Duration>,
    max_window: usize,
    last_status: Option<u16>,
}

impl StageAccumulator {
    fn new(max_window: usize) -> Self {
        Self {
            total_requests: 0,
            failures: 0,
            latencies: VecDeque::with_capacity(max_window),
            max_window,
            last_status: None,
        }
    }

    fn record(&mut self, status: u16, latency: Duration) {
        self.total_requests += 1;
        self.last_status = Some(status);

        if !(200..300).contains(&status) {
            self.failures += 1;
        }

        if self.latencies.len() == self.max_window {
            self.latencies.pop_front();
        }
        self.latencies.push_back(latency);
    }

    fn latency_stats(&self) -> (Option<Duration>, Option<Duration>) {
        if self.latencies.is_empty() {
            return (None, None);
        }
        let mut samples: Vec<_> = self.latencies.iter().cloned().collect();
        samples.sort_unstable();
        let avg = samples
            .iter()
            .map(|d| d.as_secs_f64())
            .sum::<f64>()
            / samples.len() as f64;
        let p95_index = ((samples.len() as f64 * 0.95).ceil() as usize).saturating_sub(1);
        let p95 = samples[p95_index];
        (Some(Duration::from_secs_f64(avg)), Some(p95))
    }
}

#[derive(Debug)]
struct MetricsState {
    started_at: DateTime<Utc>,
    attempts: u64,
    errors: u64,
    outcomes: HashMap<RollcallOutcome, u64>,
    average_attempt_time: Option<Duration>,
    max_window: usize,
    stages: HashMap<AttemptStage, StageAccumulator>,
}

impl MetricsState {
    fn new(max_window: usize) -> Self {
        Self {
            started_at: Utc::now(),
            attempts: 0,
            errors: 0,
            outcomes: HashMap::new(),
            average_attempt_time: None,
            max_window,
            stages: HashMap::new(),
        }
    }

    fn accumulator_mut(&mut self, stage: AttemptStage) -> &mut StageAccumulator {
        self.stages
            .entry(stage)
            .or_insert_with(|| StageAccumulator::new(self.max_window))
    }

    fn blend_attempt_time(&mut self, elapsed: Duration) {
        self.average_attempt_time = Some(match self.average_attempt_time {
            Some(avg) => {
                Duration::from_secs_f64(avg.as_secs_f64() * 0.9 + elapsed.as_secs_f64() * 0.1)
            }
            None => elapsed,
        });
    }
}

/// Thread-safe metrics collector shared by every attempt of a client.
#[derive(Clone, Debug)]
pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsState>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MetricsState::new(128))),
        }
    }

    pub fn with_window(window: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MetricsState::new(window.max(16)))),
        }
    }

    pub fn record_response(&self, stage: AttemptStage, status: u16, latency: Duration) {
        let mut guard = self.inner.lock().expect("metrics lock poisoned");
        guard.accumulator_mut(stage).record(status, latency);
    }

    pub fn record_outcome(&self, outcome: RollcallOutcome, elapsed: Duration) {
        let mut guard = self.inner.lock().expect("metrics lock poisoned");
        guard.attempts += 1;
        *guard.outcomes.entry(outcome).or_insert(0) += 1;
        guard.blend_attempt_time(elapsed);
    }

    /// Attempt aborted with an error; `stage` is the step that failed, if any.
    pub fn record_error(&self, stage: Option<AttemptStage>) {
        let mut guard = self.inner.lock().expect("metrics lock poisoned");
        guard.attempts += 1;
        guard.errors += 1;
        if let Some(stage) = stage {
            let acc = guard.accumulator_mut(stage);
            acc.total_requests += 1;
            acc.failures += 1;
            acc.last_status = None;
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let guard = self.inner.lock().expect("metrics lock poisoned");
        let mut stages: Vec<_> = guard
            .stages
            .iter()
            .map(|(stage, acc)| StageStats::from_accumulator(*stage, acc))
            .collect();
        stages.sort_by_key(|stats| stats.stage.as_str());

        MetricsSnapshot {
            started_at: guard.started_at,
            attempts: guard.attempts,
            errors: guard.errors,
            outcomes: guard.outcomes.clone(),
            average_attempt_time: guard.average_attempt_time,
            stages,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

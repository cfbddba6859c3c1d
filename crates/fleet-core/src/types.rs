//! Shared types used across fleetscale crates.

use serde::{Deserialize, Serialize};

/// Unique identifier for a worker in the pool (e.g. `app3`).
pub type WorkerId = String;

// ── Metrics ───────────────────────────────────────────────────────

/// One complete point-in-time sample for a worker.
///
/// A sample only exists once every field has been observed; a worker
/// that has never reported carries `None` instead of a sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorkerMetrics {
    /// CPU usage, percent of the host.
    pub cpu_percent: f64,
    /// Memory usage, percent of the worker's limit.
    pub memory_usage_percent: f64,
    /// Inbound traffic in bytes.
    pub inbound_traffic: f64,
    /// Outbound traffic in bytes.
    pub outbound_traffic: f64,
    /// Threads currently serving a request.
    pub busy_worker_threads: u32,
    /// Mean request processing time in milliseconds.
    pub avg_request_processing_ms: u64,
}

// ── Lifecycle ─────────────────────────────────────────────────────

/// Lifecycle phase of a worker.
///
/// ```text
/// Active ──(selected for scale-down)──> Draining ──(drained)──> Removed
/// ```
///
/// `Removed` is terminal and a draining worker never becomes active again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePhase {
    /// Routed to by the load balancer and scored every cycle.
    Active,
    /// Unrouted but still running until its in-flight work finishes.
    Draining,
    /// Instance destroyed; the record is purged from the pool.
    Removed,
}

/// Per-worker scaling hint derived from its score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleFlag {
    /// Score above the scale-up threshold.
    Up,
    /// Score below the scale-down threshold.
    Down,
    /// Healthy band, no action wanted.
    #[default]
    Neutral,
}

// ── Worker ────────────────────────────────────────────────────────

/// Controller-side state for one worker.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerRecord {
    pub id: WorkerId,
    /// Port the load balancer forwards to. Fixed for the record's lifetime.
    pub route_port: u16,
    /// Last complete sample, `None` until the worker first reports.
    pub metrics: Option<WorkerMetrics>,
    /// Load score from the last scoring pass (higher = more loaded).
    pub score: f64,
    /// Share of traffic in percent.
    pub weight: f64,
    pub flag: ScaleFlag,
    pub phase: LifecyclePhase,
}

impl WorkerRecord {
    /// A freshly created, active worker with no metrics yet.
    pub fn new(id: impl Into<WorkerId>, route_port: u16, weight: f64) -> Self {
        Self {
            id: id.into(),
            route_port,
            metrics: None,
            score: 0.0,
            weight,
            flag: ScaleFlag::Neutral,
            phase: LifecyclePhase::Active,
        }
    }

    pub fn is_active(&self) -> bool {
        self.phase == LifecyclePhase::Active
    }

    pub fn is_draining(&self) -> bool {
        self.phase == LifecyclePhase::Draining
    }

    pub fn is_removed(&self) -> bool {
        self.phase == LifecyclePhase::Removed
    }

    pub fn scale_up_flag(&self) -> bool {
        self.flag == ScaleFlag::Up
    }

    pub fn scale_down_flag(&self) -> bool {
        self.flag == ScaleFlag::Down
    }

    /// Stop routing to this worker. Only an active worker can start draining.
    pub fn start_draining(&mut self) -> bool {
        if self.phase != LifecyclePhase::Active {
            return false;
        }
        self.phase = LifecyclePhase::Draining;
        true
    }

    /// Terminal transition, allowed from any phase.
    pub fn mark_removed(&mut self) {
        self.phase = LifecyclePhase::Removed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_record_is_active_and_unset() {
        let record = WorkerRecord::new("app1", 8011, 100.0);
        assert!(record.is_active());
        assert!(record.metrics.is_none());
        assert!(!record.scale_up_flag());
        assert!(!record.scale_down_flag());
    }

    #[test]
    fn draining_is_one_way() {
        let mut record = WorkerRecord::new("app1", 8011, 100.0);
        assert!(record.start_draining());
        assert!(record.is_draining());

        // A second request is a no-op, never back to active.
        assert!(!record.start_draining());
        assert!(record.is_draining());

        record.mark_removed();
        assert!(record.is_removed());
        assert!(!record.start_draining());
        assert!(record.is_removed());
    }
}

//! fleetscale-metrics — per-worker samples for the control loop.
//!
//! Each worker publishes a small stats feed. The controller reads one
//! complete sample per worker per cycle through a `MetricsSource`,
//! waiting a bounded amount of time for workers that have not reported.
//!
//! # Architecture
//!
//! ```text
//! SamplePoller::collect(source, worker)
//!   ├── MetricsSource::sample() → Option<WorkerMetrics>   (poll)
//!   ├── fixed retry_interval sleep between polls
//!   └── SampleError::Timeout after sample_timeout
//!
//! FileMetricsSource
//!   └── <dir>/<worker_id> → parse_sample() → WorkerMetrics
//! ```

pub mod error;
pub mod poller;
pub mod source;

pub use error::{SampleError, SampleResult};
pub use poller::SamplePoller;
pub use source::{FileMetricsSource, MetricsSource, parse_sample};

//! fleetscale-autoscale — score-driven worker pool scaling.
//!
//! Samples every worker, turns the sample into a load score, and decides
//! once per cycle whether the pool should grow or shrink. Traffic weights
//! are the normalized inverse of the scores, so lightly loaded workers
//! receive more traffic.
//!
//! # Scaling Algorithm
//!
//! ```text
//! score  = X * (mem% + cpu%) / 2 + Y * busy / 4 + Z * proc_ms / max_ms
//! flag   = Up if score > scale_up, Down if score < scale_down
//! weight = (1 / score) / Σ(1 / score) * 100      (active workers only)
//!
//! if up_flags > active / 2 or mean(score) > scale_up_average:
//!     create one worker, seeded with the highest current weight
//!
//! if down_flags > active / 2 and active > 1:
//!     lowest-score worker → Draining
//!
//! Draining worker with busy < drain_safe → remove instance → Removed
//! ```
//!
//! Each cycle ends by publishing the routing table if it changed.

pub mod controller;
pub mod score;

pub use controller::{CycleReport, FleetController, initial_pool};
pub use score::{ScoringEngine, derive_flag, inverse_weights, load_score};

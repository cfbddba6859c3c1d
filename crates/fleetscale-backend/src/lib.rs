//! fleetscale-backend — worker instance lifecycle.
//!
//! The controller never talks to a virtualization layer directly. It
//! holds a `WorkerPoolBackend` and asks it to create, remove and list
//! named instances. `ContainerCliBackend` implements the trait on top of
//! a docker-compatible command line.

pub mod backend;
pub mod container;
pub mod error;

pub use backend::{PortMapping, WorkerInstance, WorkerPoolBackend, WorkerSpec};
pub use container::ContainerCliBackend;
pub use error::{BackendError, BackendResult};

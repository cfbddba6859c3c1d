//! fleetscale-proxy — load balancer routing table.
//!
//! Turns the controller's active workers into a weighted routing table,
//! renders it as a complete HAProxy config and publishes it.
//!
//! # Components
//!
//! - **`table`**: `RoutingTable` built from worker records, HAProxy rendering
//! - **`writer`**: `RouteTableWriter` trait and `HaproxyWriter`
//!   (temp file + rename, then reload command)
//! - **`sync`**: `RouteSync`, republishes only when the rendered text changes

pub mod error;
pub mod sync;
pub mod table;
pub mod writer;

pub use error::{ProxyError, ProxyResult};
pub use sync::{RouteSync, SyncStats};
pub use table::{RouteEntry, RoutingTable, default_header};
pub use writer::{HaproxyWriter, RouteTableWriter};

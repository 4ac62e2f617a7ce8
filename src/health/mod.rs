//! Health aggregation subsystem.
//!
//! # Data Flow
//! ```text
//! Probes (probe.rs):
//!     tcp / http / exec / none per role, plus the tunnel probe
//!
//! Aggregation (aggregator.rs):
//!     Periodic timer
//!     → Snapshot role states from the supervisor
//!     → Run every probe concurrently, each bounded by the probe timeout
//!     → Compose HealthStatus (status.rs), publish overall-ready
//!
//! Endpoint (server.rs):
//!     GET /health → latest HealthStatus, 200 or 503
//! ```
//!
//! # Design Decisions
//! - Overall-ready = tunnel ready AND every required role ready
//! - A probe that overruns its timeout counts as not-ready for that cycle
//! - Consumers read the last computed status; they never trigger probes

pub mod aggregator;
pub mod probe;
pub mod server;
pub mod status;

pub use aggregator::{HealthAggregator, HealthError};
pub use probe::ReadinessProbe;
pub use server::HealthServer;
pub use status::{HealthStatus, RoleHealth};

//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (restart counters, role/tunnel/ready gauges)
//!
//! Consumers:
//!     → stdout (pretty for development, JSON for production)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Every event carries role/interface fields, never key material
//! - Metrics are cheap (no-ops until a recorder is installed)

pub mod logging;
pub mod metrics;

//! Process supervision subsystem.
//!
//! # Data Flow
//! ```text
//! Registration (supervisor.rs):
//!     ServiceRole → register → Pending
//!
//! Start (supervisor.rs → monitor.rs):
//!     start(role)
//!     → wait until every dependency is Ready (bounded)
//!     → spawn monitor task → Starting
//!     → probe until ready → Ready
//!
//! Exit (monitor.rs → restart.rs):
//!     child exits → RestartTracker decides
//!     → restart after backoff | Stopped | Failed
//!
//! Observation:
//!     every state change → watch (per role) + broadcast (observe())
//! ```
//!
//! # Design Decisions
//! - One monitor task per started role owns that role's process handle
//! - Registration closes at the first `start`, so the dependency graph is fixed
//! - Stopping is sequential in reverse start order

mod monitor;
pub mod handle;
pub mod order;
pub mod restart;
pub mod role;
#[allow(clippy::module_inception)]
mod supervisor;

pub use handle::{ProcessHandle, ProcessState};
pub use order::{topological_order, OrderError};
pub use restart::{RestartDecision, RestartLimits, RestartTracker};
pub use role::{LogSink, RestartPolicy, ServiceRole};
pub use supervisor::{ProcessSupervisor, SupervisorError, SupervisorSettings};

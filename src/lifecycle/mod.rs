//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Controller (controller.rs):
//!     Secrets → Tunnel → Services → Running → Draining → Stopped
//!
//! Shutdown (shutdown.rs):
//!     Drain finished → stop health aggregator and endpoint
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → drain; repeated → escalate to SIGKILL
//! ```
//!
//! # Design Decisions
//! - Ordered startup: secrets first, then tunnel, then roles by dependency
//! - Ordered shutdown: roles in reverse start order, then the tunnel
//! - Exit codes distinguish configuration, tunnel and restart-budget failures (error.rs)

pub mod controller;
pub mod error;
pub mod shutdown;
pub mod signals;
pub mod state;

pub use controller::{LifecycleController, RunOutcome};
pub use error::{ErrorKind, ErrorReport, ExitCode, StartupError};
pub use shutdown::Shutdown;
pub use signals::{spawn_signal_listener, TerminationSignal};
pub use state::LifecycleState;

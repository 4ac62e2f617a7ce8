//! Tunnel supervisor library.
//!
//! Brings up an authenticated WireGuard tunnel, then starts and supervises a
//! small set of interdependent service processes behind it.

// Core subsystems
pub mod config;
pub mod secrets;
pub mod supervisor;
pub mod tunnel;

// Readiness and orchestration
pub mod health;
pub mod lifecycle;

// Cross-cutting concerns
pub mod observability;
pub mod resilience;

pub use config::schema::SupervisorConfig;
pub use lifecycle::{LifecycleController, RunOutcome};

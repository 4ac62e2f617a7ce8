//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Role process exits:
//!     → supervisor restart policy decides whether to restart
//!     → backoff.rs computes the delay before the next spawn
//!
//! Tunnel handshake times out:
//!     → lifecycle controller retries bring-up
//!     → backoff.rs computes the delay before the next attempt
//! ```
//!
//! # Design Decisions
//! - One backoff curve for every retry loop in the process
//! - Jitter is applied on top of the capped delay, never below the base

pub mod backoff;

pub use backoff::Backoff;

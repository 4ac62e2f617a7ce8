//! Secure tunnel subsystem.
//!
//! # Data Flow
//! ```text
//! TunnelConfig (key references) + CredentialSet (key values)
//!     → manager.rs bring_up
//!         → driver.rs: create link, install keys, peer, address, routes
//!         → credentials dropped (zeroized)
//!         → reachability: wait for handshake, optional TCP connect through tunnel
//!     → TunnelHandle (status flag shared with the health aggregator)
//!
//! Shutdown:
//!     → manager.rs tear_down (idempotent): remove routes, delete link
//! ```
//!
//! # Design Decisions
//! - Link operations sit behind LinkDriver so the manager is testable without CAP_NET_ADMIN
//! - Key material reaches `wg` over stdin; never argv, never disk
//! - No retry inside the manager; the lifecycle controller owns retry policy
//! - A failed bring-up removes whatever it created

pub mod config;
pub mod driver;
pub mod error;
pub mod manager;

pub use config::TunnelConfig;
pub use driver::{DryRunDriver, LinkDriver, PeerSpec, WgCommandDriver};
pub use error::TunnelError;
pub use manager::{TunnelHandle, TunnelManager, TunnelProbe};

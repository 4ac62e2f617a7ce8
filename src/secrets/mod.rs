//! Secret resolution subsystem.
//!
//! # Data Flow
//! ```text
//! ENVIRONMENT (dev | prod)
//!     → resolver.rs (look up the environment's variable pair, validate)
//!     → CredentialSet (values held in SecretString)
//!     → tunnel manager consumes each credential exactly once
//!     → values zeroized on drop once the interface is configured
//! ```
//!
//! # Design Decisions
//! - Single narrow path from the configuration source to the tunnel
//! - Values are never formatted: Debug prints [REDACTED], errors name only the variable
//! - Logs carry the environment tag and a success flag, nothing else

pub mod credential;
pub mod resolver;

pub use credential::{Credential, CredentialKind, CredentialSet, Environment, SecretError, SecretRef};
pub use resolver::{EnvSource, SecretResolver, SecretSource, StaticSource};

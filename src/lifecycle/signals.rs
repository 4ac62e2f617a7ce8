//! OS signal handling.
//!
//! # Responsibilities
//! - Register handlers for SIGTERM and SIGINT
//! - Forward every delivery to the lifecycle controller
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - The first signal drains; any further signal escalates (decided by the controller)

use std::fmt;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;

/// A signal asking the supervisor to shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationSignal {
    Terminate,
    Interrupt,
}

impl fmt::Display for TerminationSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TerminationSignal::Terminate => "SIGTERM",
            TerminationSignal::Interrupt => "SIGINT",
        })
    }
}

/// Install handlers and return a channel of received signals.
pub fn spawn_signal_listener() -> std::io::Result<mpsc::UnboundedReceiver<TerminationSignal>> {
    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            let received = tokio::select! {
                Some(()) = terminate.recv() => TerminationSignal::Terminate,
                Some(()) = interrupt.recv() => TerminationSignal::Interrupt,
                else => break,
            };

            tracing::info!(signal = %received, "Termination signal received");
            if tx.send(received).is_err() {
                break;
            }
        }
    });

    Ok(rx)
}

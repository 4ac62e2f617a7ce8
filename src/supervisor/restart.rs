//! Restart decisions and the rolling restart budget.
//!
//! # Design Decisions
//! - The budget counts restarts, not crashes: with a budget of 5 the sixth
//!   crash inside the window is final and no sixth restart happens
//! - `always` roles restart on every exit and are not budgeted, but still
//!   back off so a crash loop cannot spin
//! - A process that stayed ready for `healthy_reset` starts the backoff over;
//!   time spent starting but never ready does not count

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::config::RestartConfig;
use crate::resilience::Backoff;
use crate::supervisor::role::RestartPolicy;

/// What to do after a process exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    /// Respawn after the delay.
    Restart(Duration),
    /// Leave the role stopped; the exit was expected.
    Finish,
    /// Mark the role permanently failed.
    GiveUp,
}

/// Restart settings shared by every role.
#[derive(Debug, Clone, Copy)]
pub struct RestartLimits {
    pub backoff: Backoff,
    pub healthy_reset: Duration,
    pub max_restarts: u32,
    pub window: Duration,
}

impl RestartLimits {
    pub fn from_config(config: &RestartConfig) -> Self {
        Self {
            backoff: Backoff::from_millis(config.backoff_base_ms, config.backoff_cap_ms),
            healthy_reset: Duration::from_secs(config.healthy_reset_secs),
            max_restarts: config.max_restarts,
            window: Duration::from_secs(config.window_secs),
        }
    }
}

impl Default for RestartLimits {
    fn default() -> Self {
        Self::from_config(&RestartConfig::default())
    }
}

/// Per-role restart history.
#[derive(Debug)]
pub struct RestartTracker {
    limits: RestartLimits,
    recent: VecDeque<Instant>,
    attempt: u32,
}

impl RestartTracker {
    pub fn new(limits: RestartLimits) -> Self {
        Self {
            limits,
            recent: VecDeque::new(),
            attempt: 0,
        }
    }

    /// Decide what happens after an exit.
    ///
    /// `ready_for` is how long the instance was ready before it exited, `None`
    /// if it never became ready; `now` anchors the rolling window.
    pub fn on_exit(
        &mut self,
        policy: RestartPolicy,
        success: bool,
        ready_for: Option<Duration>,
        now: Instant,
    ) -> RestartDecision {
        if ready_for.is_some_and(|ready_for| ready_for >= self.limits.healthy_reset) {
            self.attempt = 0;
        }

        match policy {
            RestartPolicy::Never if success => RestartDecision::Finish,
            RestartPolicy::Never => RestartDecision::GiveUp,
            RestartPolicy::OnFailure if success => RestartDecision::Finish,
            RestartPolicy::OnFailure => {
                self.prune(now);
                if self.recent.len() as u32 >= self.limits.max_restarts {
                    return RestartDecision::GiveUp;
                }
                self.recent.push_back(now);
                RestartDecision::Restart(self.next_delay())
            }
            RestartPolicy::Always => RestartDecision::Restart(self.next_delay()),
        }
    }

    /// Restarts counted inside the current window.
    pub fn restarts_in_window(&mut self, now: Instant) -> usize {
        self.prune(now);
        self.recent.len()
    }

    fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        self.limits.backoff.delay_with_jitter(self.attempt)
    }

    fn prune(&mut self, now: Instant) {
        while let Some(&oldest) = self.recent.front() {
            if now.saturating_duration_since(oldest) >= self.limits.window {
                self.recent.pop_front();
            } else {
                break;
            }
        }
    }
}

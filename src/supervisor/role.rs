//! Service role definitions.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{LogSinkConfig, RoleConfig};
use crate::health::probe::{self, ReadinessProbe};

pub use crate::config::RestartPolicy;

/// Where a child's stdout and stderr are written.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LogSink {
    /// Share the supervisor's streams.
    #[default]
    Inherit,
    /// Discard output.
    Null,
    /// Append to a file.
    File(PathBuf),
}

impl From<&LogSinkConfig> for LogSink {
    fn from(config: &LogSinkConfig) -> Self {
        match config {
            LogSinkConfig::Inherit => LogSink::Inherit,
            LogSinkConfig::Null => LogSink::Null,
            LogSinkConfig::File { path } => LogSink::File(PathBuf::from(path)),
        }
    }
}

/// A supervised service: what to run, what it needs, how to tell it is ready.
#[derive(Clone)]
pub struct ServiceRole {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    pub depends_on: Vec<String>,
    pub restart: RestartPolicy,
    pub probe: Arc<dyn ReadinessProbe>,
    pub log: LogSink,
    /// Dependency failures skip this role instead of aborting startup.
    pub optional: bool,
    /// Overrides the supervisor-wide grace period.
    pub grace_period: Option<Duration>,
}

impl ServiceRole {
    /// A role with no dependencies, no probe and the default restart policy.
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            working_dir: None,
            env: BTreeMap::new(),
            depends_on: Vec::new(),
            restart: RestartPolicy::default(),
            probe: Arc::new(probe::AlwaysReady),
            log: LogSink::Inherit,
            optional: false,
            grace_period: None,
        }
    }

    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn depends_on(mut self, role: impl Into<String>) -> Self {
        self.depends_on.push(role.into());
        self
    }

    pub fn restart(mut self, policy: RestartPolicy) -> Self {
        self.restart = policy;
        self
    }

    pub fn probe(mut self, probe: Arc<dyn ReadinessProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn log(mut self, sink: LogSink) -> Self {
        self.log = sink;
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }

    pub fn grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = Some(grace);
        self
    }
}

impl From<&RoleConfig> for ServiceRole {
    fn from(config: &RoleConfig) -> Self {
        Self {
            name: config.name.clone(),
            command: config.command.clone(),
            args: config.args.clone(),
            working_dir: config.working_dir.as_ref().map(PathBuf::from),
            env: config.env.clone(),
            depends_on: config.depends_on.clone(),
            restart: config.restart,
            probe: probe::from_config(&config.probe),
            log: LogSink::from(&config.log),
            optional: config.optional,
            grace_period: config.grace_period_secs.map(Duration::from_secs),
        }
    }
}

impl fmt::Debug for ServiceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRole")
            .field("name", &self.name)
            .field("command", &self.command)
            .field("args", &self.args)
            .field("depends_on", &self.depends_on)
            .field("restart", &self.restart)
            .field("probe", &self.probe.describe())
            .field("optional", &self.optional)
            .finish()
    }
}

// Executor module - fleet command execution engine

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::inventory::Device;

pub mod command;
pub mod orchestrator;
pub mod pipeline;
pub mod retry;
pub mod ssh;

pub use command::{CommandExecutor, ExecOutcome, DEFAULT_DEADLINE_GRACE};
pub use orchestrator::{DeviceReport, Orchestrator, OrchestratorConfig, RunReport};
pub use pipeline::DevicePipeline;
pub use retry::{RetryController, RetryPolicy, SessionEvent, SessionState, TransitionError};
pub use ssh::{SshConnector, SshSession};

/// Failure to establish an authenticated session
#[derive(Debug, Clone, Error)]
pub enum ConnectError {
    #[error("Authentication failed when connecting to {user}@{host}")]
    Auth { host: String, user: String },

    #[error("Could not establish SSH connection to {host}: {message}")]
    Connection { host: String, message: String },

    #[error("Connecting to {host} timed out after {}s", .timeout.as_secs())]
    Timeout { host: String, timeout: Duration },
}

/// Failure of a single remote command at the transport level
#[derive(Debug, Clone, Error)]
pub enum ShellError {
    #[error("Command timed out after {} seconds", .0.as_secs_f64())]
    TimedOut(Duration),

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Session is closed")]
    Closed,
}

/// Captured result of a command that ran to completion
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    /// Remote side reported something on stderr
    pub fn has_stderr(&self) -> bool {
        !self.stderr.trim().is_empty()
    }
}

/// One authenticated remote shell owned by a single pipeline
#[async_trait]
pub trait RemoteShell: Send {
    /// Run `command`, giving up once `timeout` has elapsed
    ///
    /// On timeout the command's channel is closed before `TimedOut` is returned.
    async fn exec(&mut self, command: &str, timeout: Duration)
        -> Result<CommandOutput, ShellError>;

    /// Tear the session down; calling it again is a no-op
    async fn close(&mut self);

    fn is_open(&self) -> bool;

    fn host_name(&self) -> &str;
}

/// Opens sessions to devices
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Session: RemoteShell + 'static;

    /// Open and authenticate one session; no retries at this layer
    async fn connect(&self, device: &Device, timeout: Duration)
        -> Result<Self::Session, ConnectError>;
}

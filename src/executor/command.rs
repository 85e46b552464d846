// Timeout-bounded command execution

use std::time::Duration;

use tracing::debug;

use super::{CommandOutput, RemoteShell, ShellError};

/// How a single remote command ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecOutcome {
    /// The command finished; stderr may still be non-empty
    Completed(CommandOutput),
    /// No completion within the allotted time; the command is abandoned
    TimedOut { after: Duration },
    /// The transport failed while the command was in flight
    ConnectionLost(String),
}

impl ExecOutcome {
    /// The session that produced this outcome can no longer be trusted
    pub fn needs_reconnect(&self) -> bool {
        !matches!(self, ExecOutcome::Completed(_))
    }
}

/// Extra time a session gets past its own deadline to release the command
pub const DEFAULT_DEADLINE_GRACE: Duration = Duration::from_secs(5);

/// Runs one command on a session under a deadline
#[derive(Debug, Clone, Copy)]
pub struct CommandExecutor {
    grace: Duration,
}

impl Default for CommandExecutor {
    fn default() -> Self {
        CommandExecutor {
            grace: DEFAULT_DEADLINE_GRACE,
        }
    }
}

impl CommandExecutor {
    pub fn new() -> Self {
        CommandExecutor::default()
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Run `command` and classify the result
    ///
    /// The session's own deadline is authoritative: it closes the command's
    /// channel before reporting a timeout. The timer here only fires `grace`
    /// later, for a transport that never returns at all.
    pub async fn run<S>(&self, session: &mut S, command: &str, timeout: Duration) -> ExecOutcome
    where
        S: RemoteShell + ?Sized,
    {
        debug!(host = %session.host_name(), command, timeout_secs = timeout.as_secs_f64(), "executing");

        let backstop = timeout.saturating_add(self.grace);
        match tokio::time::timeout(backstop, session.exec(command, timeout)).await {
            Ok(Ok(output)) => ExecOutcome::Completed(output),
            Ok(Err(ShellError::TimedOut(_))) | Err(_) => ExecOutcome::TimedOut { after: timeout },
            Ok(Err(ShellError::ConnectionLost(message))) => ExecOutcome::ConnectionLost(message),
            Ok(Err(ShellError::Closed)) => {
                ExecOutcome::ConnectionLost(ShellError::Closed.to_string())
            }
        }
    }
}

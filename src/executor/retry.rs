// Connection retry and reconnect-resume state machine
//
// Initial connection gets a bounded number of attempts with a fixed backoff.
// Once a command times out or its connection drops, the stale session is closed
// and exactly one reconnect is attempted; a failed reconnect is terminal.

use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use super::command::ExecOutcome;
use super::pipeline::PipelineError;
use super::{Connector, RemoteShell};
use crate::inventory::Device;
use crate::output::DeviceLog;

/// Where a device's session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Connected,
    Executing,
    TimedOut,
    ConnectionLost,
    Reconnecting,
    /// Terminal: no session and none will be attempted
    Failed,
}

/// Inputs that move the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Established,
    ConnectExhausted,
    CommandIssued,
    CommandCompleted,
    CommandTimedOut,
    ConnectionDropped,
    ReconnectStarted,
    Reconnected,
    ReconnectFailed,
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("invalid session transition from {from:?} on {event:?}")]
pub struct TransitionError {
    pub from: SessionState,
    pub event: SessionEvent,
}

impl SessionState {
    /// Apply `event`, rejecting anything the lifecycle does not allow
    pub fn on(self, event: SessionEvent) -> Result<SessionState, TransitionError> {
        use SessionEvent as E;
        use SessionState as S;

        let next = match (self, event) {
            (S::Connecting, E::Established) => S::Connected,
            (S::Connecting, E::ConnectExhausted) => S::Failed,
            (S::Connected, E::CommandIssued) => S::Executing,
            (S::Executing, E::CommandCompleted) => S::Connected,
            (S::Executing, E::CommandTimedOut) => S::TimedOut,
            (S::Executing, E::ConnectionDropped) => S::ConnectionLost,
            (S::TimedOut | S::ConnectionLost, E::ReconnectStarted) => S::Reconnecting,
            (S::Reconnecting, E::Reconnected) => S::Connected,
            (S::Reconnecting, E::ReconnectFailed) => S::Failed,
            (from, event) => return Err(TransitionError { from, event }),
        };

        Ok(next)
    }

    pub fn is_failed(self) -> bool {
        self == SessionState::Failed
    }
}

/// Limits for establishing sessions
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts for the initial connection (at least one is always made)
    pub connect_attempts: u32,
    /// Fixed delay between initial connection attempts
    pub backoff: Duration,
    /// Limit for a single connection attempt
    pub connect_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            connect_attempts: 3,
            backoff: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Drives one device's session through connect, timeout and reconnect
pub struct RetryController<'a, C: Connector> {
    connector: &'a C,
    device: &'a Device,
    policy: RetryPolicy,
    state: SessionState,
}

impl<'a, C: Connector> RetryController<'a, C> {
    pub fn new(connector: &'a C, device: &'a Device, policy: RetryPolicy) -> Self {
        RetryController {
            connector,
            device,
            policy,
            state: SessionState::Connecting,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, event: SessionEvent) -> Result<(), TransitionError> {
        self.state = self.state.on(event)?;
        Ok(())
    }

    /// Open the first session, retrying with a fixed backoff
    ///
    /// `Ok(None)` means every attempt failed and the device is now `Failed`.
    pub async fn establish(
        &mut self,
        log: &mut DeviceLog,
    ) -> Result<Option<C::Session>, PipelineError> {
        let connector = self.connector;
        let device = self.device;
        let host = device.hostname.as_str();
        let attempts = self.policy.connect_attempts.max(1);

        for attempt in 1..=attempts {
            match connector.connect(device, self.policy.connect_timeout).await {
                Ok(session) => {
                    self.transition(SessionEvent::Established)?;
                    log.note(format!("Connected to {}", host))?;
                    info!(host, attempt, "connected");
                    return Ok(Some(session));
                }
                Err(e) => {
                    log.note(format!("Connection attempt {}/{} failed: {}", attempt, attempts, e))?;
                    warn!(host, attempt, error = %e, "connection attempt failed");
                    if attempt < attempts {
                        tokio::time::sleep(self.policy.backoff).await;
                    }
                }
            }
        }

        self.transition(SessionEvent::ConnectExhausted)?;
        log.note(format!("Failed to connect to {}", host))?;
        Ok(None)
    }

    /// Record that a command is about to be sent
    pub fn begin_command(&mut self) -> Result<(), TransitionError> {
        self.transition(SessionEvent::CommandIssued)
    }

    /// Record how the in-flight command ended
    pub fn observe(&mut self, outcome: &ExecOutcome) -> Result<(), TransitionError> {
        let event = match outcome {
            ExecOutcome::Completed(_) => SessionEvent::CommandCompleted,
            ExecOutcome::TimedOut { .. } => SessionEvent::CommandTimedOut,
            ExecOutcome::ConnectionLost(_) => SessionEvent::ConnectionDropped,
        };
        self.transition(event)
    }

    /// Replace a session that timed out or dropped
    ///
    /// The stale session is closed first. One reconnect attempt is made;
    /// `Ok(None)` means it failed and the device is now `Failed`.
    pub async fn recover(
        &mut self,
        mut stale: C::Session,
        log: &mut DeviceLog,
    ) -> Result<Option<C::Session>, PipelineError> {
        let connector = self.connector;
        let device = self.device;
        let host = device.hostname.as_str();

        if stale.is_open() {
            stale.close().await;
        }
        self.transition(SessionEvent::ReconnectStarted)?;
        log.note(format!("Reconnecting to {}...", host))?;
        info!(host, "reconnecting");

        match connector.connect(device, self.policy.connect_timeout).await {
            Ok(session) => {
                self.transition(SessionEvent::Reconnected)?;
                log.note(format!("Reconnected to {}", host))?;
                Ok(Some(session))
            }
            Err(e) => {
                self.transition(SessionEvent::ReconnectFailed)?;
                log.note(format!("Failed to reconnect to {}: {}", host, e))?;
                warn!(host, error = %e, "reconnect failed");
                Ok(None)
            }
        }
    }
}

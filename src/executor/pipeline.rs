// Per-device command pipeline

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tracing::{info, info_span, warn, Instrument};

use super::command::{CommandExecutor, ExecOutcome};
use super::retry::{RetryController, RetryPolicy, TransitionError};
use super::{Connector, RemoteShell};
use crate::inventory::Device;
use crate::output::{DeviceLog, DeviceProgress, DeviceStatus, EventEmitter, UnitStatus};
use crate::parser::{Command, CommandSequence};

/// Failures that abort a pipeline outright
///
/// Command-level problems never end up here; they are logged and absorbed.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("device log: {0}")]
    Log(#[from] io::Error),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("worker unavailable: {0}")]
    Worker(String),
}

/// Walks one device through the whole command sequence
pub struct DevicePipeline<C: Connector> {
    connector: Arc<C>,
    device: Device,
    commands: CommandSequence,
    progress: DeviceProgress,
    policy: RetryPolicy,
    log_dir: PathBuf,
    config_name: String,
    events: Option<EventEmitter>,
    executor: CommandExecutor,
}

impl<C: Connector> DevicePipeline<C> {
    pub fn new(
        connector: Arc<C>,
        device: Device,
        commands: CommandSequence,
        progress: DeviceProgress,
    ) -> Self {
        DevicePipeline {
            connector,
            device,
            commands,
            progress,
            policy: RetryPolicy::default(),
            log_dir: PathBuf::from("logs"),
            config_name: "run".to_string(),
            events: None,
            executor: CommandExecutor::new(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Where the transcript goes: `<log_dir>/<config_name>_<hostname>.log`
    pub fn with_log(mut self, log_dir: impl Into<PathBuf>, config_name: impl Into<String>) -> Self {
        self.log_dir = log_dir.into();
        self.config_name = config_name.into();
        self
    }

    pub fn with_events(mut self, events: Option<EventEmitter>) -> Self {
        self.events = events;
        self
    }

    /// Run every unit in order and report the device's final status
    pub async fn run(self) -> Result<DeviceStatus, PipelineError> {
        let span = info_span!("device", host = %self.device.hostname);
        self.run_inner().instrument(span).await
    }

    async fn run_inner(self) -> Result<DeviceStatus, PipelineError> {
        let started = Instant::now();
        let host = self.device.hostname.as_str();
        let mut log = DeviceLog::create(&self.log_dir, &self.config_name, host, self.commands.len())?;

        if let Some(ref events) = self.events {
            events.device_started(host);
        }

        let mut controller = RetryController::new(&*self.connector, &self.device, self.policy.clone());
        let mut session = controller.establish(&mut log).await?;

        for (index, command) in self.commands.iter().enumerate() {
            let status = self
                .execute_unit(index, command, &mut session, &mut controller, &mut log)
                .await?;

            self.progress.advance();
            if let Some(ref events) = self.events {
                events.unit_finished(host, index, status);
            }
        }

        if let Some(mut session) = session.take() {
            session.close().await;
            log.note(format!("Closed session to {}", host))?;
        }

        let status = if controller.state().is_failed() {
            DeviceStatus::Failed
        } else {
            DeviceStatus::Completed
        };
        log.close()?;

        let duration = started.elapsed();
        info!(?status, elapsed_ms = duration.as_millis() as u64, "device finished");
        if let Some(ref events) = self.events {
            events.device_finished(host, status, duration);
        }

        Ok(status)
    }

    /// Execute one unit and write its single unit entry
    async fn execute_unit(
        &self,
        index: usize,
        command: &Command,
        session: &mut Option<C::Session>,
        controller: &mut RetryController<'_, C>,
        log: &mut DeviceLog,
    ) -> Result<UnitStatus, PipelineError> {
        let host = self.device.hostname.as_str();

        let Some(active) = session.as_mut() else {
            log.unit(index, format!("Skipped on {}: {} (device failed)", host, command))?;
            return Ok(UnitStatus::Skipped);
        };

        let Some(text) = command.text() else {
            if command.has_sleep() {
                tokio::time::sleep(command.sleep).await;
                log.unit(index, format!("Slept for {} seconds", command.sleep.as_secs_f64()))?;
            } else {
                log.unit(index, "Nothing to execute")?;
            }
            return Ok(UnitStatus::Slept);
        };

        controller.begin_command()?;
        let outcome = self.executor.run(active, text, command.timeout).await;
        controller.observe(&outcome)?;
        let reconnect = outcome.needs_reconnect();

        let status = match outcome {
            ExecOutcome::Completed(output) if output.has_stderr() => {
                let mut entry = format!(
                    "Executed command:\n{}\nError on {}:\n{}",
                    text,
                    host,
                    output.stderr.trim_end()
                );
                if !output.stdout.trim().is_empty() {
                    entry.push_str(&format!("\nOutput on {}:\n{}", host, output.stdout.trim_end()));
                }
                log.unit(index, entry)?;
                warn!(command = text, "command wrote to stderr");
                UnitStatus::RemoteError
            }
            ExecOutcome::Completed(output) => {
                log.unit(
                    index,
                    format!(
                        "Executed command:\n{}\nOutput on {}:\n{}",
                        text,
                        host,
                        output.stdout.trim_end()
                    ),
                )?;
                UnitStatus::Ok
            }
            ExecOutcome::TimedOut { after } => {
                log.unit(
                    index,
                    format!(
                        "Timeout on {}: command '{}' timed out after {} seconds",
                        host,
                        text,
                        after.as_secs_f64()
                    ),
                )?;
                warn!(command = text, "command timed out");
                UnitStatus::TimedOut
            }
            ExecOutcome::ConnectionLost(reason) => {
                log.unit(
                    index,
                    format!("Connection lost on {} while running '{}': {}", host, text, reason),
                )?;
                warn!(command = text, %reason, "connection lost");
                UnitStatus::ConnectionLost
            }
        };

        if reconnect {
            if let Some(stale) = session.take() {
                *session = controller.recover(stale, log).await?;
            }
        }

        if command.has_sleep() && session.is_some() {
            log.note(format!("Sleeping for {} seconds", command.sleep.as_secs_f64()))?;
            tokio::time::sleep(command.sleep).await;
        }

        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{CommandOutput, ConnectError, ShellError};
    use crate::output::{parse_entries, ProgressTracker};
    use async_trait::async_trait;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Echoes the command back; `fail` makes every connect fail
    struct EchoConnector {
        fail: bool,
    }

    struct EchoShell;

    #[async_trait]
    impl RemoteShell for EchoShell {
        async fn exec(&mut self, command: &str, _: Duration) -> Result<CommandOutput, ShellError> {
            if command == "oops" {
                return Ok(CommandOutput {
                    stdout: String::new(),
                    stderr: "oops: not found".to_string(),
                    exit_code: Some(127),
                });
            }
            Ok(CommandOutput {
                stdout: format!("{}\n", command),
                stderr: String::new(),
                exit_code: Some(0),
            })
        }

        async fn close(&mut self) {}

        fn is_open(&self) -> bool {
            true
        }

        fn host_name(&self) -> &str {
            "echo"
        }
    }

    #[async_trait]
    impl Connector for EchoConnector {
        type Session = EchoShell;

        async fn connect(&self, device: &Device, _: Duration) -> Result<EchoShell, ConnectError> {
            if self.fail {
                return Err(ConnectError::Connection {
                    host: device.hostname.clone(),
                    message: "Connection refused".to_string(),
                });
            }
            Ok(EchoShell)
        }
    }

    fn quick_policy() -> RetryPolicy {
        RetryPolicy {
            connect_attempts: 2,
            backoff: Duration::from_millis(5),
            connect_timeout: Duration::from_secs(1),
        }
    }

    fn sequence() -> CommandSequence {
        CommandSequence::new(vec![
            Command::exec("pwd"),
            Command::sleep(Duration::from_millis(10)),
            Command::exec("oops"),
            Command::noop(),
        ])
    }

    #[tokio::test]
    async fn test_units_logged_in_order() {
        let dir = TempDir::new().unwrap();
        let tracker = ProgressTracker::new(4);
        let pipeline = DevicePipeline::new(
            Arc::new(EchoConnector { fail: false }),
            Device::new("dut-1", "admin"),
            sequence(),
            tracker.device(4),
        )
        .with_policy(quick_policy())
        .with_log(dir.path(), "unit");

        let status = pipeline.run().await.unwrap();
        assert_eq!(status, DeviceStatus::Completed);
        assert_eq!(tracker.completed(), 4);

        let content = std::fs::read_to_string(dir.path().join("unit_dut-1.log")).unwrap();
        let units: Vec<_> = parse_entries(&content)
            .into_iter()
            .filter(|e| e.unit.is_some())
            .collect();

        assert_eq!(
            units.iter().map(|e| e.unit.unwrap()).collect::<Vec<_>>(),
            vec![1, 2, 3, 4]
        );
        assert!(units[0].message.contains("Output on dut-1:\npwd"));
        assert!(units[1].message.starts_with("Slept for"));
        assert!(units[2].message.contains("Error on dut-1:\noops: not found"));
        assert_eq!(units[3].message, "Nothing to execute");
    }

    #[tokio::test]
    async fn test_unreachable_device_skips_every_unit() {
        let dir = TempDir::new().unwrap();
        let tracker = ProgressTracker::new(4);
        let pipeline = DevicePipeline::new(
            Arc::new(EchoConnector { fail: true }),
            Device::new("dut-2", "admin"),
            sequence(),
            tracker.device(4),
        )
        .with_policy(quick_policy())
        .with_log(dir.path(), "unit");

        let status = pipeline.run().await.unwrap();
        assert_eq!(status, DeviceStatus::Failed);
        assert_eq!(tracker.completed(), 4);

        let content = std::fs::read_to_string(dir.path().join("unit_dut-2.log")).unwrap();
        let entries = parse_entries(&content);
        let skipped = entries
            .iter()
            .filter(|e| e.unit.is_some() && e.message.starts_with("Skipped on dut-2"))
            .count();
        assert_eq!(skipped, 4);
        assert!(content.contains("Failed to connect to dut-2"));
    }
}

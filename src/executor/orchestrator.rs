// Fleet orchestrator - runs one pipeline per device under a worker cap

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinError;
use tracing::{debug, error, info};

use super::pipeline::{DevicePipeline, PipelineError};
use super::retry::RetryPolicy;
use super::Connector;
use crate::output::{
    log_path, DeviceLog, DeviceProgress, DeviceStatus, EventEmitter, ProgressTracker, UnitStatus,
};
use crate::parser::{Command, RunConfig};

/// Upper bound on concurrently running device pipelines
pub const DEFAULT_MAX_WORKERS: usize = 10;

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub max_workers: usize,
    pub connect_timeout: Duration,
    pub connect_attempts: u32,
    pub connect_backoff: Duration,
    /// Directory receiving one transcript per device
    pub log_dir: PathBuf,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        OrchestratorConfig {
            max_workers: DEFAULT_MAX_WORKERS,
            connect_timeout: policy.connect_timeout,
            connect_attempts: policy.connect_attempts,
            connect_backoff: policy.backoff,
            log_dir: PathBuf::from("logs"),
        }
    }
}

impl OrchestratorConfig {
    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_connect_attempts(mut self, attempts: u32) -> Self {
        self.connect_attempts = attempts;
        self
    }

    pub fn with_connect_backoff(mut self, backoff: Duration) -> Self {
        self.connect_backoff = backoff;
        self
    }

    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = dir.into();
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            connect_attempts: self.connect_attempts,
            backoff: self.connect_backoff,
            connect_timeout: self.connect_timeout,
        }
    }

    /// Workers for a fleet of `devices`: never zero, never above the cap
    pub fn worker_count(&self, devices: usize) -> usize {
        self.max_workers.min(devices).max(1)
    }
}

/// Outcome of one device
#[derive(Debug, Clone, Serialize)]
pub struct DeviceReport {
    pub host: String,
    pub status: DeviceStatus,
    pub log_path: PathBuf,
}

/// Outcome of a whole run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub config_name: String,
    pub devices: Vec<DeviceReport>,
    pub elapsed_secs: f64,
}

impl RunReport {
    pub fn completed(&self) -> usize {
        self.count(DeviceStatus::Completed)
    }

    pub fn failed(&self) -> usize {
        self.count(DeviceStatus::Failed)
    }

    pub fn all_completed(&self) -> bool {
        self.failed() == 0
    }

    fn count(&self, status: DeviceStatus) -> usize {
        self.devices.iter().filter(|d| d.status == status).count()
    }
}

/// Runs a configuration across its devices
pub struct Orchestrator<C: Connector> {
    config: OrchestratorConfig,
    connector: Arc<C>,
    events: Option<EventEmitter>,
}

impl<C: Connector> Orchestrator<C> {
    pub fn new(config: OrchestratorConfig, connector: C) -> Self {
        Orchestrator {
            config,
            connector: Arc::new(connector),
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventEmitter) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Run every device's pipeline and wait for all of them
    ///
    /// A device that breaks down (pipeline error or panic) is recorded as
    /// `Failed` without affecting the others.
    pub async fn run(&self, run: &RunConfig, progress: &ProgressTracker) -> RunReport {
        let started = Instant::now();
        let workers = self.config.worker_count(run.devices.len());
        let semaphore = Arc::new(Semaphore::new(workers));
        let units = run.commands.len();

        info!(
            config = %run.name,
            devices = run.devices.len(),
            units = run.total_units(),
            workers,
            "starting run"
        );

        let futures: Vec<_> = run
            .devices
            .iter()
            .map(|device| {
                let sem = semaphore.clone();
                let device_progress = progress.device(units);
                let pipeline = DevicePipeline::new(
                    self.connector.clone(),
                    device.clone(),
                    run.commands.clone(),
                    device_progress.clone(),
                )
                .with_policy(self.config.retry_policy())
                .with_log(&self.config.log_dir, &run.name)
                .with_events(self.events.clone());

                let host = device.hostname.clone();
                let handle = tokio::spawn(async move {
                    let _permit = sem
                        .acquire_owned()
                        .await
                        .map_err(|e| PipelineError::Worker(e.to_string()))?;
                    pipeline.run().await
                });

                async move {
                    let joined = handle.await;
                    (host, device_progress, joined)
                }
            })
            .collect();

        let results = join_all(futures).await;

        let devices = results
            .into_iter()
            .map(|(host, device_progress, joined)| {
                let status = match joined {
                    Ok(Ok(status)) => status,
                    Ok(Err(e)) => self.isolate(run, &host, &device_progress, &e.to_string()),
                    Err(e) => self.isolate(run, &host, &device_progress, &join_reason(e)),
                };
                DeviceReport {
                    log_path: log_path(&self.config.log_dir, &run.name, &host),
                    host,
                    status,
                }
            })
            .collect();

        let report = RunReport {
            config_name: run.name.clone(),
            devices,
            elapsed_secs: started.elapsed().as_secs_f64(),
        };

        info!(
            completed = report.completed(),
            failed = report.failed(),
            elapsed_secs = report.elapsed_secs,
            "run finished"
        );
        report
    }

    /// Record a broken pipeline and keep the run's accounting whole
    ///
    /// Units the pipeline never got to are logged and reported as skipped,
    /// starting at its progress cursor.
    fn isolate(
        &self,
        run: &RunConfig,
        host: &str,
        progress: &DeviceProgress,
        reason: &str,
    ) -> DeviceStatus {
        error!(host, reason, "device pipeline aborted");

        let next_unit = progress.advanced();
        let units = run.commands.len();

        match DeviceLog::append(&self.config.log_dir, &run.name, host, units) {
            Ok(mut log) => {
                if let Err(e) = write_abort(&mut log, host, reason, &run.commands, next_unit) {
                    error!(host, error = %e, "could not write device log");
                }
            }
            Err(e) => error!(host, error = %e, "could not open device log"),
        }

        if let Some(ref events) = self.events {
            for index in next_unit..units {
                events.unit_finished(host, index, UnitStatus::Skipped);
            }
        }

        let settled = progress.settle();
        debug!(host, settled, "settled remaining units");

        if let Some(ref events) = self.events {
            events.device_finished(host, DeviceStatus::Failed, Duration::ZERO);
        }

        DeviceStatus::Failed
    }
}

fn write_abort(
    log: &mut DeviceLog,
    host: &str,
    reason: &str,
    commands: &[Command],
    next_unit: usize,
) -> io::Result<()> {
    log.note(format!("Error on {}: {}", host, reason))?;
    for (index, command) in commands.iter().enumerate().skip(next_unit) {
        log.unit(index, format!("Skipped on {}: {} (pipeline aborted)", host, command))?;
    }
    log.close()
}

fn join_reason(error: JoinError) -> String {
    if error.is_cancelled() {
        return "pipeline was cancelled".to_string();
    }

    match error.try_into_panic() {
        Ok(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            format!("pipeline panicked: {}", message)
        }
        Err(e) => e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_count_bounds() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.worker_count(0), 1);
        assert_eq!(config.worker_count(3), 3);
        assert_eq!(config.worker_count(25), DEFAULT_MAX_WORKERS);
        assert_eq!(config.with_max_workers(0).worker_count(4), 1);
    }

    #[test]
    fn test_retry_policy_follows_config() {
        let config = OrchestratorConfig::default()
            .with_connect_attempts(5)
            .with_connect_backoff(Duration::from_millis(100))
            .with_connect_timeout(Duration::from_secs(2));
        let policy = config.retry_policy();
        assert_eq!(policy.connect_attempts, 5);
        assert_eq!(policy.backoff, Duration::from_millis(100));
        assert_eq!(policy.connect_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_report_counts() {
        let device = |host: &str, status| DeviceReport {
            host: host.to_string(),
            status,
            log_path: PathBuf::from(format!("logs/lab_{}.log", host)),
        };
        let report = RunReport {
            config_name: "lab".to_string(),
            devices: vec![
                device("a", DeviceStatus::Completed),
                device("b", DeviceStatus::Failed),
                device("c", DeviceStatus::Completed),
            ],
            elapsed_secs: 1.5,
        };
        assert_eq!(report.completed(), 2);
        assert_eq!(report.failed(), 1);
        assert!(!report.all_completed());

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["devices"][1]["status"], "failed");
    }

    #[tokio::test]
    async fn test_panic_reason_is_extracted() {
        let handle = tokio::spawn(async { panic!("boom") });
        let reason = join_reason(handle.await.unwrap_err());
        assert_eq!(reason, "pipeline panicked: boom");
    }
}

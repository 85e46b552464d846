// Shared helpers for integration tests: a scripted in-memory fleet

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use dutrun::executor::{
    CommandOutput, ConnectError, Connector, OrchestratorConfig, RemoteShell, ShellError,
};
use dutrun::inventory::Device;
use dutrun::output::{parse_entries, LogEntry};

/// What a device does when it receives a given command
#[derive(Debug, Clone)]
pub enum Script {
    Reply { stdout: String, stderr: String },
    /// Never completes within its deadline; the shell gives up and reports the timeout
    Hang,
    /// The connection drops mid-command
    Drop,
    /// The pipeline task panics
    Panic,
}

impl Script {
    pub fn stderr(message: &str) -> Self {
        Script::Reply {
            stdout: String::new(),
            stderr: message.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct HostPlan {
    unreachable: bool,
    fail_connects: usize,
    reconnect_fails: bool,
    scripts: HashMap<String, Script>,
}

#[derive(Debug, Default)]
struct FleetState {
    plans: HashMap<String, HostPlan>,
    connects: HashMap<String, usize>,
    executed: Vec<(String, String)>,
    open: usize,
    max_open: usize,
    latency: Duration,
}

/// In-memory stand-in for SSH, shared between the test and the orchestrator
#[derive(Clone, Default)]
pub struct FakeFleet {
    state: Arc<Mutex<FleetState>>,
}

impl FakeFleet {
    pub fn new() -> Self {
        FakeFleet::default()
    }

    /// Delay applied to every command
    pub fn with_latency(self, latency: Duration) -> Self {
        self.state.lock().latency = latency;
        self
    }

    pub fn unreachable(self, host: &str) -> Self {
        self.plan(host, |p| p.unreachable = true)
    }

    /// Fail the first `count` connection attempts to `host`
    pub fn fail_connects(self, host: &str, count: usize) -> Self {
        self.plan(host, |p| p.fail_connects = count)
    }

    /// Every connect after the first successful one fails
    pub fn reconnect_fails(self, host: &str) -> Self {
        self.plan(host, |p| p.reconnect_fails = true)
    }

    pub fn script(self, host: &str, command: &str, script: Script) -> Self {
        self.plan(host, |p| {
            p.scripts.insert(command.to_string(), script);
        })
    }

    fn plan(self, host: &str, edit: impl FnOnce(&mut HostPlan)) -> Self {
        edit(self.state.lock().plans.entry(host.to_string()).or_default());
        self
    }

    pub fn connects(&self, host: &str) -> usize {
        self.state.lock().connects.get(host).copied().unwrap_or(0)
    }

    /// Commands `host` received, in order
    pub fn executed(&self, host: &str) -> Vec<String> {
        self.state
            .lock()
            .executed
            .iter()
            .filter(|(h, _)| h == host)
            .map(|(_, c)| c.clone())
            .collect()
    }

    pub fn open_sessions(&self) -> usize {
        self.state.lock().open
    }

    pub fn max_open_sessions(&self) -> usize {
        self.state.lock().max_open
    }
}

#[async_trait]
impl Connector for FakeFleet {
    type Session = FakeSession;

    async fn connect(&self, device: &Device, _timeout: Duration) -> Result<FakeSession, ConnectError> {
        let host = device.hostname.clone();
        let mut state = self.state.lock();
        let plan = state.plans.get(&host).cloned().unwrap_or_default();

        let attempt = {
            let count = state.connects.entry(host.clone()).or_insert(0);
            *count += 1;
            *count
        };

        let refused = plan.unreachable
            || attempt <= plan.fail_connects
            || (plan.reconnect_fails && attempt > plan.fail_connects + 1);
        if refused {
            return Err(ConnectError::Connection {
                host,
                message: "Connection refused".to_string(),
            });
        }

        state.open += 1;
        state.max_open = state.max_open.max(state.open);

        Ok(FakeSession {
            host,
            state: self.state.clone(),
            open: true,
        })
    }
}

pub struct FakeSession {
    host: String,
    state: Arc<Mutex<FleetState>>,
    open: bool,
}

#[async_trait]
impl RemoteShell for FakeSession {
    async fn exec(&mut self, command: &str, timeout: Duration) -> Result<CommandOutput, ShellError> {
        if !self.open {
            return Err(ShellError::Closed);
        }

        let (script, latency) = {
            let mut state = self.state.lock();
            state.executed.push((self.host.clone(), command.to_string()));
            let script = state
                .plans
                .get(&self.host)
                .and_then(|p| p.scripts.get(command))
                .cloned();
            (script, state.latency)
        };

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        match script {
            None => Ok(CommandOutput {
                stdout: format!("{} output from {}\n", command, self.host),
                stderr: String::new(),
                exit_code: Some(0),
            }),
            Some(Script::Reply { stdout, stderr }) => Ok(CommandOutput {
                stdout,
                stderr,
                exit_code: Some(0),
            }),
            Some(Script::Hang) => {
                tokio::time::sleep(timeout).await;
                Err(ShellError::TimedOut(timeout))
            }
            Some(Script::Drop) => Err(ShellError::ConnectionLost("reset by peer".to_string())),
            Some(Script::Panic) => panic!("device {} exploded", self.host),
        }
    }

    async fn close(&mut self) {
        if self.open {
            self.open = false;
            self.state.lock().open -= 1;
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn host_name(&self) -> &str {
        &self.host
    }
}

/// Orchestrator settings with short backoff, logging into `log_dir`
pub fn fast_config(log_dir: &Path) -> OrchestratorConfig {
    OrchestratorConfig::default()
        .with_connect_attempts(3)
        .with_connect_backoff(Duration::from_millis(10))
        .with_connect_timeout(Duration::from_secs(1))
        .with_log_dir(log_dir)
}

pub fn read_entries(log_dir: &Path, config: &str, host: &str) -> Vec<LogEntry> {
    let path = log_dir.join(format!("{}_{}.log", config, host));
    let content = std::fs::read_to_string(&path).unwrap();
    parse_entries(&content)
}

pub fn unit_entries(log_dir: &Path, config: &str, host: &str) -> Vec<LogEntry> {
    read_entries(log_dir, config, host)
        .into_iter()
        .filter(|e| e.unit.is_some())
        .collect()
}

// Event system for live run display

use std::time::Duration;
use tokio::sync::mpsc;

/// Final state of a device pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    /// Every unit ran (remote errors and absorbed timeouts included)
    Completed,
    /// Connection could not be (re)established or the pipeline broke down
    Failed,
}

/// How a single execution unit ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitStatus {
    /// Command completed with empty stderr
    Ok,
    /// Command completed but wrote to stderr
    RemoteError,
    /// Command did not finish in time and was abandoned
    TimedOut,
    /// Connection dropped while the command was running
    ConnectionLost,
    /// Pure delay or no-op entry
    Slept,
    /// Not executed because the device had already failed
    Skipped,
}

/// Events emitted during a run
#[derive(Debug, Clone)]
pub enum RunEvent {
    /// A worker picked up the device
    DeviceStarted { host: String },

    /// One execution unit of the device ended
    UnitFinished {
        host: String,
        index: usize,
        status: UnitStatus,
    },

    /// The device pipeline ended
    DeviceFinished {
        host: String,
        status: DeviceStatus,
        duration: Duration,
    },
}

/// Event emitter for sending run events
#[derive(Clone)]
pub struct EventEmitter {
    tx: mpsc::UnboundedSender<RunEvent>,
}

impl EventEmitter {
    /// Create a new event emitter with the given channel
    pub fn new(tx: mpsc::UnboundedSender<RunEvent>) -> Self {
        EventEmitter { tx }
    }

    pub fn device_started(&self, host: &str) {
        let _ = self.tx.send(RunEvent::DeviceStarted {
            host: host.to_string(),
        });
    }

    pub fn unit_finished(&self, host: &str, index: usize, status: UnitStatus) {
        let _ = self.tx.send(RunEvent::UnitFinished {
            host: host.to_string(),
            index,
            status,
        });
    }

    pub fn device_finished(&self, host: &str, status: DeviceStatus, duration: Duration) {
        let _ = self.tx.send(RunEvent::DeviceFinished {
            host: host.to_string(),
            status,
            duration,
        });
    }
}

/// Create a new event channel
pub fn create_event_channel() -> (EventEmitter, mpsc::UnboundedReceiver<RunEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventEmitter::new(tx), rx)
}

// Validated run configuration types

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use crate::inventory::Device;

/// Timeout applied to a command when the configuration gives none
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(120);

/// One entry of the command sequence
///
/// An entry may carry a command, a sleep, both (command first, then sleep) or
/// neither (a no-op). Every entry is one execution unit regardless.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub command: Option<String>,
    pub timeout: Duration,
    pub sleep: Duration,
}

impl Command {
    pub fn exec(command: impl Into<String>) -> Self {
        Command {
            command: Some(command.into()),
            timeout: DEFAULT_COMMAND_TIMEOUT,
            sleep: Duration::ZERO,
        }
    }

    pub fn sleep(duration: Duration) -> Self {
        Command {
            command: None,
            timeout: DEFAULT_COMMAND_TIMEOUT,
            sleep: duration,
        }
    }

    pub fn noop() -> Self {
        Command::sleep(Duration::ZERO)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_sleep(mut self, sleep: Duration) -> Self {
        self.sleep = sleep;
        self
    }

    /// Command text, if this entry runs anything remotely
    pub fn text(&self) -> Option<&str> {
        self.command.as_deref().filter(|c| !c.trim().is_empty())
    }

    pub fn has_sleep(&self) -> bool {
        !self.sleep.is_zero()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.text(), self.has_sleep()) {
            (Some(cmd), false) => write!(f, "{} (timeout {}s)", cmd, self.timeout.as_secs_f64()),
            (Some(cmd), true) => write!(
                f,
                "{} (timeout {}s), then sleep {}s",
                cmd,
                self.timeout.as_secs_f64(),
                self.sleep.as_secs_f64()
            ),
            (None, true) => write!(f, "sleep {}s", self.sleep.as_secs_f64()),
            (None, false) => f.write_str("no-op"),
        }
    }
}

/// Ordered commands applied to every device of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSequence(Arc<[Command]>);

impl Default for CommandSequence {
    fn default() -> Self {
        CommandSequence::new(Vec::new())
    }
}

impl CommandSequence {
    pub fn new(commands: Vec<Command>) -> Self {
        CommandSequence(commands.into())
    }
}

impl Deref for CommandSequence {
    type Target = [Command];

    fn deref(&self) -> &[Command] {
        &self.0
    }
}

impl From<Vec<Command>> for CommandSequence {
    fn from(commands: Vec<Command>) -> Self {
        CommandSequence::new(commands)
    }
}

/// A loaded configuration: its name plus the devices and commands it names
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Configuration name, used as the log file prefix
    pub name: String,
    pub devices: Vec<Device>,
    pub commands: CommandSequence,
}

impl RunConfig {
    pub fn new(name: impl Into<String>, devices: Vec<Device>, commands: CommandSequence) -> Self {
        RunConfig {
            name: name.into(),
            devices,
            commands,
        }
    }

    /// Number of (device, command) units in the run
    pub fn total_units(&self) -> usize {
        self.devices.len() * self.commands.len()
    }

    pub fn hostnames(&self) -> impl Iterator<Item = &str> {
        self.devices.iter().map(|d| d.hostname.as_str())
    }
}

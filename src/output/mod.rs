// Output module for dutrun

pub mod device_log;
pub mod errors;
pub mod events;
pub mod progress;
pub mod terminal;

pub use device_log::{log_path, parse_entries, DeviceLog, LogEntry, TIMESTAMP_FORMAT};
pub use errors::*;
pub use events::*;
pub use progress::{DeviceProgress, ProgressTracker};
pub use terminal::TerminalOutput;

/// Output format for `dutrun run`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Human-readable text output with colors and a progress bar
    #[default]
    Text,
    /// A single JSON report on stdout
    Json,
}

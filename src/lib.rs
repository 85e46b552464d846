// dutrun - run a command sequence across a fleet of devices under test
//
// Every device gets its own SSH session, its own transcript and its own
// retry state; one device failing never stops the others.

pub mod executor;
pub mod inventory;
pub mod output;
pub mod parser;
pub mod store;

pub use executor::{Orchestrator, OrchestratorConfig, RunReport, SshConnector};
pub use inventory::{Credential, Device};
pub use output::{DeviceStatus, DutError, ProgressTracker};
pub use parser::{parse_config, parse_config_file, Command, CommandSequence, RunConfig};
pub use store::Workspace;

/// Version of the dutrun tool
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::executor::{
        CommandOutput, ConnectError, Connector, Orchestrator, OrchestratorConfig, RemoteShell,
        RunReport, ShellError,
    };
    pub use crate::inventory::{Credential, Device};
    pub use crate::output::{DeviceStatus, DutError, EventEmitter, ProgressTracker, RunEvent};
    pub use crate::parser::{parse_config, parse_config_file, Command, CommandSequence, RunConfig};
}

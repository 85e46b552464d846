// On-disk workspace: configurations and device logs
//
// Layout under the base directory (default `~/.dutrun`, override with
// `DUTRUN_HOME`):
//   configs/<name>.yaml
//   logs/<name>_<hostname>.log

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::output::log_path;
use crate::parser::RunConfig;

/// Environment variable overriding the base directory
pub const HOME_ENV: &str = "DUTRUN_HOME";

const BASE_DIR_NAME: &str = ".dutrun";

/// Configuration and log directories for one user
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Workspace { root: root.into() }
    }

    /// Resolve the base directory from the environment
    pub fn from_env() -> io::Result<Self> {
        if let Some(dir) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
            return Ok(Workspace::new(dir));
        }

        let home = std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("cannot determine home directory; set {}", HOME_ENV),
                )
            })?;
        Ok(Workspace::new(PathBuf::from(home).join(BASE_DIR_NAME)))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn configs_dir(&self) -> PathBuf {
        self.root.join("configs")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn config_path(&self, name: &str) -> PathBuf {
        self.configs_dir().join(format!("{}.yaml", name))
    }

    /// Create the configs and logs directories if missing
    pub fn ensure(&self) -> io::Result<()> {
        fs::create_dir_all(self.configs_dir())?;
        fs::create_dir_all(self.logs_dir())
    }

    /// Existing log files of `config`, one per configured hostname, in device order
    pub fn device_logs(&self, config: &RunConfig) -> Vec<PathBuf> {
        let logs_dir = self.logs_dir();
        config
            .hostnames()
            .map(|host| log_path(&logs_dir, &config.name, host))
            .filter(|path| path.is_file())
            .collect()
    }
}

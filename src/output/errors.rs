// Human-readable error messages for dutrun

use std::fmt;
use std::io::IsTerminal;
use std::path::PathBuf;

use colored::*;

use crate::parser::ConfigError;

/// Initialize color output based on TTY detection and NO_COLOR environment variable
fn should_use_colors() -> bool {
    // Check NO_COLOR environment variable first (https://no-color.org/)
    if std::env::var("NO_COLOR").is_ok() {
        return false;
    }

    // Errors are written to stderr
    std::io::stderr().is_terminal()
}

/// Errors surfaced to the user by the CLI
///
/// The engine itself never returns these across a device boundary; they cover
/// configuration, filesystem and prompt failures around a run.
#[derive(Debug)]
pub enum DutError {
    /// Configuration loading or validation errors
    Config {
        message: String,
        path: Option<PathBuf>,
        suggestion: Option<String>,
    },

    /// I/O errors
    Io {
        message: String,
        path: Option<PathBuf>,
    },

    /// Anything else that stops a run from starting
    Runtime {
        message: String,
        suggestion: Option<String>,
    },

    /// The user declined the confirmation prompt
    Cancelled,
}

impl DutError {
    pub fn io(message: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        DutError::Io {
            message: message.into(),
            path: Some(path.into()),
        }
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        DutError::Runtime {
            message: message.into(),
            suggestion: None,
        }
    }

    pub fn with_path(self, path: impl Into<PathBuf>) -> Self {
        match self {
            DutError::Config {
                message,
                suggestion,
                ..
            } => DutError::Config {
                message,
                path: Some(path.into()),
                suggestion,
            },
            other => other,
        }
    }
}

impl std::error::Error for DutError {}

impl fmt::Display for DutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !should_use_colors() {
            colored::control::set_override(false);
        }

        match self {
            DutError::Config {
                message,
                path,
                suggestion,
            } => {
                writeln!(f, "{}: {}", "CONFIG ERROR".red().bold(), message)?;
                if let Some(path) = path {
                    writeln!(f, "  {} {}", "-->".blue(), path.display().to_string().cyan())?;
                }
                write_hint(f, suggestion)
            }

            DutError::Io { message, path } => {
                writeln!(f, "{}: {}", "I/O ERROR".red().bold(), message)?;
                if let Some(path) = path {
                    writeln!(f, "  {} {}", "Path:".dimmed(), path.display())?;
                }
                Ok(())
            }

            DutError::Runtime {
                message,
                suggestion,
            } => {
                writeln!(f, "{}: {}", "ERROR".red().bold(), message)?;
                write_hint(f, suggestion)
            }

            DutError::Cancelled => writeln!(f, "{}", "Run cancelled.".red()),
        }
    }
}

fn write_hint(f: &mut fmt::Formatter<'_>, suggestion: &Option<String>) -> fmt::Result {
    if let Some(suggestion) = suggestion {
        writeln!(f)?;
        writeln!(f, "{}: {}", "Hint".yellow().bold(), suggestion)?;
    }
    Ok(())
}

impl From<ConfigError> for DutError {
    fn from(err: ConfigError) -> Self {
        let suggestion = match &err {
            ConfigError::Read { .. } => {
                Some("Create one with `dutrun init` or check the configuration name".to_string())
            }
            ConfigError::Yaml(_) => Some("Check the configuration file syntax".to_string()),
            ConfigError::Invalid { .. } => None,
        };
        let path = match &err {
            ConfigError::Read { path, .. } => Some(path.clone()),
            _ => None,
        };

        DutError::Config {
            message: err.to_string(),
            path,
            suggestion,
        }
    }
}

// YAML run configuration parser

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ast::{Command, CommandSequence, RunConfig, DEFAULT_COMMAND_TIMEOUT};
use super::ConfigError;
use crate::inventory::{Device, DEFAULT_PORT};

/// Raw YAML configuration (before validation)
#[derive(Debug, Default, Serialize, Deserialize)]
struct RawConfig {
    #[serde(default)]
    devices: Vec<RawDevice>,
    #[serde(default)]
    commands: Vec<RawCommand>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RawDevice {
    hostname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    port: Option<RawPort>,
    username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    password: Option<String>,
}

/// Ports show up both as numbers and as quoted strings in hand-written files
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum RawPort {
    Number(i64),
    Text(String),
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RawCommand {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    command: Option<String>,
    /// Seconds, fractional values allowed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timeout: Option<f64>,
    /// Seconds, fractional values allowed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sleep: Option<f64>,
}

/// Load and validate a run configuration file
pub fn parse_config_file(path: &Path, name: &str) -> Result<RunConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    parse_config(&content, name)
}

/// Parse and validate a run configuration from a YAML string
pub fn parse_config(content: &str, name: &str) -> Result<RunConfig, ConfigError> {
    let raw: RawConfig = serde_yaml::from_str(content)?;

    if raw.devices.is_empty() {
        return Err(ConfigError::invalid("devices", "at least one device is required"));
    }
    if raw.commands.is_empty() {
        return Err(ConfigError::invalid("commands", "at least one command is required"));
    }

    let mut seen = HashSet::new();
    let mut devices = Vec::with_capacity(raw.devices.len());
    for (i, raw_device) in raw.devices.into_iter().enumerate() {
        let device = convert_device(raw_device, i)?;
        if !seen.insert(device.hostname.clone()) {
            return Err(ConfigError::invalid(
                format!("devices[{}].hostname", i),
                format!("duplicate hostname '{}'", device.hostname),
            ));
        }
        devices.push(device);
    }

    let commands = raw
        .commands
        .into_iter()
        .enumerate()
        .map(|(i, c)| convert_command(c, i))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(RunConfig::new(name, devices, CommandSequence::new(commands)))
}

fn convert_device(raw: RawDevice, index: usize) -> Result<Device, ConfigError> {
    let hostname = raw.hostname.trim().to_string();
    if hostname.is_empty() {
        return Err(ConfigError::invalid(
            format!("devices[{}].hostname", index),
            "hostname must not be empty",
        ));
    }

    let username = raw.username.trim().to_string();
    if username.is_empty() {
        return Err(ConfigError::invalid(
            format!("devices[{}].username", index),
            "username must not be empty",
        ));
    }

    let port = match raw.port {
        None => DEFAULT_PORT,
        Some(port) => parse_port(&port).ok_or_else(|| {
            ConfigError::invalid(
                format!("devices[{}].port", index),
                format!("'{}' is not a valid port", port_text(&port)),
            )
        })?,
    };

    Ok(Device::new(hostname, username)
        .with_port(port)
        .with_credential(raw.password.unwrap_or_default()))
}

fn parse_port(port: &RawPort) -> Option<u16> {
    let value = match port {
        RawPort::Number(n) => u16::try_from(*n).ok()?,
        RawPort::Text(s) => s.trim().parse::<u16>().ok()?,
    };
    (value != 0).then_some(value)
}

fn port_text(port: &RawPort) -> String {
    match port {
        RawPort::Number(n) => n.to_string(),
        RawPort::Text(s) => s.clone(),
    }
}

fn convert_command(raw: RawCommand, index: usize) -> Result<Command, ConfigError> {
    let timeout = match raw.timeout {
        None => DEFAULT_COMMAND_TIMEOUT,
        Some(secs) => Duration::try_from_secs_f64(secs)
            .ok()
            .filter(|d| !d.is_zero())
            .ok_or_else(|| {
                ConfigError::invalid(
                    format!("commands[{}].timeout", index),
                    format!("'{}' is not a valid timeout, it must be greater than zero", secs),
                )
            })?,
    };

    let sleep = match raw.sleep {
        None => Duration::ZERO,
        Some(secs) => Duration::try_from_secs_f64(secs).map_err(|_| {
            ConfigError::invalid(
                format!("commands[{}].sleep", index),
                format!("'{}' is not a valid sleep duration", secs),
            )
        })?,
    };

    Ok(Command {
        command: raw.command,
        timeout,
        sleep,
    })
}

/// YAML for the configuration written by `dutrun init`
pub fn default_config_yaml() -> Result<String, ConfigError> {
    let raw = RawConfig {
        devices: vec![RawDevice {
            hostname: "192.168.0.1".to_string(),
            port: Some(RawPort::Number(i64::from(DEFAULT_PORT))),
            username: "admin".to_string(),
            password: Some("admin".to_string()),
        }],
        commands: vec![
            RawCommand {
                command: Some("ls".to_string()),
                timeout: Some(10.0),
                ..Default::default()
            },
            RawCommand {
                sleep: Some(5.0),
                ..Default::default()
            },
            RawCommand {
                command: Some("pwd".to_string()),
                ..Default::default()
            },
        ],
    };

    Ok(serde_yaml::to_string(&raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
devices:
  - hostname: 10.0.0.1
    port: "2222"
    username: admin
    password: admin
  - hostname: 10.0.0.2
    username: root
commands:
  - command: ls
    timeout: 10
  - sleep: 5
  - command: pwd
"#;

        let run = parse_config(yaml, "lab").unwrap();
        assert_eq!(run.name, "lab");
        assert_eq!(run.devices.len(), 2);
        assert_eq!(run.devices[0].port, 2222);
        assert_eq!(run.devices[0].credential.expose(), "admin");
        assert_eq!(run.devices[1].port, 22);
        assert!(run.devices[1].credential.is_empty());

        assert_eq!(
            run.commands.to_vec(),
            vec![
                Command::exec("ls").with_timeout(Duration::from_secs(10)),
                Command::sleep(Duration::from_secs(5)),
                Command::exec("pwd"),
            ]
        );
    }

    #[test]
    fn test_command_with_sleep_and_empty_entry() {
        let yaml = r#"
devices:
  - {hostname: a, username: u}
commands:
  - {command: reboot, timeout: 3, sleep: 1.5}
  - {}
"#;
        let run = parse_config(yaml, "x").unwrap();
        assert_eq!(run.commands[0].text(), Some("reboot"));
        assert_eq!(run.commands[0].sleep, Duration::from_millis(1500));
        assert_eq!(run.commands[1], Command::noop());
    }

    #[test]
    fn test_rejects_invalid_port() {
        let yaml = r#"
devices:
  - {hostname: a, username: u, port: "ssh"}
commands:
  - command: ls
"#;
        let err = parse_config(yaml, "x").unwrap_err();
        assert!(err.to_string().contains("devices[0].port"));
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let yaml = r#"
devices:
  - {hostname: a, username: u}
commands:
  - {command: ls, timeout: 0}
"#;
        assert!(matches!(
            parse_config(yaml, "x"),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn test_fractional_timeout() {
        let yaml = r#"
devices:
  - {hostname: a, username: u}
commands:
  - {command: ls, timeout: 0.5}
  - {command: pwd, timeout: -1}
"#;
        let err = parse_config(yaml, "x").unwrap_err();
        assert!(err.to_string().contains("commands[1].timeout"));

        let run = parse_config(&yaml.replace("-1", "2"), "x").unwrap();
        assert_eq!(run.commands[0].timeout, Duration::from_millis(500));
        assert_eq!(run.commands[1].timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_rejects_duplicate_hostnames() {
        let yaml = r#"
devices:
  - {hostname: a, username: u}
  - {hostname: a, username: v}
commands:
  - command: ls
"#;
        let err = parse_config(yaml, "x").unwrap_err();
        assert!(err.to_string().contains("duplicate hostname"));
    }

    #[test]
    fn test_rejects_empty_device_list() {
        let yaml = "commands:\n  - command: ls\n";
        assert!(parse_config(yaml, "x").is_err());
    }

    #[test]
    fn test_default_config_round_trips() {
        let yaml = default_config_yaml().unwrap();
        let run = parse_config(&yaml, "default_config").unwrap();
        assert_eq!(run.devices[0].hostname, "192.168.0.1");
        assert_eq!(run.total_units(), 3);
    }
}

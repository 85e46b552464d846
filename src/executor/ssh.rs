// SSH sessions on top of libssh2
//
// libssh2 calls block, so every network operation runs on the blocking pool.
// Command output is read in non-blocking mode against a deadline, which lets a
// hung remote command be abandoned without waiting for the remote side.

use std::io::{self, Read};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use ssh2::{ErrorCode, KeyboardInteractivePrompt, Session};
use tracing::debug;

use super::{CommandOutput, ConnectError, Connector, RemoteShell, ShellError};
use crate::inventory::Device;

/// libssh2's LIBSSH2_ERROR_TIMEOUT
const LIBSSH2_ERROR_TIMEOUT: i32 = -9;

/// Sleep between polls when the channel had nothing to read
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Opens password-authenticated SSH sessions
#[derive(Debug, Clone, Default)]
pub struct SshConnector {
    private_key_path: Option<String>,
}

impl SshConnector {
    pub fn new() -> Self {
        SshConnector::default()
    }

    /// Key file tried when a device has no password
    pub fn with_private_key(mut self, path: String) -> Self {
        self.private_key_path = Some(path);
        self
    }
}

#[async_trait]
impl Connector for SshConnector {
    type Session = SshSession;

    async fn connect(&self, device: &Device, timeout: Duration) -> Result<SshSession, ConnectError> {
        let device = device.clone();
        let host = device.hostname.clone();
        let key_path = self.private_key_path.clone();

        tokio::task::spawn_blocking(move || open_session(&device, key_path.as_deref(), timeout))
            .await
            .map_err(|e| ConnectError::Connection {
                host,
                message: format!("connect task failed: {}", e),
            })?
    }
}

fn open_session(
    device: &Device,
    key_path: Option<&str>,
    timeout: Duration,
) -> Result<SshSession, ConnectError> {
    let host = device.hostname.clone();
    let deadline = Instant::now() + timeout;

    let addrs = device
        .address()
        .to_socket_addrs()
        .map_err(|e| ConnectError::Connection {
            host: host.clone(),
            message: format!("Failed to resolve address: {}", e),
        })?;

    // TCP connection with timeout, trying each resolved address in turn
    let mut last_error = None;
    let mut stream = None;
    for addr in addrs {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match TcpStream::connect_timeout(&addr, remaining) {
            Ok(tcp) => {
                stream = Some(tcp);
                break;
            }
            Err(e) => last_error = Some(e),
        }
    }

    let tcp = match (stream, last_error) {
        (Some(tcp), _) => tcp,
        (None, Some(e)) if e.kind() != io::ErrorKind::TimedOut => {
            return Err(ConnectError::Connection {
                host,
                message: format!("Connection failed: {}", e),
            })
        }
        (None, _) => return Err(ConnectError::Timeout { host, timeout }),
    };

    let mut session = Session::new().map_err(|e| ConnectError::Connection {
        host: host.clone(),
        message: format!("Failed to create SSH session: {}", e),
    })?;

    session.set_tcp_stream(tcp);
    session.set_timeout(timeout.as_millis().min(u32::MAX as u128) as u32);

    session.handshake().map_err(|e| {
        if matches!(e.code(), ErrorCode::Session(LIBSSH2_ERROR_TIMEOUT)) {
            ConnectError::Timeout {
                host: host.clone(),
                timeout,
            }
        } else {
            ConnectError::Connection {
                host: host.clone(),
                message: format!("SSH handshake failed: {}", e),
            }
        }
    })?;

    authenticate(&session, device, key_path);

    if !session.authenticated() {
        return Err(ConnectError::Auth {
            host,
            user: device.username.clone(),
        });
    }

    debug!(host = %device.hostname, target = %device.ssh_target(), "ssh session established");

    Ok(SshSession {
        session: Some(session),
        host_name: device.hostname.clone(),
    })
}

fn authenticate(session: &Session, device: &Device, key_path: Option<&str>) {
    let user = device.username.as_str();

    if !device.credential.is_empty() {
        let password = device.credential.expose();
        if session.userauth_password(user, password).is_err() {
            // Fall back to keyboard-interactive auth (used by some PAM configurations)
            let mut prompter = PasswordPrompter(password.to_string());
            session
                .userauth_keyboard_interactive(user, &mut prompter)
                .ok();
        }
        return;
    }

    // No password: SSH agent, then the configured key file
    if let Ok(mut agent) = session.agent() {
        if agent.connect().is_ok() {
            agent.list_identities().ok();
            for identity in agent.identities().unwrap_or_default() {
                if agent.userauth(user, &identity).is_ok() {
                    return;
                }
            }
        }
    }

    if let Some(path) = key_path {
        let path = Path::new(path);
        if path.exists() {
            session.userauth_pubkey_file(user, None, path, None).ok();
        }
    }
}

/// An authenticated SSH session to one device
pub struct SshSession {
    session: Option<Session>,
    host_name: String,
}

#[async_trait]
impl RemoteShell for SshSession {
    async fn exec(&mut self, command: &str, timeout: Duration) -> Result<CommandOutput, ShellError> {
        let session = self.session.clone().ok_or(ShellError::Closed)?;
        let command = command.to_string();

        tokio::task::spawn_blocking(move || exec_with_deadline(&session, &command, timeout))
            .await
            .map_err(|e| ShellError::ConnectionLost(format!("exec task failed: {}", e)))?
    }

    async fn close(&mut self) {
        if let Some(session) = self.session.take() {
            let host = self.host_name.clone();
            let _ = tokio::task::spawn_blocking(move || {
                if let Err(e) = session.disconnect(None, "session closed", None) {
                    debug!(host = %host, error = %e, "ssh disconnect failed");
                }
            })
            .await;
        }
    }

    fn is_open(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.authenticated())
    }

    fn host_name(&self) -> &str {
        &self.host_name
    }
}

fn exec_with_deadline(
    session: &Session,
    command: &str,
    timeout: Duration,
) -> Result<CommandOutput, ShellError> {
    let deadline = Instant::now() + timeout;
    let lost = |e: ssh2::Error| ShellError::ConnectionLost(e.to_string());

    session.set_blocking(true);
    let mut channel = session.channel_session().map_err(lost)?;
    channel.exec(command).map_err(lost)?;

    session.set_blocking(false);

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut buf = [0u8; 4096];

    let outcome = loop {
        let out_active = match drain(&mut channel, &mut buf, &mut stdout) {
            Ok(active) => active,
            Err(e) => break Err(ShellError::ConnectionLost(e.to_string())),
        };
        let err_active = match drain(&mut channel.stderr(), &mut buf, &mut stderr) {
            Ok(active) => active,
            Err(e) => break Err(ShellError::ConnectionLost(e.to_string())),
        };

        if channel.eof() && !out_active && !err_active {
            break Ok(());
        }

        if Instant::now() >= deadline {
            break Err(ShellError::TimedOut(timeout));
        }

        if !out_active && !err_active {
            std::thread::sleep(POLL_INTERVAL);
        }
    };

    session.set_blocking(true);

    if let Err(e) = outcome {
        // The command is abandoned; make sure its channel does not linger
        let _ = channel.close();
        return Err(e);
    }

    channel.wait_close().ok();
    let exit_code = channel.exit_status().ok();

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        exit_code,
    })
}

/// Read whatever is available right now; `Ok(true)` when bytes arrived
fn drain(reader: &mut impl Read, buf: &mut [u8], out: &mut Vec<u8>) -> io::Result<bool> {
    match reader.read(buf) {
        Ok(0) => Ok(false),
        Ok(n) => {
            out.extend_from_slice(&buf[..n]);
            Ok(true)
        }
        Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
        Err(e) => Err(e),
    }
}

/// Helper for keyboard-interactive authentication
struct PasswordPrompter(String);

impl KeyboardInteractivePrompt for PasswordPrompter {
    fn prompt<'a>(
        &mut self,
        _username: &str,
        _instructions: &str,
        prompts: &[ssh2::Prompt<'a>],
    ) -> Vec<String> {
        // Return the password for each prompt (typically just one "Password:" prompt)
        prompts.iter().map(|_| self.0.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_drain_reads_available_bytes() {
        let mut reader: &[u8] = b"hello";
        let mut buf = [0u8; 8];
        let mut out = Vec::new();

        assert!(drain(&mut reader, &mut buf, &mut out).unwrap());
        assert!(!drain(&mut reader, &mut buf, &mut out).unwrap());
        assert_eq!(out, b"hello");
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let device = Device::new("127.0.0.1", "admin")
            .with_port(port)
            .with_credential("admin");

        let result = SshConnector::new()
            .connect(&device, Duration::from_secs(2))
            .await;

        assert!(matches!(result, Err(ConnectError::Connection { .. })));
    }

    #[tokio::test]
    async fn test_silent_server_does_not_hang() {
        // Accepts TCP but never sends an SSH banner
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let device = Device::new("127.0.0.1", "admin")
            .with_port(port)
            .with_credential("admin");

        let started = Instant::now();
        let result = SshConnector::new()
            .connect(&device, Duration::from_millis(300))
            .await;

        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(10));
        drop(listener);
    }

    #[tokio::test]
    async fn test_closed_session_rejects_exec() {
        let mut session = SshSession {
            session: None,
            host_name: "dut".to_string(),
        };

        session.close().await;
        assert!(!session.is_open());
        assert!(matches!(
            session.exec("true", Duration::from_secs(1)).await,
            Err(ShellError::Closed)
        ));
    }
}

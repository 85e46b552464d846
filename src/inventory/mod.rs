// Device inventory for a run

mod credential;

pub use credential::Credential;

/// Default SSH port
pub const DEFAULT_PORT: u16 = 22;

/// A single device under test
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub hostname: String,
    pub port: u16,
    pub username: String,
    pub credential: Credential,
}

impl Device {
    pub fn new(hostname: impl Into<String>, username: impl Into<String>) -> Self {
        Device {
            hostname: hostname.into(),
            port: DEFAULT_PORT,
            username: username.into(),
            credential: Credential::default(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_credential(mut self, credential: impl Into<Credential>) -> Self {
        self.credential = credential.into();
        self
    }

    /// Get the SSH connection string (user@host:port)
    pub fn ssh_target(&self) -> String {
        format!("{}@{}:{}", self.username, self.hostname, self.port)
    }

    /// Address passed to the resolver
    pub fn address(&self) -> (&str, u16) {
        (self.hostname.as_str(), self.port)
    }
}

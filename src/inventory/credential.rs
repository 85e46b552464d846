// Device credentials, wiped from memory on drop

use std::fmt;

use zeroize::Zeroizing;

/// Password used to authenticate against a device
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credential(Zeroizing<String>);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Credential(Zeroizing::new(secret.into()))
    }

    pub fn expose(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Masked form for display
    pub fn masked(&self) -> &'static str {
        if self.is_empty() {
            "(none)"
        } else {
            "********"
        }
    }
}

impl From<&str> for Credential {
    fn from(secret: &str) -> Self {
        Credential::new(secret)
    }
}

impl From<String> for Credential {
    fn from(secret: String) -> Self {
        Credential::new(secret)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_is_redacted() {
        let credential = Credential::new("s3cret");
        let rendered = format!("{:?}", credential);
        assert!(!rendered.contains("s3cret"));
        assert_eq!(credential.masked(), "********");
        assert_eq!(Credential::default().masked(), "(none)");
    }
}

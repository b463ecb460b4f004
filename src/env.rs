//! Runtime environment detection.
//!
//! Determines the runtime environment from the `RTDS_ENV` environment
//! variable. Used to decide where session tokens are stored:
//!
//! - `test` - Test mode (file storage instead of keyring)
//! - `development` or `dev` - Development mode
//! - (anything else or unset) - Production mode

/// Runtime environment for the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Production environment (default).
    Production,
    /// Development environment.
    Development,
    /// Test environment - uses file storage.
    Test,
}

impl Environment {
    /// Detect current environment from `RTDS_ENV`.
    #[must_use]
    pub fn current() -> Self {
        Self::parse(std::env::var("RTDS_ENV").ok().as_deref())
    }

    fn parse(value: Option<&str>) -> Self {
        match value {
            Some("test") => Self::Test,
            Some("development" | "dev") => Self::Development,
            _ => Self::Production,
        }
    }

    /// Returns `true` if this is the test environment.
    #[must_use]
    pub fn is_test(self) -> bool {
        self == Self::Test
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Production => write!(f, "production"),
            Self::Development => write!(f, "development"),
            Self::Test => write!(f, "test"),
        }
    }
}

/// Returns `true` if the OS keyring should be bypassed.
#[must_use]
pub fn should_skip_keyring() -> bool {
    Environment::current().is_test()
}

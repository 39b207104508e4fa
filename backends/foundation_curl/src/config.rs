//! Client configuration, loadable from TOML.
//!
//! WHY: Hosts configure the plugin once at startup (multiplexing, TLS policy,
//! pin profiles) and usually ship that configuration as a file.
//!
//! WHAT: `ClientConfig` with serde defaults for every field, builder methods
//! for programmatic setup, and `from_path`/`from_toml_str` loaders.
//!
//! HOW: `toml` + `serde`, with `ConfigError` wrapping I/O and parse failures.

use derive_more::derive::From;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, From)]
pub enum ConfigError {
    #[from(ignore)]
    IOError(std::io::Error),

    #[from(ignore)]
    DeserializationFailed(toml::de::Error),

    /// A pin entry's key is not valid base64.
    #[from(ignore)]
    InvalidPinEncoding { name: String, reason: String },
}

impl From<toml::de::Error> for ConfigError {
    fn from(value: toml::de::Error) -> Self {
        Self::DeserializationFailed(value)
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        Self::IOError(value)
    }
}

impl std::error::Error for ConfigError {}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IOError(err) => write!(f, "Failed to read configuration: {err}"),
            Self::DeserializationFailed(err) => {
                write!(f, "Failed to parse configuration: {err}")
            }
            Self::InvalidPinEncoding { name, reason } => {
                write!(f, "Pin entry {name} is not valid base64: {reason}")
            }
        }
    }
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// How TLS peer and host verification is applied to each transfer.
///
/// The plugin historically disabled verification whenever no pin was
/// configured; `PinnedOnly` keeps that behaviour and is the default, so
/// choosing anything else is an explicit decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TlsVerification {
    /// Pin present: verify peer and host and enforce the pin.
    /// Pin absent: no verification at all.
    #[default]
    PinnedOnly,
    /// Always verify peer and host; enforce the pin when present.
    Always,
    /// Never verify, never pin.
    Disabled,
}

/// One named pinned-key profile.
///
/// `key` is the base64 encoding of the obfuscated key bytes, see
/// [`crate::wire::curl_client::obfuscate`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PinEntry {
    pub name: String,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Multiplexed variant: negative ids, HTTP/2, duplex stream callbacks.
    pub http2: bool,
    pub verbose: bool,
    /// Reject unsupported method strings instead of falling back to GET.
    pub strict_methods: bool,
    pub tls_verification: TlsVerification,
    pub follow_redirects: bool,
    pub max_redirects: u32,
    /// Pin profile selected at construction.
    pub pin_profile: Option<String>,
    pub pins: Vec<PinEntry>,
    /// Cadence of the drain worker while the application is paused.
    pub pause_poll_interval_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            http2: false,
            verbose: false,
            strict_methods: false,
            tls_verification: TlsVerification::default(),
            follow_redirects: true,
            max_redirects: 10,
            pin_profile: None,
            pins: Vec::new(),
            pause_poll_interval_ms: 50,
        }
    }
}

impl ClientConfig {
    /// Loads a configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file cannot be read or parsed.
    pub fn from_path<V: Into<std::path::PathBuf>>(target: V) -> ConfigResult<Self> {
        let target_path = target.into();
        let config_content = std::fs::read_to_string(target_path)?;
        Self::from_toml_str(&config_content)
    }

    /// Parses a configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::DeserializationFailed` on malformed input.
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config_obj: Self = toml::from_str(content)?;
        Ok(config_obj)
    }

    #[must_use]
    pub fn http2(mut self, enabled: bool) -> Self {
        self.http2 = enabled;
        self
    }

    #[must_use]
    pub fn verbose(mut self, enabled: bool) -> Self {
        self.verbose = enabled;
        self
    }

    #[must_use]
    pub fn strict_methods(mut self, enabled: bool) -> Self {
        self.strict_methods = enabled;
        self
    }

    #[must_use]
    pub fn tls_verification(mut self, policy: TlsVerification) -> Self {
        self.tls_verification = policy;
        self
    }

    #[must_use]
    pub fn max_redirects(mut self, max: u32) -> Self {
        self.follow_redirects = max > 0;
        self.max_redirects = max;
        self
    }

    #[must_use]
    pub fn pin_profile(mut self, name: impl Into<String>) -> Self {
        self.pin_profile = Some(name.into());
        self
    }

    #[must_use]
    pub fn pin(mut self, name: impl Into<String>, key: impl Into<String>) -> Self {
        self.pins.push(PinEntry {
            name: name.into(),
            key: key.into(),
        });
        self
    }

    #[must_use]
    pub fn pause_poll_interval(&self) -> Duration {
        Duration::from_millis(self.pause_poll_interval_ms)
    }
}

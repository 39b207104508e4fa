//! Named pinned-key profiles.
//!
//! Keys are stored XOR-obfuscated so they do not appear verbatim in memory
//! dumps or binaries. This is not encryption and offers no confidentiality;
//! it only defeats casual extraction.

use crate::config::{ConfigError, ConfigResult, PinEntry};
use base64::Engine as _;
use std::collections::HashMap;

/// Profile used when an unknown name is selected.
pub const DEFAULT_PROFILE: &str = "default";

const SECRET: [u8; 8] = [55, 11, 44, 71, 66, 177, 253, 122];

/// XORs `input` with the fixed secret. Applying it twice restores the input.
#[must_use]
pub fn obfuscate(input: &[u8]) -> Vec<u8> {
    input
        .iter()
        .zip(SECRET.iter().cycle())
        .map(|(byte, secret)| byte ^ secret)
        .collect()
}

/// Supplies the pinned public key of the active profile, if any.
#[derive(Debug, Clone)]
pub struct CertificateProvider {
    profiles: HashMap<String, Vec<u8>>,
    active: String,
}

impl Default for CertificateProvider {
    fn default() -> Self {
        Self {
            profiles: HashMap::new(),
            active: DEFAULT_PROFILE.to_string(),
        }
    }
}

impl CertificateProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a provider from configuration entries whose keys are the
    /// base64 encoding of obfuscated key bytes.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidPinEncoding` if a key is not base64.
    pub fn from_entries(entries: &[PinEntry]) -> ConfigResult<Self> {
        let mut provider = Self::new();
        for entry in entries {
            let obfuscated = base64::engine::general_purpose::STANDARD
                .decode(entry.key.trim())
                .map_err(|err| ConfigError::InvalidPinEncoding {
                    name: entry.name.clone(),
                    reason: err.to_string(),
                })?;
            provider.profiles.insert(entry.name.clone(), obfuscated);
        }
        Ok(provider)
    }

    /// Registers a profile from already obfuscated key bytes.
    #[must_use]
    pub fn with_profile(mut self, name: impl Into<String>, obfuscated_key: Vec<u8>) -> Self {
        self.profiles.insert(name.into(), obfuscated_key);
        self
    }

    /// Selects the active profile.
    ///
    /// An unrecognized name falls back to [`DEFAULT_PROFILE`] instead of
    /// failing, favouring availability over strictness.
    pub fn set_config(&mut self, name: &str) {
        if self.profiles.contains_key(name) {
            self.active = name.to_string();
            tracing::debug!("Selected pin profile {}", name);
            return;
        }

        tracing::warn!(
            "Unknown pin profile {:?}, falling back to {:?}",
            name,
            DEFAULT_PROFILE
        );
        self.active = DEFAULT_PROFILE.to_string();
    }

    #[must_use]
    pub fn active(&self) -> &str {
        &self.active
    }

    /// Returns the de-obfuscated key bytes of the active profile, or `None`
    /// when the active profile has no pin.
    #[must_use]
    pub fn pinned_key(&self) -> Option<Vec<u8>> {
        self.profiles.get(&self.active).map(|key| obfuscate(key))
    }
}

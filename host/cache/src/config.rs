use std::env;

use wasi_cache_abi::TEST_EXPORT;

pub const ENV_MAX_KEY_LEN: &str = "WASI_CACHE_MAX_KEY_LEN";
pub const ENV_MAX_VALUE_LEN: &str = "WASI_CACHE_MAX_VALUE_LEN";
pub const ENV_EXPORT: &str = "WASI_CACHE_EXPORT";

#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("`{var}` must be an unsigned 32-bit integer (got {value:?})")]
    InvalidNumber { var: &'static str, value: String },

    #[error("`{var}` is not valid unicode")]
    NotUnicode { var: &'static str },
}

/// Limits the host enforces on every request. Requests over a limit fail with
/// `CacheError::Error` rather than trapping.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct HostConfig {
    pub max_key_len: u32,
    pub max_value_len: u32,
    /// The export the runner calls.
    pub export: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            max_key_len: 250,
            max_value_len: 1024 * 1024,
            export: TEST_EXPORT.to_string(),
        }
    }
}

impl HostConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| match env::var(var) {
            Ok(value) => Ok(Some(value)),
            Err(env::VarError::NotPresent) => Ok(None),
            Err(env::VarError::NotUnicode(_)) => Err(ConfigError::NotUnicode { var }),
        })
    }

    /// Builds a config from `lookup`, falling back to the defaults for unset variables.
    pub fn from_lookup(
        mut lookup: impl FnMut(&'static str) -> Result<Option<String>, ConfigError>,
    ) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(value) = lookup(ENV_MAX_KEY_LEN)? {
            config.max_key_len = parse_u32(ENV_MAX_KEY_LEN, value)?;
        }

        if let Some(value) = lookup(ENV_MAX_VALUE_LEN)? {
            config.max_value_len = parse_u32(ENV_MAX_VALUE_LEN, value)?;
        }

        if let Some(value) = lookup(ENV_EXPORT)? {
            config.export = value;
        }

        Ok(config)
    }
}

fn parse_u32(var: &'static str, value: String) -> Result<u32, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidNumber { var, value })
}

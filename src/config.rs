//! Runtime configuration for the compute engine.
//!
//! Build-time choices (which backend exists) are cargo features; everything that
//! can change between runs of the same binary lives in [`EngineConfig`].

use crate::error::Error;
use std::env;

/// Environment variable selecting the CUDA device ordinal.
pub const ENV_DEVICE: &str = "RUST_DNN_DEVICE";
/// Environment variable selecting the convolution algorithm preference
/// (`fastest` or `no_workspace`).
pub const ENV_CONV_ALGO: &str = "RUST_DNN_CONV_ALGO";
/// Environment variable capping per-pass convolution workspace, in bytes.
pub const ENV_WORKSPACE_LIMIT: &str = "RUST_DNN_WORKSPACE_LIMIT";

/// Default cap on the workspace a single convolution pass may hold.
pub const DEFAULT_WORKSPACE_LIMIT: usize = 256 * 1024 * 1024;

/// How a convolution operator picks its algorithms at `setup` time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlgoPreference {
    /// Pick the fastest algorithm whose workspace fits under the given cap.
    PreferFastest { limit_bytes: usize },
    /// Only consider algorithms that need no workspace at all.
    NoWorkspace,
    /// Pick the fastest algorithm whose workspace fits under exactly this many bytes.
    WorkspaceLimit(usize),
}

impl AlgoPreference {
    /// Largest workspace, in bytes, an algorithm may request under this preference.
    pub fn workspace_cap(&self) -> usize {
        match *self {
            AlgoPreference::PreferFastest { limit_bytes } => limit_bytes,
            AlgoPreference::NoWorkspace => 0,
            AlgoPreference::WorkspaceLimit(bytes) => bytes,
        }
    }
}

impl Default for AlgoPreference {
    fn default() -> Self {
        AlgoPreference::PreferFastest {
            limit_bytes: DEFAULT_WORKSPACE_LIMIT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Device ordinal used when the CUDA context is first initialised.
    pub device_id: u32,
    pub conv_preference: AlgoPreference,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            device_id: 0,
            conv_preference: AlgoPreference::default(),
        }
    }
}

impl EngineConfig {
    /// Builds a configuration from the defaults, overridden by any of
    /// `RUST_DNN_DEVICE`, `RUST_DNN_CONV_ALGO` and `RUST_DNN_WORKSPACE_LIMIT`.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`EngineConfig::from_env`] but reads values through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_DEVICE) {
            config.device_id = raw.trim().parse::<u32>().map_err(|e| {
                Error::InvalidOperation(format!("{}={:?} is not a device ordinal: {}", ENV_DEVICE, raw, e))
            })?;
        }

        let limit = match lookup(ENV_WORKSPACE_LIMIT) {
            Some(raw) => Some(raw.trim().parse::<usize>().map_err(|e| {
                Error::InvalidOperation(format!(
                    "{}={:?} is not a byte count: {}",
                    ENV_WORKSPACE_LIMIT, raw, e
                ))
            })?),
            None => None,
        };

        config.conv_preference = match lookup(ENV_CONV_ALGO).as_deref().map(str::trim) {
            None | Some("fastest") => match limit {
                Some(bytes) => AlgoPreference::WorkspaceLimit(bytes),
                None => AlgoPreference::default(),
            },
            Some("no_workspace") => AlgoPreference::NoWorkspace,
            Some(other) => {
                return Err(Error::InvalidOperation(format!(
                    "{}={:?}: expected `fastest` or `no_workspace`",
                    ENV_CONV_ALGO, other
                )))
            }
        };

        log::debug!("engine configuration: {:?}", config);
        Ok(config)
    }

    pub fn with_preference(mut self, preference: AlgoPreference) -> Self {
        self.conv_preference = preference;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_environment() {
        let config = EngineConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.conv_preference.workspace_cap(), DEFAULT_WORKSPACE_LIMIT);
    }

    #[test]
    fn test_overrides() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            (ENV_DEVICE, "1"),
            (ENV_WORKSPACE_LIMIT, "4096"),
        ]))
        .unwrap();
        assert_eq!(config.device_id, 1);
        assert_eq!(config.conv_preference, AlgoPreference::WorkspaceLimit(4096));

        let config =
            EngineConfig::from_lookup(lookup_from(&[(ENV_CONV_ALGO, "no_workspace")])).unwrap();
        assert_eq!(config.conv_preference, AlgoPreference::NoWorkspace);
        assert_eq!(config.conv_preference.workspace_cap(), 0);
    }

    #[test]
    fn test_malformed_values_are_rejected() {
        assert!(matches!(
            EngineConfig::from_lookup(lookup_from(&[(ENV_DEVICE, "gpu0")])),
            Err(Error::InvalidOperation(_))
        ));
        assert!(matches!(
            EngineConfig::from_lookup(lookup_from(&[(ENV_CONV_ALGO, "winograd")])),
            Err(Error::InvalidOperation(_))
        ));
    }
}

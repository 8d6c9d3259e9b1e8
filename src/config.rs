//! Application-level configuration loading.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "LIVE_POLL_BACK_CONFIG_PATH";

const DEFAULT_POLL_TITLE: &str = "Live Poll Session";
const DEFAULT_CODE_LENGTH: usize = 6;
const DEFAULT_CODE_GENERATION_ATTEMPTS: u32 = 5;
const DEFAULT_INSTANCE_EVENT_CAPACITY: usize = 16;
const DEFAULT_TRANSITION_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Title given to every newly created poll.
    pub poll_title: String,
    /// Number of characters in a generated join code.
    pub code_length: usize,
    /// How many codes to try before giving up on a collision streak.
    pub code_generation_attempts: u32,
    /// Capacity of each instance's SSE broadcast channel.
    pub instance_event_capacity: usize,
    /// Upper bound for a store write performed inside a phase transition.
    pub transition_timeout: Option<Duration>,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let app_config: Self = raw.into();
                    info!(
                        path = %path.display(),
                        poll_title = %app_config.poll_title,
                        code_length = app_config.code_length,
                        "loaded configuration"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        RawConfig::default().into()
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    poll_title: String,
    code_length: usize,
    code_generation_attempts: u32,
    instance_event_capacity: usize,
    /// `0` disables the timeout.
    transition_timeout_ms: u64,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            poll_title: DEFAULT_POLL_TITLE.into(),
            code_length: DEFAULT_CODE_LENGTH,
            code_generation_attempts: DEFAULT_CODE_GENERATION_ATTEMPTS,
            instance_event_capacity: DEFAULT_INSTANCE_EVENT_CAPACITY,
            transition_timeout_ms: DEFAULT_TRANSITION_TIMEOUT_MS,
        }
    }
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let poll_title = match value.poll_title.trim() {
            "" => DEFAULT_POLL_TITLE.to_owned(),
            title => title.to_owned(),
        };
        Self {
            poll_title,
            code_length: value.code_length.max(1),
            code_generation_attempts: value.code_generation_attempts.max(1),
            instance_event_capacity: value.instance_event_capacity.max(1),
            transition_timeout: (value.transition_timeout_ms > 0)
                .then(|| Duration::from_millis(value.transition_timeout_ms)),
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let raw: RawConfig = serde_json::from_str(r#"{ "code_length": 8 }"#).unwrap();
        let config = AppConfig::from(raw);
        assert_eq!(config.code_length, 8);
        assert_eq!(config.poll_title, "Live Poll Session");
        assert_eq!(config.transition_timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn zero_timeout_disables_it() {
        let raw: RawConfig = serde_json::from_str(r#"{ "transition_timeout_ms": 0 }"#).unwrap();
        assert_eq!(AppConfig::from(raw).transition_timeout, None);
    }
}

use std::time::Duration;

pub const DEFAULT_MODEL: &str = "qwen2.5-coder:1.5b";
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

pub const ENV_MODEL: &str = "WISP_MODEL";
pub const ENV_BASE_URL: &str = "WISP_BASE_URL";
pub const ENV_TIMEOUT: &str = "WISP_TIMEOUT";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid timeout `{value}`: expected a positive number of seconds")]
    InvalidTimeout { value: String },
}

/// Resolved adapter settings. Precedence: explicit CLI flag, then
/// environment variable, then built-in default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub model: String,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

/// Flag-level overrides collected by the CLI layer before resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsOverrides {
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub timeout_secs: Option<u64>,
}

impl Settings {
    pub fn resolve(overrides: &SettingsOverrides) -> Result<Self, ConfigError> {
        Self::resolve_with_env(overrides, |key| std::env::var(key).ok())
    }

    pub fn resolve_with_env(
        overrides: &SettingsOverrides,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let model = overrides
            .model
            .clone()
            .or_else(|| non_empty(env(ENV_MODEL)))
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let base_url = overrides
            .base_url
            .clone()
            .or_else(|| non_empty(env(ENV_BASE_URL)))
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let timeout_secs = match overrides.timeout_secs {
            Some(value) => value,
            None => match non_empty(env(ENV_TIMEOUT)) {
                Some(raw) => raw
                    .trim()
                    .parse::<u64>()
                    .ok()
                    .filter(|v| *v > 0)
                    .ok_or(ConfigError::InvalidTimeout { value: raw })?,
                None => DEFAULT_TIMEOUT_SECS,
            },
        };
        Ok(Self {
            model,
            base_url,
            timeout_secs,
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

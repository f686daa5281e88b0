use std::time::Duration;

use crate::{
    error::{Error, Result},
    registry::Registry,
};

pub const GENERATOR_URL: &str = "generator_url";
pub const GENERATOR_MODEL: &str = "generator_model";
pub const GENERATOR_TIMEOUT_SECS: &str = "generator_timeout_secs";

/// Every key accepted by `config set`.
pub const SETTING_KEYS: &[&str] =
    &[GENERATOR_URL, GENERATOR_MODEL, GENERATOR_TIMEOUT_SECS];

pub const DEFAULT_GENERATOR_URL: &str = "http://localhost:11434";
pub const DEFAULT_GENERATOR_MODEL: &str = "qwen2.5-coder:3b";
pub const DEFAULT_GENERATOR_TIMEOUT_SECS: u64 = 60;

/// Values given on the command line or through the environment. They win
/// over persisted settings.
#[derive(Debug, Clone, Default)]
pub struct GeneratorOverrides {
    pub url: Option<String>,
    pub model: Option<String>,
    pub timeout_secs: Option<u64>,
}

/// Connection settings for the text-generation service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorConfig {
    pub url: String,
    pub model: String,
    pub timeout: Duration,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_GENERATOR_URL.to_string(),
            model: DEFAULT_GENERATOR_MODEL.to_string(),
            timeout: Duration::from_secs(DEFAULT_GENERATOR_TIMEOUT_SECS),
        }
    }
}

impl GeneratorConfig {
    /// Resolve each value from `overrides`, then the registry's settings
    /// table, then the built-in default.
    pub fn resolve(
        registry: &Registry,
        overrides: &GeneratorOverrides,
    ) -> Result<Self> {
        let url = match &overrides.url {
            Some(url) => url.clone(),
            None => {
                registry.get_setting_or(GENERATOR_URL, DEFAULT_GENERATOR_URL)?
            }
        };
        let model = match &overrides.model {
            Some(model) => model.clone(),
            None => registry
                .get_setting_or(GENERATOR_MODEL, DEFAULT_GENERATOR_MODEL)?,
        };
        let timeout_secs = match overrides.timeout_secs {
            Some(secs) => secs,
            None => match registry.get_setting(GENERATOR_TIMEOUT_SECS)? {
                Some(raw) => parse_timeout(&raw)?,
                None => DEFAULT_GENERATOR_TIMEOUT_SECS,
            },
        };

        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            model,
            timeout: Duration::from_secs(timeout_secs),
        })
    }
}

/// Reject unknown keys and malformed values before they are persisted.
pub fn validate_setting(key: &str, value: &str) -> Result<()> {
    match key {
        GENERATOR_TIMEOUT_SECS => parse_timeout(value).map(|_| ()),
        GENERATOR_URL if !value.starts_with("http://")
            && !value.starts_with("https://") =>
        {
            Err(Error::Config(format!(
                "{GENERATOR_URL} must be an http(s) URL, got '{value}'"
            )))
        }
        k if SETTING_KEYS.contains(&k) => Ok(()),
        other => Err(Error::Config(format!(
            "unknown setting '{other}' (expected one of: {})",
            SETTING_KEYS.join(", ")
        ))),
    }
}

fn parse_timeout(raw: &str) -> Result<u64> {
    match raw.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(secs),
        _ => Err(Error::Config(format!(
            "{GENERATOR_TIMEOUT_SECS} must be a positive integer, got '{raw}'"
        ))),
    }
}

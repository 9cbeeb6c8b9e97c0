//! Gateway configuration
//!
//! Typed configuration assembled from CLI flags and environment variables in
//! `main.rs`. Everything here is plain data; validation happens in
//! [`GatewayConfig::validate`].

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub base_url: String,
}

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
}

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub db_url: String,
    pub pool_max: usize,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,

    /// Accepted bearer tokens; empty accepts any bearer token (dev mode)
    pub api_keys: Vec<String>,

    /// `DATABASE_URL`; absence is tolerated until the first persistence call
    pub database_url: Option<String>,

    pub anthropic: Option<AnthropicConfig>,
    pub openai: Option<OpenAiConfig>,

    pub max_payload_size: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            api_keys: Vec::new(),
            database_url: None,
            anthropic: None,
            openai: None,
            max_payload_size: 50 * 1024 * 1024,
        }
    }
}

impl GatewayConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.anthropic.is_none() && self.openai.is_none() {
            return Err(ConfigError::Invalid(
                "no provider configured; set ANTHROPIC_API_KEY or OPENAI_API_KEY".to_string(),
            ));
        }
        if self.max_payload_size == 0 {
            return Err(ConfigError::Invalid(
                "max_payload_size must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn postgres(&self) -> Option<PostgresConfig> {
        self.database_url
            .as_ref()
            .filter(|url| url.as_str() != "memory")
            .map(|url| PostgresConfig {
                db_url: url.clone(),
                pool_max: 16,
            })
    }
}

/// Split a comma-separated key list, dropping empty segments.
pub fn parse_api_keys(raw: Option<&str>) -> Vec<String> {
    raw.map(|value| {
        value
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

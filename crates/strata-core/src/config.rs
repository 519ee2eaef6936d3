//! Repository startup configuration.

use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, time::Duration};
use thiserror::Error as ThisError;

///
/// ConfigError
///

#[derive(Debug, ThisError)]
pub enum ConfigError {
    #[error("invalid repository config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("repository name must not be empty")]
    EmptyName,

    #[error("timeout_ms must be greater than zero")]
    ZeroTimeout,
}

///
/// RestartType
///
/// Restart semantics of the caller's supervisor, forwarded to
/// `Adapter::ensure_all_started`.
///

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartType {
    #[default]
    Permanent,
    Transient,
    Temporary,
}

///
/// RepoConfig
///
/// Key/value configuration for one repository. `options` is the
/// adapter-specific tail and is passed through untouched.
///

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RepoConfig {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub prefix: Option<String>,

    #[serde(default)]
    pub timeout_ms: Option<u64>,

    #[serde(default = "default_query_cache")]
    pub query_cache: bool,

    #[serde(default)]
    pub options: BTreeMap<String, serde_json::Value>,
}

const fn default_query_cache() -> bool {
    true
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            name: None,
            prefix: None,
            timeout_ms: None,
            query_cache: default_query_cache(),
            options: BTreeMap::new(),
        }
    }
}

impl RepoConfig {
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Parse and validate a JSON config document.
    pub fn from_json(input: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(input)?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.as_deref().is_some_and(str::is_empty) {
            return Err(ConfigError::EmptyName);
        }
        if self.timeout_ms == Some(0) {
            return Err(ConfigError::ZeroTimeout);
        }

        Ok(())
    }

    #[must_use]
    pub fn with_option(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.options.insert(key.into(), value);
        self
    }

    #[must_use]
    pub const fn without_query_cache(mut self) -> Self {
        self.query_cache = false;
        self
    }

    #[must_use]
    pub fn option(&self, key: &str) -> Option<&serde_json::Value> {
        self.options.get(key)
    }

    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

//! Configuration validation rules.
//!
//! This module provides validation logic for `AppConfig` values
//! after they have been loaded from environment, files, or defaults.

use std::collections::HashSet;

use crate::config::{AppConfig, GroupConfig};
use regex::Regex;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `timeout_ms` is less than 100ms or exceeds 5 minutes
    /// - `user_agent` or `prefix` is empty
    /// - a group is invalid (see `GroupConfig::validate`)
    /// - two groups share a name
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_ms < 100 {
            return Err(ConfigError::Invalid { field: "timeout_ms".into(), reason: "must be at least 100ms".into() });
        }
        if self.timeout_ms > 300_000 {
            return Err(ConfigError::Invalid {
                field: "timeout_ms".into(),
                reason: "must not exceed 5 minutes (300000ms)".into(),
            });
        }

        if self.user_agent.is_empty() {
            return Err(ConfigError::Invalid { field: "user_agent".into(), reason: "must not be empty".into() });
        }

        if self.prefix.is_empty() {
            return Err(ConfigError::Invalid { field: "prefix".into(), reason: "must not be empty".into() });
        }

        let mut seen = HashSet::new();
        for group in &self.groups {
            group.validate()?;
            if !seen.insert(group.name.as_str()) {
                return Err(ConfigError::Invalid {
                    field: format!("groups.{}", group.name),
                    reason: "duplicate group name".into(),
                });
            }
        }

        Ok(())
    }
}

impl GroupConfig {
    /// Validate one group.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if the name is empty or contains `:`,
    /// there are no patterns or one fails to compile, or `max_size` is 0.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let field = |name: &str| format!("groups.{}.{}", self.name, name);

        if self.name.is_empty() {
            return Err(ConfigError::Invalid { field: "groups.name".into(), reason: "must not be empty".into() });
        }
        if self.name.contains(':') {
            return Err(ConfigError::Invalid { field: field("name"), reason: "must not contain ':'".into() });
        }

        if self.patterns.is_empty() {
            return Err(ConfigError::Invalid { field: field("patterns"), reason: "at least one pattern".into() });
        }
        for pattern in &self.patterns {
            Regex::new(pattern)
                .map_err(|e| ConfigError::Invalid { field: field("patterns"), reason: e.to_string() })?;
        }

        if self.max_size == 0 {
            return Err(ConfigError::Invalid { field: field("max_size"), reason: "must be greater than 0".into() });
        }

        if let Some(refresh) = self.refresh_ahead_ms
            && refresh > self.max_age_ms
        {
            tracing::warn!(
                group = %self.name,
                refresh_ahead_ms = refresh,
                max_age_ms = self.max_age_ms,
                "refresh_ahead_ms exceeds max_age_ms; entries expire before a refresh is triggered"
            );
        }

        Ok(())
    }
}

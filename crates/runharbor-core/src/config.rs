// Copyright (C) 2025 Runharbor contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::time::Duration;

/// Runharbor Core configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL or SQLite connection URL
    pub database_url: String,
    /// How often the expiry sweep deletes runs whose expiry has passed
    pub expiry_sweep_interval: Duration,
    /// How often the completion sweep probes unterminated runs
    pub completion_sweep_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `RUNHARBOR_DATABASE_URL`: PostgreSQL or SQLite connection string
    ///
    /// Optional (with defaults):
    /// - `RUNHARBOR_EXPIRY_SWEEP_SECS`: expiry sweep period (default: 30)
    /// - `RUNHARBOR_COMPLETION_SWEEP_SECS`: completion sweep period (default: 15)
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("RUNHARBOR_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("RUNHARBOR_DATABASE_URL"))?;

        let expiry_sweep_secs: u64 = std::env::var("RUNHARBOR_EXPIRY_SWEEP_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("RUNHARBOR_EXPIRY_SWEEP_SECS", "must be a number of seconds")
            })?;
        if expiry_sweep_secs == 0 {
            return Err(ConfigError::Invalid(
                "RUNHARBOR_EXPIRY_SWEEP_SECS",
                "must be greater than zero",
            ));
        }

        let completion_sweep_secs: u64 = std::env::var("RUNHARBOR_COMPLETION_SWEEP_SECS")
            .unwrap_or_else(|_| "15".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid(
                    "RUNHARBOR_COMPLETION_SWEEP_SECS",
                    "must be a number of seconds",
                )
            })?;
        if completion_sweep_secs == 0 {
            return Err(ConfigError::Invalid(
                "RUNHARBOR_COMPLETION_SWEEP_SECS",
                "must be greater than zero",
            ));
        }

        Ok(Self {
            database_url,
            expiry_sweep_interval: Duration::from_secs(expiry_sweep_secs),
            completion_sweep_interval: Duration::from_secs(completion_sweep_secs),
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to serialize tests that modify environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Helper to set env vars for a test and restore them after
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new() -> Self {
            Self { vars: Vec::new() }
        }

        fn set(&mut self, key: &str, value: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::set_var(key, value) };
        }

        fn remove(&mut self, key: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::remove_var(key) };
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.vars.drain(..).rev() {
                // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
                unsafe {
                    match value {
                        Some(v) => env::set_var(&key, v),
                        None => env::remove_var(&key),
                    }
                }
            }
        }
    }

    #[test]
    fn test_config_from_env_with_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.set("RUNHARBOR_DATABASE_URL", "postgres://localhost/test");
        guard.remove("RUNHARBOR_EXPIRY_SWEEP_SECS");
        guard.remove("RUNHARBOR_COMPLETION_SWEEP_SECS");

        let config = Config::from_env().unwrap();

        assert_eq!(config.database_url, "postgres://localhost/test");
        assert_eq!(config.expiry_sweep_interval, Duration::from_secs(30));
        assert_eq!(config.completion_sweep_interval, Duration::from_secs(15));
    }

    #[test]
    fn test_config_from_env_all_custom() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.set("RUNHARBOR_DATABASE_URL", "sqlite:harbor.db");
        guard.set("RUNHARBOR_EXPIRY_SWEEP_SECS", "120");
        guard.set("RUNHARBOR_COMPLETION_SWEEP_SECS", "5");

        let config = Config::from_env().unwrap();

        assert_eq!(config.database_url, "sqlite:harbor.db");
        assert_eq!(config.expiry_sweep_interval, Duration::from_secs(120));
        assert_eq!(config.completion_sweep_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_config_missing_database_url() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.remove("RUNHARBOR_DATABASE_URL");

        let result = Config::from_env();
        assert!(result.is_err());

        let err = result.unwrap_err();
        assert!(matches!(err, ConfigError::Missing("RUNHARBOR_DATABASE_URL")));
        assert!(err.to_string().contains("RUNHARBOR_DATABASE_URL"));
    }

    #[test]
    fn test_config_invalid_sweep_interval() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.set("RUNHARBOR_DATABASE_URL", "postgres://localhost/test");
        guard.set("RUNHARBOR_EXPIRY_SWEEP_SECS", "not_a_number");

        let result = Config::from_env();
        assert!(result.is_err());

        let err = result.unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid("RUNHARBOR_EXPIRY_SWEEP_SECS", _)
        ));
    }

    #[test]
    fn test_config_zero_sweep_interval_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.set("RUNHARBOR_DATABASE_URL", "postgres://localhost/test");
        guard.remove("RUNHARBOR_EXPIRY_SWEEP_SECS");
        guard.set("RUNHARBOR_COMPLETION_SWEEP_SECS", "0");

        let result = Config::from_env();
        assert!(result.is_err());

        let err = result.unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid("RUNHARBOR_COMPLETION_SWEEP_SECS", _)
        ));
    }

    #[test]
    fn test_config_error_display() {
        let missing = ConfigError::Missing("MY_VAR");
        assert_eq!(
            missing.to_string(),
            "missing required environment variable: MY_VAR"
        );

        let invalid = ConfigError::Invalid("MY_VAR", "must be a number");
        assert_eq!(
            invalid.to_string(),
            "invalid value for MY_VAR: must be a number"
        );
    }
}

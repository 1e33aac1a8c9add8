//! Messaging Configuration Module
//!
//! Loads [`MessagingConfig`] from a TOML file with environment-specific
//! overrides. Missing keys fall back to [`crate::defaults`].

use crate::defaults;
use anyhow::{bail, Context, Result};
use config_crate::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Timings and limits for mailboxes, proxies and the pending-call table
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct MessagingConfig {
    /// Per-call deadline (milliseconds)
    pub call_timeout_ms: u64,

    /// Pending-call sweep cadence (milliseconds)
    pub sweep_interval_ms: u64,

    /// Backoff before re-resolving a relocated actor (milliseconds)
    pub retry_backoff_ms: u64,

    /// Retry ceiling for entity-addressed proxies
    pub max_failures: u32,

    /// Idle lifetime of a proxy before the sweep disposes it (milliseconds)
    pub proxy_idle_timeout_ms: u64,

    /// Proxy idle sweep cadence (milliseconds)
    pub proxy_idle_check_ms: u64,

    /// Tracing filter used by binaries
    pub log_level: String,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: defaults::CALL_TIMEOUT_MS,
            sweep_interval_ms: defaults::SWEEP_INTERVAL_MS,
            retry_backoff_ms: defaults::RETRY_BACKOFF_MS,
            max_failures: defaults::MAX_FAILURES,
            proxy_idle_timeout_ms: defaults::PROXY_IDLE_TIMEOUT_MS,
            proxy_idle_check_ms: defaults::PROXY_IDLE_CHECK_MS,
            log_level: defaults::LOG_LEVEL.to_string(),
        }
    }
}

impl MessagingConfig {
    /// Load configuration with `MESSAGING_*` environment overrides
    pub fn load(base_path: Option<&Path>, environment: Option<&str>) -> Result<Self> {
        Self::load_with_prefix(base_path, environment, defaults::ENV_PREFIX)
    }

    /// Load configuration from files, then environment variables under `env_prefix`
    ///
    /// The environment overlay is looked up next to the base file as
    /// `environments/<environment>.toml`.
    pub fn load_with_prefix(
        base_path: Option<&Path>,
        environment: Option<&str>,
        env_prefix: &str,
    ) -> Result<Self> {
        let base = base_path.unwrap_or(Path::new("config/messaging.toml"));

        let mut builder = Config::builder().add_source(File::from(base).required(true));

        if let Some(env) = environment {
            let env_file = base
                .parent()
                .unwrap_or(Path::new("."))
                .join("environments")
                .join(format!("{}.toml", env));

            if env_file.exists() {
                info!("Loading environment config: {:?}", env_file);
                builder = builder.add_source(File::from(env_file));
            } else {
                warn!("Environment config not found: {:?}", env_file);
            }
        }

        builder = builder.add_source(Environment::with_prefix(env_prefix).try_parsing(true));

        let config: Self = builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;
        debug!(?config, "Messaging configuration loaded");
        Ok(config)
    }

    /// Reject settings that would stall the sweeps or spin the retry loop
    pub fn validate(&self) -> Result<()> {
        let durations = [
            ("call_timeout_ms", self.call_timeout_ms),
            ("sweep_interval_ms", self.sweep_interval_ms),
            ("proxy_idle_timeout_ms", self.proxy_idle_timeout_ms),
            ("proxy_idle_check_ms", self.proxy_idle_check_ms),
        ];
        for (field, value) in durations {
            if value == 0 {
                bail!("Invalid configuration: {} must be greater than zero", field);
            }
        }
        Ok(())
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn proxy_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.proxy_idle_timeout_ms)
    }

    pub fn proxy_idle_check(&self) -> Duration {
        Duration::from_millis(self.proxy_idle_check_ms)
    }

    /// Render the effective configuration, e.g. for startup logs
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to render configuration")
    }
}

/// Load `config/messaging.toml` for `environment`, falling back to defaults
/// when the base file is missing
pub fn load_config(environment: Option<&str>) -> Result<MessagingConfig> {
    let base = PathBuf::from("config/messaging.toml");
    if !base.exists() {
        warn!("No configuration at {:?}, using defaults", base);
        return Ok(MessagingConfig::default());
    }
    MessagingConfig::load(Some(&base), environment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_load_base_config() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("messaging.toml");

        fs::write(
            &config_path,
            r#"
call_timeout_ms = 5000
retry_backoff_ms = 250
max_failures = 2
log_level = "debug"
"#,
        )
        .unwrap();

        let config =
            MessagingConfig::load_with_prefix(Some(&config_path), None, "MSGCFG_BASE").unwrap();

        assert_eq!(config.call_timeout(), Duration::from_millis(5000));
        assert_eq!(config.retry_backoff(), Duration::from_millis(250));
        assert_eq!(config.max_failures, 2);
        assert_eq!(config.log_level, "debug");
        // Unspecified keys keep their defaults
        assert_eq!(config.sweep_interval_ms, defaults::SWEEP_INTERVAL_MS);
    }

    #[test]
    fn test_environment_overlay() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("messaging.toml");
        fs::write(&config_path, "max_failures = 3\n").unwrap();
        fs::create_dir(dir.path().join("environments")).unwrap();
        fs::write(
            dir.path().join("environments").join("test.toml"),
            "max_failures = 9\nproxy_idle_timeout_ms = 1000\n",
        )
        .unwrap();

        let config =
            MessagingConfig::load_with_prefix(Some(&config_path), Some("test"), "MSGCFG_OVERLAY")
                .unwrap();

        assert_eq!(config.max_failures, 9);
        assert_eq!(config.proxy_idle_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn test_environment_variables_override_files() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("messaging.toml");
        fs::write(&config_path, "retry_backoff_ms = 100\n").unwrap();

        std::env::set_var("MSGCFG_ENVVAR_RETRY_BACKOFF_MS", "5");
        let config =
            MessagingConfig::load_with_prefix(Some(&config_path), None, "MSGCFG_ENVVAR").unwrap();
        std::env::remove_var("MSGCFG_ENVVAR_RETRY_BACKOFF_MS");

        assert_eq!(config.retry_backoff_ms, 5);
    }

    #[test]
    fn test_zero_sweep_interval_rejected() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("messaging.toml");
        fs::write(&config_path, "sweep_interval_ms = 0\n").unwrap();

        let err = MessagingConfig::load_with_prefix(Some(&config_path), None, "MSGCFG_ZERO")
            .unwrap_err();
        assert!(err.to_string().contains("sweep_interval_ms"));
    }

    #[test]
    fn test_missing_base_file_is_error() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        assert!(MessagingConfig::load_with_prefix(Some(&missing), None, "MSGCFG_MISSING").is_err());
    }

    #[test]
    fn test_defaults_render_as_toml() {
        let rendered = MessagingConfig::default().to_toml().unwrap();
        assert!(rendered.contains("call_timeout_ms = 40000"));
    }
}

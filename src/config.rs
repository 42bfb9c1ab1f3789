//! Configuration loaded from `atb.toml`.
//!
//! [`AtbConfig`] holds every tunable the pipeline reads. Values missing from
//! the file fall back to sensible defaults. A handful of environment
//! variables take precedence over the file so that credentials and the TLS
//! escape hatch never have to live on disk.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::AtbError;
use crate::state_machine::RetryConfig;

/// Top-level configuration loaded from `atb.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct AtbConfig {
    /// Base URL of the build service.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Token endpoint of the auth service.
    #[serde(default = "default_auth_url")]
    pub auth_url: String,

    /// Client id presented to the auth endpoint.
    #[serde(default)]
    pub client_id: String,

    /// Client secret presented to the auth endpoint.
    #[serde(default)]
    pub client_secret: String,

    /// Directory scanned for spec sheets.
    #[serde(default = "default_input_dir")]
    pub input_dir: PathBuf,

    /// Directory artifacts are written to.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Jobs allowed in flight at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Attempts per network-calling stage before a job fails.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay in milliseconds for exponential backoff.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Ceiling on a single backoff delay.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Delay between build status polls.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Overall budget for one polling attempt of the Building stage.
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,

    /// Forwarded verbatim with every submission.
    #[serde(default)]
    pub ansa_dlfs: bool,

    #[serde(default)]
    pub tls: TlsConfig,
}

/// TLS trust settings for both the auth endpoint and the build service.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TlsConfig {
    /// Disable certificate verification entirely. Debug only.
    #[serde(default)]
    pub skip_verify: bool,

    /// Extra corporate CA bundle (PEM) added to the trust store.
    #[serde(default)]
    pub ca_bundle: Option<PathBuf>,
}

impl TlsConfig {
    /// Human-readable description of the verification mode, logged at startup.
    pub fn mode(&self) -> String {
        if self.skip_verify {
            "DISABLED (debug)".to_string()
        } else if let Some(path) = &self.ca_bundle {
            format!("custom bundle at {}", path.display())
        } else {
            "system default".to_string()
        }
    }
}

fn default_base_url() -> String {
    "https://atb.company.net".to_string()
}

fn default_auth_url() -> String {
    "https://atb.company.net/auth/token".to_string()
}

fn default_input_dir() -> PathBuf {
    PathBuf::from("spec_bucket")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("out_bucket")
}

fn default_concurrency() -> usize {
    5
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_poll_interval_ms() -> u64 {
    3000
}

fn default_poll_timeout_secs() -> u64 {
    1800
}

impl Default for AtbConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            auth_url: default_auth_url(),
            client_id: String::new(),
            client_secret: String::new(),
            input_dir: default_input_dir(),
            output_dir: default_output_dir(),
            concurrency: default_concurrency(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            poll_timeout_secs: default_poll_timeout_secs(),
            ansa_dlfs: false,
            tls: TlsConfig::default(),
        }
    }
}

impl AtbConfig {
    /// Load configuration from `atb.toml` in the current directory, falling
    /// back to defaults when the file does not exist. Environment variables
    /// are applied last.
    pub fn load() -> Result<Self, AtbError> {
        Self::load_from(Path::new("atb.toml"))
    }

    pub fn load_from(path: &Path) -> Result<Self, AtbError> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<AtbConfig>(&contents)?
        } else {
            Self::default()
        };
        config.apply_env();
        Ok(config)
    }

    // Environment takes precedence over the file for credentials and TLS.
    fn apply_env(&mut self) {
        if let Ok(id) = std::env::var("ATB_CLIENT_ID")
            && !id.is_empty()
        {
            self.client_id = id;
        }
        if let Ok(secret) = std::env::var("ATB_CLIENT_SECRET")
            && !secret.is_empty()
        {
            self.client_secret = secret;
        }
        if std::env::var("ATB_SKIP_VERIFY").is_ok_and(|v| v == "1") {
            self.tls.skip_verify = true;
        }
        if let Ok(bundle) = std::env::var("ATB_CA_BUNDLE")
            && !bundle.is_empty()
        {
            self.tls.ca_bundle = Some(PathBuf::from(bundle));
        }
    }

    /// The per-stage retry settings jobs run with.
    pub fn retry(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts,
            base_delay_ms: self.base_delay_ms,
            max_delay_ms: self.max_delay_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = AtbConfig::default();
        assert_eq!(config.concurrency, 5);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.base_delay_ms, 1000);
        assert_eq!(config.input_dir, PathBuf::from("spec_bucket"));
        assert_eq!(config.output_dir, PathBuf::from("out_bucket"));
        assert!(!config.tls.skip_verify);
        assert!(config.tls.ca_bundle.is_none());
        assert!(config.client_id.is_empty());
    }

    #[test]
    fn deserialize_partial_toml() {
        let toml_str = r#"
            base_url = "https://build.test"
            concurrency = 3
            max_attempts = 5

            [tls]
            skip_verify = true
        "#;
        let config: AtbConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.base_url, "https://build.test");
        assert_eq!(config.concurrency, 3);
        assert_eq!(config.max_attempts, 5);
        assert!(config.tls.skip_verify);
        // Untouched fields keep their defaults.
        assert_eq!(config.poll_interval_ms, 3000);
        assert_eq!(config.output_dir, PathBuf::from("out_bucket"));
    }

    #[test]
    fn retry_view_matches_fields() {
        let config: AtbConfig = toml::from_str("max_attempts = 7\nbase_delay_ms = 50").unwrap();
        let retry = config.retry();
        assert_eq!(retry.max_attempts, 7);
        assert_eq!(retry.base_delay_ms, 50);
        assert_eq!(retry.max_delay_ms, 30_000);
    }

    #[test]
    fn tls_mode_descriptions() {
        let mut tls = TlsConfig::default();
        assert_eq!(tls.mode(), "system default");

        tls.ca_bundle = Some(PathBuf::from("/etc/ssl/corp.pem"));
        assert!(tls.mode().contains("corp.pem"));

        tls.skip_verify = true;
        assert_eq!(tls.mode(), "DISABLED (debug)");
    }

    #[test]
    fn load_falls_back_to_defaults() {
        // No atb.toml in a scratch directory.
        let tmp = tempfile::tempdir().unwrap();
        let config = AtbConfig::load_from(&tmp.path().join("atb.toml")).unwrap();
        assert_eq!(config.concurrency, 5);
    }
}

//! Configuration loading and validation

use anyhow::{Context, Result};
use base64::Engine;
use serde::Deserialize;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub rpc: RpcConfig,
    pub custody: CustodyConfig,
    pub orchestrator: OrchestratorConfig,
    pub monitor: MonitorConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcConfig {
    #[serde(default = "default_rpc_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CustodyConfig {
    /// Master encryption secret, base64-encoded 32 bytes. Required.
    #[serde(default)]
    pub master_secret: String,

    /// Path to the sponsor (fee payer) keypair file.
    /// Absence selects simulation mode at startup.
    #[serde(default)]
    pub sponsor_keypair_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    /// Upper bound on confirmation waits before reporting Unconfirmed
    #[serde(default = "default_confirm_timeout_ms")]
    pub confirm_timeout_ms: u64,
    #[serde(default = "default_confirm_poll_interval_ms")]
    pub confirm_poll_interval_ms: u64,
    /// Hard ceiling on caller-requested slippage bounds
    #[serde(default = "default_max_slippage_bps")]
    pub max_slippage_bps: u32,
    /// Longest accepted stake/policy duration
    #[serde(default = "default_max_duration_days")]
    pub max_duration_days: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_monitor_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Max signatures fetched per scan
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,
    /// Confirmations required before a deposit record leaves Pending
    #[serde(default = "default_confirmation_threshold")]
    pub confirmation_threshold: u64,
}

// Default value functions
fn default_rpc_endpoint() -> String {
    std::env::var("RPC_ENDPOINT").unwrap_or_else(|_| "https://api.mainnet-beta.solana.com".into())
}

fn default_timeout_ms() -> u64 {
    30000
}

fn default_max_retries() -> u32 {
    3
}

fn default_confirm_timeout_ms() -> u64 {
    60000
}

fn default_confirm_poll_interval_ms() -> u64 {
    500
}

fn default_max_slippage_bps() -> u32 {
    2500
}

fn default_max_duration_days() -> u32 {
    730
}

fn default_monitor_poll_interval_ms() -> u64 {
    5000
}

fn default_batch_limit() -> usize {
    100
}

fn default_confirmation_threshold() -> u64 {
    1
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        // Pick up a local .env if present (development convenience)
        dotenvy::dotenv().ok();

        let settings = config::Config::builder()
            // Start with defaults
            .set_default("rpc.endpoint", default_rpc_endpoint())?
            .set_default("rpc.timeout_ms", default_timeout_ms() as i64)?
            .set_default("rpc.max_retries", default_max_retries() as i64)?
            .set_default("custody.master_secret", String::new())?
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix CUSTODY_)
            .add_source(
                config::Environment::with_prefix("CUSTODY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        // Master secret must decode to exactly 32 bytes
        if self.custody.master_secret.is_empty() {
            anyhow::bail!(
                "custody.master_secret is required (set CUSTODY__CUSTODY__MASTER_SECRET)"
            );
        }
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(&self.custody.master_secret)
            .context("custody.master_secret is not valid base64")?;
        if decoded.len() != 32 {
            anyhow::bail!(
                "custody.master_secret must decode to 32 bytes, got {}",
                decoded.len()
            );
        }

        if self.orchestrator.max_slippage_bps > 10000 {
            anyhow::bail!("max_slippage_bps cannot exceed 10000 (100%)");
        }

        if self.orchestrator.confirm_timeout_ms == 0 {
            anyhow::bail!("confirm_timeout_ms must be positive");
        }

        if self.orchestrator.confirm_poll_interval_ms == 0
            || self.orchestrator.confirm_poll_interval_ms > self.orchestrator.confirm_timeout_ms
        {
            anyhow::bail!("confirm_poll_interval_ms must be positive and below confirm_timeout_ms");
        }

        if self.monitor.batch_limit == 0 || self.monitor.batch_limit > 1000 {
            anyhow::bail!("monitor.batch_limit must be between 1 and 1000");
        }

        if let Some(path) = &self.custody.sponsor_keypair_path {
            if path.is_empty() {
                anyhow::bail!("custody.sponsor_keypair_path must not be empty when set");
            }
        }

        Ok(())
    }

    /// Decode the master secret into fixed key bytes
    pub fn master_key(&self) -> Result<[u8; 32]> {
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(&self.custody.master_secret)
            .context("custody.master_secret is not valid base64")?;
        let key: [u8; 32] = decoded
            .try_into()
            .map_err(|_| anyhow::anyhow!("custody.master_secret must decode to 32 bytes"))?;
        Ok(key)
    }

    /// Whether a sponsor signer is configured (real submission mode)
    pub fn has_sponsor(&self) -> bool {
        self.custody.sponsor_keypair_path.is_some()
    }

    /// Get masked configuration for display (hide secrets)
    pub fn masked_display(&self) -> String {
        format!(
            r#"Configuration:
  RPC:
    endpoint: {}
    timeout: {}ms
  Custody:
    master_secret: {}
    sponsor_keypair: {}
    mode: {}
  Orchestrator:
    confirm_timeout: {}ms
    max_slippage: {}bps
    max_duration: {} days
  Monitor:
    poll_interval: {}ms
    batch_limit: {}
    confirmation_threshold: {}
"#,
            mask_url(&self.rpc.endpoint),
            self.rpc.timeout_ms,
            if self.custody.master_secret.is_empty() {
                "(not set)"
            } else {
                "***"
            },
            self.custody
                .sponsor_keypair_path
                .as_deref()
                .unwrap_or("(not set)"),
            if self.has_sponsor() {
                "real"
            } else {
                "simulated"
            },
            self.orchestrator.confirm_timeout_ms,
            self.orchestrator.max_slippage_bps,
            self.orchestrator.max_duration_days,
            self.monitor.poll_interval_ms,
            self.monitor.batch_limit,
            self.monitor.confirmation_threshold,
        )
    }
}

/// Mask URL for display (hide API keys in query params)
fn mask_url(url: &str) -> String {
    if let Some(idx) = url.find('?') {
        format!("{}?***", &url[..idx])
    } else {
        url.to_string()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rpc: RpcConfig {
                endpoint: default_rpc_endpoint(),
                timeout_ms: default_timeout_ms(),
                max_retries: default_max_retries(),
            },
            custody: CustodyConfig {
                master_secret: String::new(),
                sponsor_keypair_path: None,
            },
            orchestrator: OrchestratorConfig {
                confirm_timeout_ms: default_confirm_timeout_ms(),
                confirm_poll_interval_ms: default_confirm_poll_interval_ms(),
                max_slippage_bps: default_max_slippage_bps(),
                max_duration_days: default_max_duration_days(),
            },
            monitor: MonitorConfig {
                poll_interval_ms: default_monitor_poll_interval_ms(),
                batch_limit: default_batch_limit(),
                confirmation_threshold: default_confirmation_threshold(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_secret() -> Config {
        let mut config = Config::default();
        config.custody.master_secret =
            base64::engine::general_purpose::STANDARD.encode([7u8; 32]);
        config
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.orchestrator.max_slippage_bps, 2500);
        assert_eq!(config.monitor.confirmation_threshold, 1);
        assert!(!config.has_sponsor());
    }

    #[test]
    fn test_master_key_roundtrip() {
        let config = config_with_secret();
        assert_eq!(config.master_key().unwrap(), [7u8; 32]);
    }

    #[test]
    fn test_validate_rejects_missing_secret() {
        let config = Config::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_short_secret() {
        let mut config = Config::default();
        config.custody.master_secret =
            base64::engine::general_purpose::STANDARD.encode([1u8; 16]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_accepts_good_config() {
        let config = config_with_secret();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_mask_url() {
        assert_eq!(
            mask_url("https://api.example.com?key=secret"),
            "https://api.example.com?***"
        );
        assert_eq!(
            mask_url("https://api.example.com"),
            "https://api.example.com"
        );
    }

    #[test]
    fn test_masked_display_hides_secret() {
        let config = config_with_secret();
        let display = config.masked_display();
        assert!(!display.contains(&config.custody.master_secret));
        assert!(display.contains("***"));
        assert!(display.contains("simulated"));
    }
}

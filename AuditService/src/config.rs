use analysis_integrations::{OpenRouterConfig, PinataConfig};
use provenance_ledger::EthersLedgerConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {message}")]
    Read { path: PathBuf, message: String },
    #[error("Invalid config format: {0}")]
    Parse(String),
    #[error("Invalid config value for {field}: {message}")]
    Invalid { field: &'static str, message: String },
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Whether a successful analysis is anchored without an explicit request.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnchorPolicy {
    #[default]
    Manual,
    AfterCompletion,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PipelineConfig {
    pub deferred_concurrency: usize,
    pub deferred_queue_depth: usize,
    pub external_timeout_secs: u64,
    pub anchor_policy: AnchorPolicy,
    pub report_dir: Option<PathBuf>,
    pub notify_on_completion: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            deferred_concurrency: 4,
            deferred_queue_depth: 64,
            external_timeout_secs: 120,
            anchor_policy: AnchorPolicy::Manual,
            report_dir: None,
            notify_on_completion: true,
        }
    }
}

impl PipelineConfig {
    pub fn external_timeout(&self) -> Duration {
        Duration::from_secs(self.external_timeout_secs)
    }

    pub fn report_dir(&self) -> PathBuf {
        self.report_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SupabaseConfig {
    pub url: String,
    #[serde(skip_serializing)]
    pub api_key: String,
    pub table: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmtpConfig {
    pub host: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub from: Option<String>,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: "smtp.gmail.com".to_string(),
            username: String::new(),
            password: String::new(),
            from: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub bind_addr: SocketAddr,
    pub metrics_addr: Option<SocketAddr>,
    pub analysis: OpenRouterConfig,
    pub ipfs: PinataConfig,
    pub supabase: Option<SupabaseConfig>,
    pub smtp: Option<SmtpConfig>,
    pub ledger: Option<EthersLedgerConfig>,
    pub pipeline: PipelineConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 5000)),
            metrics_addr: None,
            analysis: OpenRouterConfig::default(),
            ipfs: PinataConfig::default(),
            supabase: None,
            smtp: None,
            ledger: None,
            pipeline: PipelineConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Reads a JSON config file. Missing sections take their defaults.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> ConfigResult<Self> {
        serde_json::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn with_env_overrides(mut self) -> ConfigResult<Self> {
        self.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(self)
    }

    /// Overlays secrets and endpoints from `lookup` (normally the process environment).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = lookup("OPENROUTER_API_KEY") {
            self.analysis.api_key = Some(key);
        }
        if let Some(key) = lookup("PINATA_API_KEY") {
            self.ipfs.api_key = Some(key);
        }
        if let Some(secret) = lookup("PINATA_API_SECRET") {
            self.ipfs.api_secret = Some(secret);
        }

        if let Some(url) = lookup("SUPABASE_URL") {
            self.supabase.get_or_insert_with(SupabaseConfig::default).url = url;
        }
        if let Some(key) = lookup("SUPABASE_KEY") {
            self.supabase.get_or_insert_with(SupabaseConfig::default).api_key = key;
        }

        if let Some(user) = lookup("EMAIL_USER") {
            self.smtp.get_or_insert_with(SmtpConfig::default).username = user;
        }
        if let Some(password) = lookup("EMAIL_APP_PASSWORD") {
            self.smtp.get_or_insert_with(SmtpConfig::default).password = password;
        }

        if let Some(key) = lookup("LEDGER_PRIVATE_KEY") {
            self.ledger.get_or_insert_with(EthersLedgerConfig::default).private_key = key;
        }
        if let Some(url) = lookup("LEDGER_RPC_URL") {
            self.ledger.get_or_insert_with(EthersLedgerConfig::default).rpc_url = url;
        }
        if let Some(contract) = lookup("LEDGER_CONTRACT") {
            self.ledger.get_or_insert_with(EthersLedgerConfig::default).contract_address = contract;
        }

        if let Some(port) = lookup("PORT") {
            let port = port.trim().parse::<u16>().map_err(|e| ConfigError::Invalid {
                field: "PORT",
                message: e.to_string(),
            })?;
            self.bind_addr.set_port(port);
        }

        Ok(())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.pipeline.deferred_concurrency == 0 {
            return Err(ConfigError::Invalid {
                field: "pipeline.deferred_concurrency",
                message: "must be at least 1".to_string(),
            });
        }
        if self.pipeline.deferred_queue_depth == 0 {
            return Err(ConfigError::Invalid {
                field: "pipeline.deferred_queue_depth",
                message: "must be at least 1".to_string(),
            });
        }
        if self.pipeline.external_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "pipeline.external_timeout_secs",
                message: "must be at least 1".to_string(),
            });
        }
        if let Some(supabase) = &self.supabase {
            if supabase.url.is_empty() || supabase.api_key.is_empty() {
                return Err(ConfigError::Invalid {
                    field: "supabase",
                    message: "both url and key are required".to_string(),
                });
            }
        }
        if let Some(ledger) = &self.ledger {
            if ledger.rpc_url.is_empty() || ledger.contract_address.is_empty() || ledger.private_key.is_empty() {
                return Err(ConfigError::Invalid {
                    field: "ledger",
                    message: "rpc url, contract address and private key are required".to_string(),
                });
            }
        }
        Ok(())
    }

    /// SMTP is only used when a sender account and password are both present.
    pub fn smtp_enabled(&self) -> Option<&SmtpConfig> {
        self.smtp
            .as_ref()
            .filter(|smtp| !smtp.username.is_empty() && !smtp.password.is_empty())
    }
}

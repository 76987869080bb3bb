// config.rs - Centralized configuration system

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use once_cell::sync::Lazy;
use log::{debug, warn};

use crate::connectors::common::vault::{CredentialVault, ExchangeCredentials};
use crate::types::config::{ConnectorConfig, RateLimitRule, RetryConfig};
use crate::types::errors::{ConnectorError, ConnectorResult};
use crate::types::exchange::ExchangeType;

/// Global configuration singleton
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Returns a reference to the global configuration.
/// If not yet initialized, uses the default configuration.
pub fn get_config() -> &'static Config {
    CONFIG.get().unwrap_or_else(|| &*DEFAULT_CONFIG)
}

/// Initializes configuration from the given file path.
pub async fn init_config<P: AsRef<Path>>(path: P) -> ConnectorResult<()> {
    let config = Config::from_file(path).await?;
    CONFIG
        .set(config)
        .map_err(|_| ConnectorError::Configuration("configuration already initialized".to_string()))
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub exchanges: HashMap<String, ExchangeSettings>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GeneralConfig {
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: String::from("info"),
        }
    }
}

/// 单个连接器的配置项，键为连接器注册名
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExchangeSettings {
    pub exchange: ExchangeType,
    #[serde(default)]
    pub testnet: bool,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub retry: RetryConfig,
    /// 操作类别 -> 限流规则
    #[serde(default)]
    pub rate_limits: HashMap<String, RateLimitRule>,
    pub default_rate_limit: Option<RateLimitRule>,
    #[serde(default = "default_symbol_cache_ttl_secs")]
    pub symbol_cache_ttl_secs: u64,
    pub rest_api_url: Option<String>,
    // 凭证从环境变量读取，配置文件只记录变量名
    pub api_key_env: Option<String>,
    pub api_secret_env: Option<String>,
    pub passphrase_env: Option<String>,
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_symbol_cache_ttl_secs() -> u64 {
    3600
}

impl ExchangeSettings {
    pub fn new(exchange: ExchangeType) -> Self {
        Self {
            exchange,
            testnet: false,
            request_timeout_secs: default_request_timeout_secs(),
            retry: RetryConfig::default(),
            rate_limits: HashMap::new(),
            default_rate_limit: None,
            symbol_cache_ttl_secs: default_symbol_cache_ttl_secs(),
            rest_api_url: None,
            api_key_env: None,
            api_secret_env: None,
            passphrase_env: None,
        }
    }

    pub fn validate(&self, name: &str) -> ConnectorResult<()> {
        if self.request_timeout_secs == 0 {
            return Err(ConnectorError::Configuration(format!(
                "{name}: request_timeout_secs must be positive"
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConnectorError::Configuration(format!(
                "{name}: retry.max_attempts must be positive"
            )));
        }
        if let Some((key, _)) = self.rate_limits.iter().find(|(_, rule)| rule.window_ms == 0) {
            return Err(ConnectorError::Configuration(format!(
                "{name}: rate limit '{key}' has an empty window"
            )));
        }
        if self.api_key_env.is_some() != self.api_secret_env.is_some() {
            return Err(ConnectorError::Configuration(format!(
                "{name}: api_key_env and api_secret_env must be set together"
            )));
        }
        Ok(())
    }

    /// 生成连接器运行时配置
    pub fn to_connector_config(&self) -> ConnectorConfig {
        let defaults = ConnectorConfig::default();
        ConnectorConfig {
            testnet: self.testnet,
            request_timeout: self.request_timeout_secs,
            retry: self.retry.clone(),
            rate_limits: self.rate_limits.clone(),
            default_rate_limit: self.default_rate_limit.unwrap_or(defaults.default_rate_limit),
            symbol_cache_ttl: self.symbol_cache_ttl_secs,
            rest_api_url: self.rest_api_url.clone(),
        }
    }

    /// 从环境变量读取凭证并存入保险库；未配置变量名时返回 `None`
    pub fn load_credentials(&self, vault: &CredentialVault, name: &str) -> ConnectorResult<Option<ExchangeCredentials>> {
        let (key_env, secret_env) = match (&self.api_key_env, &self.api_secret_env) {
            (Some(key_env), Some(secret_env)) => (key_env, secret_env),
            _ => {
                debug!("[{}] No credential variables configured for {}", self.exchange, name);
                return Ok(None);
            }
        };

        let api_key = read_env(key_env)?;
        let api_secret = read_env(secret_env)?;
        let passphrase = self.passphrase_env.as_deref().map(read_env).transpose()?;

        ExchangeCredentials::seal(
            vault,
            &api_key,
            &api_secret,
            passphrase.as_deref(),
            format!("{name} ({key_env})"),
        )
        .map(Some)
    }
}

fn read_env(var: &str) -> ConnectorResult<String> {
    std::env::var(var).map_err(|e| {
        warn!("Credential variable {} is not available: {}", var, e);
        ConnectorError::Configuration(format!("environment variable {var}: {e}"))
    })
}

/// Default configuration used when no config file is provided.
pub static DEFAULT_CONFIG: Lazy<Config> = Lazy::new(|| {
    let mut bybit = ExchangeSettings::new(ExchangeType::Bybit);
    bybit.testnet = true;
    bybit.api_key_env = Some(String::from("BYBIT_API_KEY"));
    bybit.api_secret_env = Some(String::from("BYBIT_API_SECRET"));

    Config {
        general: GeneralConfig::default(),
        exchanges: HashMap::from([(String::from("bybit"), bybit)]),
    }
});

impl Default for Config {
    fn default() -> Self {
        DEFAULT_CONFIG.clone()
    }
}

impl Config {
    /// Returns a reference to the global configuration singleton.
    pub fn global() -> &'static OnceLock<Config> {
        &CONFIG
    }

    /// Load configuration from a file.
    pub async fn from_file<P: AsRef<Path>>(path: P) -> ConnectorResult<Self> {
        let file_format = path.as_ref().extension().and_then(|os| os.to_str()).map(str::to_string);
        let mut file = File::open(path.as_ref())
            .await
            .map_err(|e| ConnectorError::Configuration(format!("Failed to open config file: {e}")))?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .await
            .map_err(|e| ConnectorError::Configuration(format!("Failed to read config file: {e}")))?;
        Self::parse(&contents, file_format.as_deref())
    }

    /// 按格式名（`toml` / `json` / `yaml` / `yml`）解析配置文本
    pub fn parse(contents: &str, format: Option<&str>) -> ConnectorResult<Self> {
        let config: Config = match format {
            Some("toml") => toml::from_str(contents)
                .map_err(|e| ConnectorError::Configuration(format!("Failed to parse TOML config: {e}"))),
            Some("json") => serde_json::from_str(contents)
                .map_err(|e| ConnectorError::Configuration(format!("Failed to parse JSON config: {e}"))),
            Some("yaml") | Some("yml") => serde_yaml::from_str(contents)
                .map_err(|e| ConnectorError::Configuration(format!("Failed to parse YAML config: {e}"))),
            other => Err(ConnectorError::Configuration(format!(
                "Unsupported config file format: {}",
                other.unwrap_or("<none>")
            ))),
        }?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConnectorResult<()> {
        self.exchanges
            .iter()
            .try_for_each(|(name, settings)| settings.validate(name))
    }

    /// Get exchange settings by connector name.
    pub fn get_exchange_settings(&self, name: &str) -> Option<&ExchangeSettings> {
        self.exchanges.get(name)
    }

    /// 连接器名按字母序返回
    pub fn exchange_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.exchanges.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

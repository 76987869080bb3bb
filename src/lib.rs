// Define modules
pub mod config;  // 配置加载（TOML / JSON / YAML）
pub mod types;  // 标准化类型系统
pub mod connectors;  // 连接器系统

// Re-export key components for easier usage
pub use connectors::{ExchangeInterface, ExchangeManager};
pub use connectors::bybit::BybitConnector;
pub use connectors::common::vault::{AesGcmKeyManager, CredentialVault, ExchangeCredentials, KeyManager};
pub use types::{ConnectorError, ConnectorResult};

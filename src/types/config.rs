// src/types/config.rs - 配置相关类型定义

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// 连接状态
///
/// `Disconnected -> Connecting -> Connected`；ping 失败时 `Connected -> Error -> Disconnected`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionStatus {
    pub fn can_transition_to(&self, next: ConnectionStatus) -> bool {
        use ConnectionStatus::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Error)
                | (Connected, Error)
                | (Connected, Connecting)
                | (Error, Disconnected)
        )
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ConnectionStatus::Disconnected => write!(f, "DISCONNECTED"),
            ConnectionStatus::Connecting => write!(f, "CONNECTING"),
            ConnectionStatus::Connected => write!(f, "CONNECTED"),
            ConnectionStatus::Error => write!(f, "ERROR"),
        }
    }
}

/// 重试策略配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// 总尝试次数（含首次）
    pub max_attempts: u32,
    /// 基础退避间隔（毫秒）
    pub base_delay_ms: u64,
    /// 最大退避间隔（毫秒）
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 8000,
        }
    }
}

/// 单个操作类别的限流规则：`window_ms` 内最多 `max_requests` 次
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRule {
    pub max_requests: u32,
    pub window_ms: u64,
}

impl RateLimitRule {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window_ms: window.as_millis() as u64,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// 连接器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorConfig {
    pub testnet: bool,
    pub request_timeout: u64, // 单次请求超时（秒）
    pub retry: RetryConfig,
    /// 操作类别 -> 限流规则，未列出的类别使用 `default_rate_limit`
    pub rate_limits: HashMap<String, RateLimitRule>,
    pub default_rate_limit: RateLimitRule,
    pub symbol_cache_ttl: u64, // 交易对元数据缓存TTL（秒）
    pub rest_api_url: Option<String>,
}

impl ConnectorConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    pub fn symbol_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.symbol_cache_ttl)
    }
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            testnet: false,
            request_timeout: 30,
            retry: RetryConfig::default(),
            rate_limits: HashMap::new(),
            default_rate_limit: RateLimitRule {
                max_requests: 50,
                window_ms: 1000,
            },
            symbol_cache_ttl: 3600,
            rest_api_url: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_transitions() {
        use ConnectionStatus::*;
        assert!(Disconnected.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Connected));
        assert!(Connected.can_transition_to(Error));
        assert!(Error.can_transition_to(Disconnected));
        assert!(!Disconnected.can_transition_to(Connected));
        assert!(!Error.can_transition_to(Connected));
    }

    #[test]
    fn test_default_connector_config() {
        let config = ConnectorConfig::default();
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.symbol_cache_ttl(), Duration::from_secs(3600));
        assert_eq!(config.retry.max_attempts, 3);
    }
}

// src/types/errors.rs - 错误类型定义

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 连接器统一返回类型
pub type ConnectorResult<T> = std::result::Result<T, ConnectorError>;

/// 连接器错误类型
///
/// `Http` 是传输层错误（HTTP 4xx/5xx），`VenueBusiness` 是交易所业务层错误
/// （`ret_code != 0`），两者对调用方可区分。
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum ConnectorError {
    // 认证相关错误：缺少/无效凭证、签名被拒绝，不重试
    #[error("Authentication failed: {0}")]
    Authentication(String),

    // 调用方输入错误，发生在任何网络I/O之前
    #[error("Validation error: {0}")]
    Validation(String),

    // 交易所限流，重试耗尽后返回
    #[error("Rate limit exceeded after {attempts} attempt(s): {message}")]
    RateLimitExceeded { message: String, attempts: u32 },

    // 连接失败/超时，重试耗尽后返回
    #[error("Transient network error after {attempts} attempt(s): {message}")]
    TransientNetwork { message: String, attempts: u32 },

    // 非零 ret_code 且不可重试
    #[error("Venue error {code}: {message}")]
    VenueBusiness { code: i64, message: String },

    // 提现开关未打开
    #[error("Security gate: {0}")]
    SecurityGate(String),

    // HTTP 层错误
    #[error("HTTP {status} after {attempts} attempt(s): {body}")]
    Http { status: u16, body: String, attempts: u32 },

    // 该交易所不支持的操作或枚举值
    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Data parsing error: {0}")]
    DataParsing(String),

    // 凭证保险库错误（解密失败、句柄不存在）
    #[error("Vault error: {0}")]
    Vault(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Exchange not found: {0}")]
    ExchangeNotFound(String),

    // 调用方截止时间已到，不再重试
    #[error("Deadline exceeded after {attempts} attempt(s)")]
    DeadlineExceeded { attempts: u32 },
}

impl ConnectorError {
    /// 是否属于可在管道内重试的错误
    pub fn is_retryable(&self) -> bool {
        match self {
            ConnectorError::RateLimitExceeded { .. } | ConnectorError::TransientNetwork { .. } => true,
            ConnectorError::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// 管道在重试耗尽时写入最终尝试次数
    pub(crate) fn with_attempts(self, total: u32) -> Self {
        match self {
            ConnectorError::RateLimitExceeded { message, .. } => {
                ConnectorError::RateLimitExceeded { message, attempts: total }
            }
            ConnectorError::TransientNetwork { message, .. } => {
                ConnectorError::TransientNetwork { message, attempts: total }
            }
            ConnectorError::Http { status, body, .. } => ConnectorError::Http { status, body, attempts: total },
            other => other,
        }
    }

    /// 错误携带的尝试次数（不经过重试的错误返回 None）
    pub fn attempts(&self) -> Option<u32> {
        match self {
            ConnectorError::RateLimitExceeded { attempts, .. }
            | ConnectorError::TransientNetwork { attempts, .. }
            | ConnectorError::Http { attempts, .. }
            | ConnectorError::DeadlineExceeded { attempts } => Some(*attempts),
            _ => None,
        }
    }

    /// 调用方错误（参数校验、安全闸门），传输层不应以 warn 级别记录
    pub fn is_caller_error(&self) -> bool {
        matches!(self, ConnectorError::Validation(_) | ConnectorError::SecurityGate(_))
    }
}

impl From<serde_json::Error> for ConnectorError {
    fn from(err: serde_json::Error) -> Self {
        ConnectorError::DataParsing(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ConnectorError::TransientNetwork { message: "reset".into(), attempts: 1 }.is_retryable());
        assert!(ConnectorError::RateLimitExceeded { message: "10006".into(), attempts: 1 }.is_retryable());
        assert!(ConnectorError::Http { status: 502, body: String::new(), attempts: 1 }.is_retryable());
        assert!(!ConnectorError::Http { status: 400, body: String::new(), attempts: 1 }.is_retryable());
        assert!(!ConnectorError::Authentication("bad sign".into()).is_retryable());
        assert!(!ConnectorError::Validation("qty".into()).is_retryable());
        assert!(!ConnectorError::VenueBusiness { code: 30010, message: "insufficient".into() }.is_retryable());
    }

    #[test]
    fn test_with_attempts_only_touches_retried_variants() {
        let err = ConnectorError::TransientNetwork { message: "timeout".into(), attempts: 1 }.with_attempts(3);
        assert_eq!(err.attempts(), Some(3));

        let err = ConnectorError::Authentication("x".into()).with_attempts(3);
        assert_eq!(err.attempts(), None);
    }
}

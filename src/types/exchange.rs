// src/types/exchange.rs - 交易所类型定义

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::errors::ConnectorError;

/// 交易所类型枚举
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeType {
    Bybit,
}

impl ExchangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeType::Bybit => "bybit",
        }
    }
}

impl fmt::Display for ExchangeType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ExchangeType::Bybit => write!(f, "BYBIT"),
        }
    }
}

impl FromStr for ExchangeType {
    type Err = ConnectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bybit" => Ok(ExchangeType::Bybit),
            other => Err(ConnectorError::ExchangeNotFound(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_exchange_type() {
        assert_eq!("Bybit".parse::<ExchangeType>().unwrap(), ExchangeType::Bybit);
        assert!(matches!("kraken".parse::<ExchangeType>(), Err(ConnectorError::ExchangeNotFound(_))));
        assert_eq!(ExchangeType::Bybit.to_string(), "BYBIT");
    }
}

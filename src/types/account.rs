//! 账户相关类型定义

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::errors::{ConnectorError, ConnectorResult};
use super::exchange::ExchangeType;

/// 单个资产余额
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetBalance {
    /// 可用余额
    free: Decimal,
    /// 冻结余额
    locked: Decimal,
}

impl AssetBalance {
    /// 构造资产余额，任一分量为负时返回错误
    pub fn new(free: Decimal, locked: Decimal) -> ConnectorResult<Self> {
        if free < Decimal::ZERO || locked < Decimal::ZERO {
            return Err(ConnectorError::DataParsing(format!(
                "negative balance component: free={free}, locked={locked}"
            )));
        }
        if free.checked_add(locked).is_none() {
            return Err(ConnectorError::DataParsing(format!(
                "balance total out of range: free={free}, locked={locked}"
            )));
        }
        Ok(Self { free, locked })
    }

    pub fn free(&self) -> Decimal {
        self.free
    }

    pub fn locked(&self) -> Decimal {
        self.locked
    }

    pub fn total(&self) -> Decimal {
        self.free + self.locked
    }
}

/// 账户余额快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub exchange: ExchangeType,
    balances: HashMap<String, AssetBalance>,
    pub timestamp: DateTime<Utc>,
}

impl AccountBalance {
    pub fn new(exchange: ExchangeType, balances: HashMap<String, AssetBalance>, timestamp: DateTime<Utc>) -> Self {
        Self {
            exchange,
            balances,
            timestamp,
        }
    }

    pub fn get(&self, asset: &str) -> Option<&AssetBalance> {
        self.balances.get(asset)
    }

    pub fn get_free_balance(&self, asset: &str) -> Decimal {
        self.get(asset).map(AssetBalance::free).unwrap_or(Decimal::ZERO)
    }

    pub fn get_locked_balance(&self, asset: &str) -> Decimal {
        self.get(asset).map(AssetBalance::locked).unwrap_or(Decimal::ZERO)
    }

    pub fn get_total_balance(&self, asset: &str) -> Decimal {
        self.get(asset).map(AssetBalance::total).unwrap_or(Decimal::ZERO)
    }

    /// 按字母序返回资产列表
    pub fn assets(&self) -> Vec<&str> {
        let mut assets: Vec<&str> = self.balances.keys().map(String::as_str).collect();
        assets.sort_unstable();
        assets
    }

    /// 总额大于零的资产
    pub fn non_zero(&self) -> impl Iterator<Item = (&str, &AssetBalance)> {
        self.balances
            .iter()
            .filter(|(_, balance)| balance.total() > Decimal::ZERO)
            .map(|(asset, balance)| (asset.as_str(), balance))
    }
}

/// 提现请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WithdrawalRequest {
    pub asset: String,
    pub address: String,
    pub amount: Decimal,
    pub tag: Option<String>,
}

impl WithdrawalRequest {
    pub fn validate(&self) -> ConnectorResult<()> {
        if self.asset.trim().is_empty() {
            return Err(ConnectorError::Validation("asset must not be empty".to_string()));
        }
        if self.address.trim().is_empty() {
            return Err(ConnectorError::Validation("address must not be empty".to_string()));
        }
        if self.amount <= Decimal::ZERO {
            return Err(ConnectorError::Validation(format!(
                "withdrawal amount must be positive, got {}",
                self.amount
            )));
        }
        Ok(())
    }
}

/// 提现状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WithdrawalStatus {
    Pending,
    Processing,
    Completed,
    Rejected,
    Canceled,
}

/// 提现记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WithdrawalRecord {
    pub withdrawal_id: String,
    pub asset: String,
    pub amount: Decimal,
    pub fee: Option<Decimal>,
    pub address: Option<String>,
    pub tx_id: Option<String>,
    pub status: WithdrawalStatus,
    pub submitted_at: Option<DateTime<Utc>>,
}

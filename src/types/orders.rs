// src/types/orders.rs - 订单相关类型定义

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::errors::{ConnectorError, ConnectorResult};

/// 订单方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

/// 订单类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
    StopLoss,
    StopLossLimit,
    TakeProfit,
    TakeProfitLimit,
    LimitMaker,
    Oco,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "market",
            OrderType::Limit => "limit",
            OrderType::StopLoss => "stop_loss",
            OrderType::StopLossLimit => "stop_loss_limit",
            OrderType::TakeProfit => "take_profit",
            OrderType::TakeProfitLimit => "take_profit_limit",
            OrderType::LimitMaker => "limit_maker",
            OrderType::Oco => "oco",
        }
    }

    /// 需要限价的订单类型
    pub fn requires_price(&self) -> bool {
        matches!(
            self,
            OrderType::Limit
                | OrderType::StopLossLimit
                | OrderType::TakeProfitLimit
                | OrderType::LimitMaker
                | OrderType::Oco
        )
    }
}

/// 订单有效期
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeInForce {
    GTC, // Good Till Cancel
    IOC, // Immediate Or Cancel
    FOK, // Fill Or Kill
    PostOnly,
}

/// 订单状态
///
/// `New` 可转入任意后续状态；`PartiallyFilled` 只能转入 `Filled`/`Canceled`；
/// `PendingCancel` 最终落到 `Canceled` 或 `Filled`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    PendingCancel,
    Rejected,
    Expired,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Rejected | OrderStatus::Expired
        )
    }

    /// 未终结的订单（挂单）
    pub fn is_open(&self) -> bool {
        !self.is_terminal()
    }

    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        match (self, next) {
            (New, PartiallyFilled | Filled | Canceled | PendingCancel | Rejected | Expired) => true,
            (PartiallyFilled, Filled | Canceled) => true,
            (PendingCancel, Canceled | Filled) => true,
            _ => false,
        }
    }
}

/// 下单请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub time_in_force: Option<TimeInForce>,
    pub client_order_id: Option<String>,
}

impl OrderRequest {
    pub fn market(symbol: impl Into<String>, side: OrderSide, quantity: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Market,
            quantity,
            price: None,
            time_in_force: None,
            client_order_id: None,
        }
    }

    pub fn limit(symbol: impl Into<String>, side: OrderSide, quantity: Decimal, price: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Limit,
            quantity,
            price: Some(price),
            time_in_force: None,
            client_order_id: None,
        }
    }

    pub fn with_time_in_force(mut self, time_in_force: TimeInForce) -> Self {
        self.time_in_force = Some(time_in_force);
        self
    }

    pub fn with_client_order_id(mut self, client_order_id: impl Into<String>) -> Self {
        self.client_order_id = Some(client_order_id.into());
        self
    }

    /// 下单前校验，失败时不会产生任何网络请求
    pub fn validate(&self) -> ConnectorResult<()> {
        if self.symbol.trim().is_empty() {
            return Err(ConnectorError::Validation("symbol must not be empty".to_string()));
        }
        if self.quantity <= Decimal::ZERO {
            return Err(ConnectorError::Validation(format!(
                "quantity must be positive, got {}",
                self.quantity
            )));
        }
        if self.order_type.requires_price() {
            match self.price {
                Some(price) if price > Decimal::ZERO => {}
                Some(price) => {
                    return Err(ConnectorError::Validation(format!(
                        "price must be positive for {} orders, got {}",
                        self.order_type.as_str(),
                        price
                    )))
                }
                None => {
                    return Err(ConnectorError::Validation(format!(
                        "price is required for {} orders",
                        self.order_type.as_str()
                    )))
                }
            }
        } else if let Some(price) = self.price {
            if price <= Decimal::ZERO {
                return Err(ConnectorError::Validation(format!("price must be positive, got {price}")));
            }
        }
        Ok(())
    }
}

/// 标准化订单快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub time_in_force: Option<TimeInForce>,
    pub exchange_order_id: Option<String>,
    pub client_order_id: Option<String>,
    pub status: OrderStatus,
    pub filled_quantity: Option<Decimal>,
    pub average_price: Option<Decimal>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }

    /// 剩余数量（未知成交量时返回 None）
    pub fn remaining_quantity(&self) -> Option<Decimal> {
        self.filled_quantity.map(|filled| (self.quantity - filled).max(Decimal::ZERO))
    }
}

/// 账户成交记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub symbol: String,
    pub trade_id: String,
    pub order_id: String,
    pub side: OrderSide,
    pub price: Decimal,
    pub quantity: Decimal,
    pub fee: Option<Decimal>,
    pub fee_asset: Option<String>,
    pub is_maker: Option<bool>,
    pub timestamp: DateTime<Utc>,
}

/// 历史订单/成交查询条件
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryQuery {
    pub symbol: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
}

impl HistoryQuery {
    pub fn for_symbol(symbol: impl Into<String>) -> Self {
        Self {
            symbol: Some(symbol.into()),
            ..Default::default()
        }
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn validate(&self) -> ConnectorResult<()> {
        if let (Some(start), Some(end)) = (self.start_time, self.end_time) {
            if start > end {
                return Err(ConnectorError::Validation(format!(
                    "start_time {start} is after end_time {end}"
                )));
            }
        }
        if self.limit == Some(0) {
            return Err(ConnectorError::Validation("limit must be positive".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_limit_order_requires_positive_price() {
        let ok = OrderRequest::limit("BTC/USDC", OrderSide::Buy, dec!(0.1), dec!(50000));
        assert!(ok.validate().is_ok());

        let negative = OrderRequest::limit("BTC/USDC", OrderSide::Buy, dec!(0.1), dec!(-1));
        assert!(matches!(negative.validate(), Err(ConnectorError::Validation(_))));

        let mut missing = ok.clone();
        missing.order_type = OrderType::StopLossLimit;
        missing.price = None;
        assert!(matches!(missing.validate(), Err(ConnectorError::Validation(_))));
    }

    #[test]
    fn test_quantity_must_be_positive() {
        let zero = OrderRequest::market("BTC/USDC", OrderSide::Sell, Decimal::ZERO);
        assert!(matches!(zero.validate(), Err(ConnectorError::Validation(_))));
        let market = OrderRequest::market("BTC/USDC", OrderSide::Sell, dec!(1));
        assert!(market.validate().is_ok());
    }

    #[test]
    fn test_status_transitions() {
        use OrderStatus::*;
        assert!(New.can_transition_to(PartiallyFilled));
        assert!(New.can_transition_to(Rejected));
        assert!(PartiallyFilled.can_transition_to(Filled));
        assert!(PartiallyFilled.can_transition_to(Canceled));
        assert!(!PartiallyFilled.can_transition_to(Rejected));
        assert!(!Filled.can_transition_to(Canceled));
        assert!(!Canceled.can_transition_to(New));

        for status in [Filled, Canceled, Rejected, Expired] {
            assert!(status.is_terminal());
        }
        for status in [New, PartiallyFilled, PendingCancel] {
            assert!(status.is_open());
        }
    }

    #[test]
    fn test_history_query_rejects_inverted_range() {
        let now = Utc::now();
        let query = HistoryQuery {
            start_time: Some(now),
            end_time: Some(now - chrono::Duration::hours(1)),
            ..Default::default()
        };
        assert!(query.validate().is_err());
        assert!(HistoryQuery::for_symbol("ETH/USDT").with_limit(0).validate().is_err());
    }
}

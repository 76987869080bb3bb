// src/types/mod.rs - 标准化类型系统

pub mod exchange;
pub mod market_data;
pub mod orders;
pub mod errors;
pub mod config;
pub mod account;

pub use exchange::ExchangeType;
pub use market_data::{Kline, KlineInterval, OrderBook, PriceLevel, PublicTrade, SymbolInfo, Ticker, TradeSide};
pub use orders::{HistoryQuery, Order, OrderRequest, OrderSide, OrderStatus, OrderType, TimeInForce, TradeRecord};
pub use errors::{ConnectorError, ConnectorResult};
pub use config::{ConnectionStatus, ConnectorConfig, RateLimitRule, RetryConfig};

// 账户相关类型
pub use account::{AccountBalance, AssetBalance, WithdrawalRecord, WithdrawalRequest, WithdrawalStatus};

//! Bybit 枚举与交易对映射表
//!
//! 出站方向遇到交易所不支持的值返回 `Unsupported`，入站方向遇到未知字符串返回 `DataParsing`。

use log::debug;

use crate::connectors::common::symbol_cache::SymbolTable;
use crate::types::errors::{ConnectorError, ConnectorResult};
use crate::types::market_data::{KlineInterval, TradeSide};
use crate::types::orders::{OrderSide, OrderStatus, OrderType, TimeInForce};
use crate::types::account::WithdrawalStatus;

/// 拆分交易所交易对时识别的报价币种，长的优先
const KNOWN_QUOTES: [&str; 8] = ["USDT", "USDC", "BUSD", "DAI", "USD", "BTC", "ETH", "EUR"];

pub fn side_to_venue(side: OrderSide) -> &'static str {
    match side {
        OrderSide::Buy => "Buy",
        OrderSide::Sell => "Sell",
    }
}

pub fn side_from_venue(token: &str) -> ConnectorResult<OrderSide> {
    match token {
        "Buy" => Ok(OrderSide::Buy),
        "Sell" => Ok(OrderSide::Sell),
        other => Err(ConnectorError::DataParsing(format!("unknown Bybit side: {other}"))),
    }
}

pub fn trade_side_from_venue(token: &str) -> ConnectorResult<TradeSide> {
    side_from_venue(token).map(|side| match side {
        OrderSide::Buy => TradeSide::Buy,
        OrderSide::Sell => TradeSide::Sell,
    })
}

/// 出站订单类型；`LimitMaker` 以 `Limit` + `PostOnly` 下单
pub fn order_type_to_venue(order_type: OrderType) -> ConnectorResult<&'static str> {
    match order_type {
        OrderType::Market => Ok("Market"),
        OrderType::Limit | OrderType::LimitMaker => Ok("Limit"),
        other => Err(ConnectorError::Unsupported(format!(
            "order type {} is not supported by Bybit",
            other.as_str()
        ))),
    }
}

pub fn order_type_from_venue(token: &str) -> ConnectorResult<OrderType> {
    match token {
        "Market" => Ok(OrderType::Market),
        "Limit" => Ok(OrderType::Limit),
        other => Err(ConnectorError::DataParsing(format!("unknown Bybit order type: {other}"))),
    }
}

pub fn time_in_force_to_venue(tif: TimeInForce) -> &'static str {
    match tif {
        TimeInForce::GTC => "GoodTillCancel",
        TimeInForce::IOC => "ImmediateOrCancel",
        TimeInForce::FOK => "FillOrKill",
        TimeInForce::PostOnly => "PostOnly",
    }
}

pub fn time_in_force_from_venue(token: &str) -> ConnectorResult<TimeInForce> {
    match token {
        "GoodTillCancel" => Ok(TimeInForce::GTC),
        "ImmediateOrCancel" => Ok(TimeInForce::IOC),
        "FillOrKill" => Ok(TimeInForce::FOK),
        "PostOnly" => Ok(TimeInForce::PostOnly),
        other => Err(ConnectorError::DataParsing(format!("unknown Bybit time in force: {other}"))),
    }
}

pub fn order_status_from_venue(token: &str) -> ConnectorResult<OrderStatus> {
    match token {
        "Created" | "New" | "Untriggered" => Ok(OrderStatus::New),
        "PartiallyFilled" => Ok(OrderStatus::PartiallyFilled),
        "Filled" => Ok(OrderStatus::Filled),
        "Cancelled" => Ok(OrderStatus::Canceled),
        "PendingCancel" => Ok(OrderStatus::PendingCancel),
        "Rejected" => Ok(OrderStatus::Rejected),
        "Deactivated" => Ok(OrderStatus::Expired),
        other => Err(ConnectorError::DataParsing(format!("unknown Bybit order status: {other}"))),
    }
}

pub fn withdrawal_status_from_venue(token: &str) -> ConnectorResult<WithdrawalStatus> {
    match token {
        "ToBeConfirmed" | "UnderReview" | "Pending" => Ok(WithdrawalStatus::Pending),
        "Processing" => Ok(WithdrawalStatus::Processing),
        "Success" => Ok(WithdrawalStatus::Completed),
        "Reject" | "Expire" => Ok(WithdrawalStatus::Rejected),
        "CancelByUser" => Ok(WithdrawalStatus::Canceled),
        other => Err(ConnectorError::DataParsing(format!("unknown Bybit withdrawal status: {other}"))),
    }
}

pub fn kline_interval_to_venue(interval: KlineInterval) -> &'static str {
    match interval {
        KlineInterval::OneMinute => "1",
        KlineInterval::FiveMinutes => "5",
        KlineInterval::FifteenMinutes => "15",
        KlineInterval::OneHour => "60",
        KlineInterval::FourHours => "240",
        KlineInterval::OneDay => "D",
        KlineInterval::OneWeek => "W",
    }
}

/// K线周期长度（秒），用于计算查询起点
pub fn kline_interval_secs(interval: KlineInterval) -> i64 {
    match interval {
        KlineInterval::OneMinute => 60,
        KlineInterval::FiveMinutes => 300,
        KlineInterval::FifteenMinutes => 900,
        KlineInterval::OneHour => 3_600,
        KlineInterval::FourHours => 14_400,
        KlineInterval::OneDay => 86_400,
        KlineInterval::OneWeek => 604_800,
    }
}

/// `BTC/USDC` -> `BTCUSDC`
pub fn to_venue_symbol(symbol: &str, table: Option<&SymbolTable>) -> ConnectorResult<String> {
    if let Some(info) = table.and_then(|t| t.get(symbol)) {
        return Ok(info.venue_symbol.clone());
    }

    match symbol.split_once('/') {
        Some((base, quote)) if !base.trim().is_empty() && !quote.trim().is_empty() && !quote.contains('/') => {
            Ok(format!("{}{}", base.trim(), quote.trim()).to_uppercase())
        }
        _ => Err(ConnectorError::Validation(format!(
            "symbol must use BASE/QUOTE format, got '{symbol}'"
        ))),
    }
}

/// `BTCUSDC` -> `BTC/USDC`：先查元数据，再按已知报价币种拆分，都失败时原样返回
pub fn from_venue_symbol(venue_symbol: &str, table: Option<&SymbolTable>) -> String {
    if let Some(info) = table.and_then(|t| t.resolve_venue(venue_symbol)) {
        return info.symbol.clone();
    }

    split_venue_symbol(venue_symbol)
        .map(|(base, quote)| format!("{base}/{quote}"))
        .unwrap_or_else(|| {
            debug!("[Bybit] Cannot split venue symbol '{}', keeping as-is", venue_symbol);
            venue_symbol.to_string()
        })
}

/// 按已知报价币种后缀拆分
pub fn split_venue_symbol(venue_symbol: &str) -> Option<(&str, &str)> {
    KNOWN_QUOTES.iter().find_map(|quote| {
        venue_symbol
            .strip_suffix(quote)
            .filter(|base| !base.is_empty())
            .map(|base| (base, &venue_symbol[base.len()..]))
    })
}

//! Bybit 响应解析
//!
//! 所有交易所 JSON 在这里转换为标准化类型。数值字段可能是字符串也可能是数字，统一转为 `Decimal`；
//! 缺失或空字段为 `None`，格式错误返回 `DataParsing`。

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde_json::Value;

use super::mappings::{
    order_status_from_venue, order_type_from_venue, side_from_venue, time_in_force_from_venue,
    trade_side_from_venue, withdrawal_status_from_venue,
};
use crate::connectors::common::pipeline::EnvelopeParser;
use crate::types::account::{AccountBalance, AssetBalance, WithdrawalRecord};
use crate::types::errors::{ConnectorError, ConnectorResult};
use crate::types::exchange::ExchangeType;
use crate::types::market_data::{Kline, KlineInterval, OrderBook, PublicTrade, SymbolInfo, Ticker};
use crate::types::orders::{Order, TradeRecord};

// 限流
const RATE_LIMIT_CODES: [i64; 2] = [10006, 10018];
// 服务繁忙 / 时间戳超出接收窗口（重签后可恢复）
const TRANSIENT_CODES: [i64; 2] = [10016, 10002];
// 无效 key / 签名错误 / 权限不足 / 未授权的 IP
const AUTH_CODES: [i64; 4] = [10003, 10004, 10005, 33004];

/// `{ret_code, ret_msg, result}` 响应包解析
#[derive(Debug, Clone, Copy, Default)]
pub struct BybitEnvelopeParser;

impl EnvelopeParser for BybitEnvelopeParser {
    fn parse(&self, body: &str) -> ConnectorResult<Value> {
        let envelope: Value = serde_json::from_str(body)?;
        let code = envelope
            .get("ret_code")
            .and_then(Value::as_i64)
            .ok_or_else(|| ConnectorError::DataParsing("response has no ret_code".to_string()))?;
        let message = envelope
            .get("ret_msg")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        if code == 0 {
            let mut result = envelope.get("result").cloned().unwrap_or(Value::Null);
            // 服务器时间只出现在响应包顶层
            if let Some(time_now) = envelope.get("time_now") {
                if result.is_null() {
                    result = Value::Object(serde_json::Map::new());
                }
                if let Value::Object(map) = &mut result {
                    map.entry("time_now").or_insert_with(|| time_now.clone());
                }
            }
            return Ok(result);
        }

        let detail = format!("{code}: {message}");
        if RATE_LIMIT_CODES.contains(&code) {
            Err(ConnectorError::RateLimitExceeded {
                message: detail,
                attempts: 1,
            })
        } else if TRANSIENT_CODES.contains(&code) {
            Err(ConnectorError::TransientNetwork {
                message: detail,
                attempts: 1,
            })
        } else if AUTH_CODES.contains(&code) {
            Err(ConnectorError::Authentication(detail))
        } else {
            Err(ConnectorError::VenueBusiness { code, message })
        }
    }
}

fn missing(field: &str) -> ConnectorError {
    ConnectorError::DataParsing(format!("missing field '{field}'"))
}

fn decimal_from_text(text: &str, field: &str) -> ConnectorResult<Decimal> {
    Decimal::from_str(text)
        .or_else(|_| Decimal::from_scientific(text))
        .map_err(|_| ConnectorError::DataParsing(format!("field '{field}' is not a decimal: {text}")))
}

fn opt_decimal(value: &Value, field: &str) -> ConnectorResult<Option<Decimal>> {
    match value.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => decimal_from_text(s.trim(), field).map(Some),
        Some(Value::Number(n)) => decimal_from_text(&n.to_string(), field).map(Some),
        Some(other) => Err(ConnectorError::DataParsing(format!(
            "field '{field}' has unexpected type: {other}"
        ))),
    }
}

fn decimal(value: &Value, field: &str) -> ConnectorResult<Decimal> {
    opt_decimal(value, field)?.ok_or_else(|| missing(field))
}

fn str_field<'a>(value: &'a Value, field: &str) -> ConnectorResult<&'a str> {
    value.get(field).and_then(Value::as_str).ok_or_else(|| missing(field))
}

/// 字符串或数字形式的标识符；空串视为缺失
fn opt_id(value: &Value, field: &str) -> Option<String> {
    match value.get(field) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

fn opt_rfc3339(value: &Value, field: &str) -> ConnectorResult<Option<DateTime<Utc>>> {
    match value.get(field).and_then(Value::as_str) {
        None => Ok(None),
        Some(s) if s.is_empty() => Ok(None),
        Some(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|e| ConnectorError::DataParsing(format!("field '{field}' is not RFC 3339: {e}"))),
    }
}

fn from_millis(ms: i64) -> ConnectorResult<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| ConnectorError::DataParsing(format!("timestamp out of range: {ms}")))
}

fn as_array<'a>(value: &'a Value, what: &str) -> ConnectorResult<&'a Vec<Value>> {
    value
        .as_array()
        .ok_or_else(|| ConnectorError::DataParsing(format!("{what}: expected an array")))
}

/// 分页列表：`result` 可能是数组，也可能是 `{data: [...]}`；`data` 为 null 表示空列表
fn paged_items<'a>(result: &'a Value, key: &str) -> ConnectorResult<Vec<&'a Value>> {
    match result {
        Value::Array(items) => Ok(items.iter().collect()),
        Value::Null => Ok(Vec::new()),
        Value::Object(map) => match map.get(key) {
            Some(Value::Array(items)) => Ok(items.iter().collect()),
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(_) => Err(ConnectorError::DataParsing(format!("'{key}' is not an array"))),
        },
        _ => Err(ConnectorError::DataParsing("unexpected list payload".to_string())),
    }
}

/// `time_now` 为秒级小数字符串，例如 `"1577444332.192859"`
pub fn parse_server_time(result: &Value) -> ConnectorResult<DateTime<Utc>> {
    let seconds = decimal(result, "time_now")?;
    let out_of_range = || ConnectorError::DataParsing(format!("time_now out of range: {seconds}"));
    let millis = seconds.checked_mul(Decimal::from(1000)).ok_or_else(out_of_range)?.trunc();
    let millis = i64::try_from(millis).map_err(|_| out_of_range())?;
    from_millis(millis)
}

pub fn parse_ticker(result: &Value, venue_symbol: &str, symbol: &str) -> ConnectorResult<Ticker> {
    let entry = as_array(result, "tickers")?
        .iter()
        .find(|item| item.get("symbol").and_then(Value::as_str) == Some(venue_symbol))
        .ok_or_else(|| ConnectorError::DataParsing(format!("no ticker for {venue_symbol}")))?;

    Ok(Ticker {
        symbol: symbol.to_string(),
        last_price: decimal(entry, "last_price")?,
        bid_price: opt_decimal(entry, "bid_price")?,
        ask_price: opt_decimal(entry, "ask_price")?,
        high_24h: opt_decimal(entry, "high_price_24h")?,
        low_24h: opt_decimal(entry, "low_price_24h")?,
        volume_24h: opt_decimal(entry, "volume_24h")?,
        change_24h: opt_decimal(entry, "price_24h_pcnt")?,
        timestamp: Utc::now(),
    })
}

pub fn parse_order_book(result: &Value, symbol: &str, depth: usize) -> ConnectorResult<OrderBook> {
    let mut bids = Vec::new();
    let mut asks = Vec::new();

    for level in as_array(result, "order book")? {
        let price = decimal(level, "price")?;
        let size = decimal(level, "size")?;
        match str_field(level, "side")? {
            "Buy" => bids.push((price, size)),
            "Sell" => asks.push((price, size)),
            other => return Err(ConnectorError::DataParsing(format!("unknown book side: {other}"))),
        }
    }

    Ok(OrderBook::new(symbol, bids, asks, Utc::now()).truncated(depth))
}

pub fn parse_recent_trades(result: &Value, symbol: &str) -> ConnectorResult<Vec<PublicTrade>> {
    as_array(result, "trading records")?
        .iter()
        .map(|item| {
            Ok(PublicTrade {
                symbol: symbol.to_string(),
                trade_id: opt_id(item, "id").ok_or_else(|| missing("id"))?,
                price: decimal(item, "price")?,
                quantity: decimal(item, "qty")?,
                side: trade_side_from_venue(str_field(item, "side")?)?,
                timestamp: opt_rfc3339(item, "time")?.ok_or_else(|| missing("time"))?,
            })
        })
        .collect()
}

pub fn parse_klines(result: &Value, symbol: &str, interval: KlineInterval) -> ConnectorResult<Vec<Kline>> {
    as_array(result, "klines")?
        .iter()
        .map(|item| {
            let open_secs = item
                .get("open_time")
                .and_then(Value::as_i64)
                .ok_or_else(|| missing("open_time"))?;
            Ok(Kline {
                symbol: symbol.to_string(),
                interval,
                open_time: from_millis(open_secs.saturating_mul(1000))?,
                open: decimal(item, "open")?,
                high: decimal(item, "high")?,
                low: decimal(item, "low")?,
                close: decimal(item, "close")?,
                volume: decimal(item, "volume")?,
            })
        })
        .collect()
}

pub fn parse_symbols(result: &Value) -> ConnectorResult<Vec<SymbolInfo>> {
    as_array(result, "symbols")?
        .iter()
        .map(|item| {
            let base = str_field(item, "base_currency")?.to_uppercase();
            let quote = str_field(item, "quote_currency")?.to_uppercase();
            let price_filter = item.get("price_filter").unwrap_or(&Value::Null);
            let lot_filter = item.get("lot_size_filter").unwrap_or(&Value::Null);

            Ok(SymbolInfo {
                symbol: format!("{base}/{quote}"),
                venue_symbol: str_field(item, "name")?.to_string(),
                base_asset: base,
                quote_asset: quote,
                tick_size: opt_decimal(price_filter, "tick_size")?,
                min_quantity: opt_decimal(lot_filter, "min_trading_qty")?,
                max_quantity: opt_decimal(lot_filter, "max_trading_qty")?,
                quantity_step: opt_decimal(lot_filter, "qty_step")?,
                trading: item.get("status").and_then(Value::as_str).map_or(true, |s| s == "Trading"),
            })
        })
        .collect()
}

/// 钱包余额：可用 = `available_balance`，冻结 = `used_margin`
pub fn parse_balance(result: &Value) -> ConnectorResult<AccountBalance> {
    let coins = result
        .as_object()
        .ok_or_else(|| ConnectorError::DataParsing("wallet balance: expected an object".to_string()))?;

    let mut balances = HashMap::with_capacity(coins.len());
    // 只取对象形式的币种条目，跳过注入的 time_now
    for (coin, detail) in coins.iter().filter(|(_, detail)| detail.is_object()) {
        let free = decimal(detail, "available_balance")?;
        let locked = decimal(detail, "used_margin")?;
        balances.insert(coin.to_uppercase(), AssetBalance::new(free, locked)?);
    }

    Ok(AccountBalance::new(ExchangeType::Bybit, balances, Utc::now()))
}

/// 单个订单；`symbol_of` 把交易所交易对还原为统一格式
pub fn parse_order(item: &Value, symbol_of: &dyn Fn(&str) -> String) -> ConnectorResult<Order> {
    let order_id = opt_id(item, "order_id").or_else(|| opt_id(item, "clOrdID"));
    let quantity = decimal(item, "qty")?;
    let filled_quantity = opt_decimal(item, "cum_exec_qty")?;
    let cum_value = opt_decimal(item, "cum_exec_value")?;

    let average_price = match (cum_value, filled_quantity) {
        (Some(value), Some(filled)) if filled > Decimal::ZERO && value > Decimal::ZERO => {
            Some(value.checked_div(filled).ok_or_else(|| {
                ConnectorError::DataParsing(format!("average price out of range: {value} / {filled}"))
            })?)
        }
        _ => None,
    };

    Ok(Order {
        symbol: symbol_of(str_field(item, "symbol")?),
        side: side_from_venue(str_field(item, "side")?)?,
        order_type: order_type_from_venue(str_field(item, "order_type")?)?,
        quantity,
        price: opt_decimal(item, "price")?.filter(|p| *p > Decimal::ZERO),
        time_in_force: item
            .get("time_in_force")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(time_in_force_from_venue)
            .transpose()?,
        exchange_order_id: order_id,
        client_order_id: opt_id(item, "order_link_id"),
        status: order_status_from_venue(str_field(item, "order_status")?)?,
        filled_quantity,
        average_price,
        created_at: opt_rfc3339(item, "created_at")?,
        updated_at: opt_rfc3339(item, "updated_at")?,
    })
}

pub fn parse_orders(result: &Value, symbol_of: &dyn Fn(&str) -> String) -> ConnectorResult<Vec<Order>> {
    paged_items(result, "data")?
        .into_iter()
        .map(|item| parse_order(item, symbol_of))
        .collect()
}

pub fn parse_executions(result: &Value, symbol_of: &dyn Fn(&str) -> String) -> ConnectorResult<Vec<TradeRecord>> {
    paged_items(result, "trade_list")?
        .into_iter()
        .map(|item| {
            let is_maker = match item.get("last_liquidity_ind").and_then(Value::as_str) {
                Some("AddedLiquidity") => Some(true),
                Some("RemovedLiquidity") => Some(false),
                _ => None,
            };
            let timestamp = item
                .get("trade_time_ms")
                .and_then(Value::as_i64)
                .ok_or_else(|| missing("trade_time_ms"))?;

            Ok(TradeRecord {
                symbol: symbol_of(str_field(item, "symbol")?),
                trade_id: opt_id(item, "exec_id").ok_or_else(|| missing("exec_id"))?,
                order_id: opt_id(item, "order_id").ok_or_else(|| missing("order_id"))?,
                side: side_from_venue(str_field(item, "side")?)?,
                price: decimal(item, "exec_price")?,
                quantity: decimal(item, "exec_qty")?,
                fee: opt_decimal(item, "exec_fee")?,
                fee_asset: None,
                is_maker,
                timestamp: from_millis(timestamp)?,
            })
        })
        .collect()
}

pub fn parse_withdrawal_id(result: &Value) -> ConnectorResult<String> {
    opt_id(result, "id").ok_or_else(|| missing("id"))
}

pub fn parse_withdrawals(result: &Value) -> ConnectorResult<Vec<WithdrawalRecord>> {
    paged_items(result, "data")?
        .into_iter()
        .map(|item| {
            Ok(WithdrawalRecord {
                withdrawal_id: opt_id(item, "id").ok_or_else(|| missing("id"))?,
                asset: str_field(item, "coin")?.to_uppercase(),
                amount: decimal(item, "amount")?,
                fee: opt_decimal(item, "fee")?,
                address: opt_id(item, "address"),
                tx_id: opt_id(item, "tx_id"),
                status: withdrawal_status_from_venue(str_field(item, "status")?)?,
                // 交易所字段名如此拼写
                submitted_at: opt_rfc3339(item, "submited_at")?,
            })
        })
        .collect()
}

// src/types/market_data.rs - 市场数据类型定义

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Ticker数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub last_price: Decimal,
    pub bid_price: Option<Decimal>,
    pub ask_price: Option<Decimal>,
    pub high_24h: Option<Decimal>,
    pub low_24h: Option<Decimal>,
    pub volume_24h: Option<Decimal>,
    /// 24小时涨跌幅（比例，0.01 = 1%）
    pub change_24h: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
}

/// 订单簿价位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}

/// 标准化订单簿
///
/// 买盘按价格严格降序，卖盘严格升序。交叉盘口不做修正，通过 `is_crossed` 暴露给调用方。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBook {
    pub symbol: String,
    bids: Vec<PriceLevel>,
    asks: Vec<PriceLevel>,
    pub timestamp: DateTime<Utc>,
}

impl OrderBook {
    /// 由任意顺序的 (价格, 数量) 构造订单簿，同价位数量合并，非正价格或数量的档位被丢弃
    pub fn new(
        symbol: impl Into<String>,
        bids: impl IntoIterator<Item = (Decimal, Decimal)>,
        asks: impl IntoIterator<Item = (Decimal, Decimal)>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let bids = Self::aggregate(bids).into_iter().rev().collect();
        let asks = Self::aggregate(asks);

        Self {
            symbol: symbol.into(),
            bids,
            asks,
            timestamp,
        }
    }

    // 返回按价格升序的合并档位
    fn aggregate(levels: impl IntoIterator<Item = (Decimal, Decimal)>) -> Vec<PriceLevel> {
        let mut merged: BTreeMap<Decimal, Decimal> = BTreeMap::new();
        for (price, quantity) in levels {
            if price <= Decimal::ZERO || quantity <= Decimal::ZERO {
                continue;
            }
            *merged.entry(price.normalize()).or_insert(Decimal::ZERO) += quantity;
        }
        merged
            .into_iter()
            .map(|(price, quantity)| PriceLevel { price, quantity })
            .collect()
    }

    pub fn bids(&self) -> &[PriceLevel] {
        &self.bids
    }

    pub fn asks(&self) -> &[PriceLevel] {
        &self.asks
    }

    pub fn best_bid(&self) -> Option<&PriceLevel> {
        self.bids.first()
    }

    pub fn best_ask(&self) -> Option<&PriceLevel> {
        self.asks.first()
    }

    pub fn spread(&self) -> Option<Decimal> {
        Some(self.best_ask()?.price - self.best_bid()?.price)
    }

    pub fn mid_price(&self) -> Option<Decimal> {
        Some((self.best_ask()?.price + self.best_bid()?.price) / Decimal::TWO)
    }

    /// 最优买价 >= 最优卖价
    pub fn is_crossed(&self) -> bool {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => bid.price >= ask.price,
            _ => false,
        }
    }

    /// 只保留前 `depth` 档
    pub fn truncated(mut self, depth: usize) -> Self {
        self.bids.truncate(depth);
        self.asks.truncate(depth);
        self
    }
}

/// 交易方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeSide {
    Buy,
    Sell,
}

/// 公开成交记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicTrade {
    pub symbol: String,
    pub trade_id: String,
    pub price: Decimal,
    pub quantity: Decimal,
    pub side: TradeSide,
    pub timestamp: DateTime<Utc>,
}

/// K线周期
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KlineInterval {
    OneMinute,
    FiveMinutes,
    FifteenMinutes,
    OneHour,
    FourHours,
    OneDay,
    OneWeek,
}

/// K线数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kline {
    pub symbol: String,
    pub interval: KlineInterval,
    pub open_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// 交易对元数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolInfo {
    /// 标准化交易对，例如 `BTC/USDT`
    pub symbol: String,
    /// 交易所原生交易对，例如 `BTCUSDT`
    pub venue_symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    pub tick_size: Option<Decimal>,
    pub min_quantity: Option<Decimal>,
    pub max_quantity: Option<Decimal>,
    pub quantity_step: Option<Decimal>,
    pub trading: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn book(bids: Vec<(Decimal, Decimal)>, asks: Vec<(Decimal, Decimal)>) -> OrderBook {
        OrderBook::new("BTC/USDT", bids, asks, Utc::now())
    }

    #[test]
    fn test_sides_are_sorted_strictly() {
        let ob = book(
            vec![(dec!(99), dec!(1)), (dec!(101), dec!(2)), (dec!(100), dec!(3))],
            vec![(dec!(105), dec!(1)), (dec!(103), dec!(2)), (dec!(104), dec!(3))],
        );

        let bid_prices: Vec<_> = ob.bids().iter().map(|l| l.price).collect();
        let ask_prices: Vec<_> = ob.asks().iter().map(|l| l.price).collect();
        assert_eq!(bid_prices, vec![dec!(101), dec!(100), dec!(99)]);
        assert_eq!(ask_prices, vec![dec!(103), dec!(104), dec!(105)]);
        assert!(ob.bids().windows(2).all(|w| w[0].price > w[1].price));
        assert!(ob.asks().windows(2).all(|w| w[0].price < w[1].price));
    }

    #[test]
    fn test_duplicate_levels_merge() {
        let ob = book(
            vec![(dec!(100), dec!(1)), (dec!(100.0), dec!(2))],
            vec![(dec!(101), dec!(0.5)), (dec!(101), dec!(0.5))],
        );
        assert_eq!(ob.bids().len(), 1);
        assert_eq!(ob.bids()[0].quantity, dec!(3));
        assert_eq!(ob.asks()[0].quantity, dec!(1.0));
    }

    #[test]
    fn test_empty_side_has_no_best() {
        let ob = book(vec![], vec![(dec!(10), dec!(1))]);
        assert!(ob.best_bid().is_none());
        assert_eq!(ob.best_ask().map(|l| l.price), Some(dec!(10)));
        assert!(ob.spread().is_none());
        assert!(ob.mid_price().is_none());
    }

    #[test]
    fn test_crossed_book_is_reported_not_corrected() {
        let ob = book(vec![(dec!(101), dec!(1))], vec![(dec!(100), dec!(1))]);
        assert!(ob.is_crossed());
        assert_eq!(ob.best_bid().unwrap().price, dec!(101));
        assert_eq!(ob.spread(), Some(dec!(-1)));
    }

    #[test]
    fn test_truncated_keeps_best_levels() {
        let ob = book(
            vec![(dec!(1), dec!(1)), (dec!(2), dec!(1)), (dec!(3), dec!(1))],
            vec![(dec!(6), dec!(1)), (dec!(5), dec!(1)), (dec!(4), dec!(1))],
        )
        .truncated(2);
        assert_eq!(ob.bids().iter().map(|l| l.price).collect::<Vec<_>>(), vec![dec!(3), dec!(2)]);
        assert_eq!(ob.asks().iter().map(|l| l.price).collect::<Vec<_>>(), vec![dec!(4), dec!(5)]);
        assert_eq!(ob.mid_price(), Some(dec!(3.5)));
    }
}

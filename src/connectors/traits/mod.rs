// src/connectors/traits/mod.rs - 统一交易所接口

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::connectors::common::vault::{ExchangeCredentials, RedactedCredentials};
use crate::types::*;

fn unsupported<T>(exchange: ExchangeType, operation: &str) -> ConnectorResult<T> {
    Err(ConnectorError::Unsupported(format!("{operation} is not supported by {exchange}")))
}

/// ExchangeInterface trait - 所有交易所连接器的统一调用面
///
/// 交易所不提供的操作使用默认实现，返回 `ConnectorError::Unsupported`。
/// 交易对统一使用 `BASE/QUOTE` 格式。
#[async_trait]
pub trait ExchangeInterface: Send + Sync {
    // 基础信息
    fn exchange_type(&self) -> ExchangeType;
    fn name(&self) -> &str;

    // 连接状态
    async fn connection_status(&self) -> ConnectionStatus;
    /// 唯一能让连接器离开 `Disconnected` 的外部操作
    async fn test_connection(&self) -> ConnectorResult<()>;
    /// 健康检查，返回往返延迟
    async fn ping(&self) -> ConnectorResult<Duration>;

    // 凭证
    async fn update_credentials(&self, credentials: ExchangeCredentials);
    async fn purge_credentials(&self);
    async fn credentials_view(&self) -> Option<RedactedCredentials>;

    // 行情
    async fn get_server_time(&self) -> ConnectorResult<DateTime<Utc>> {
        unsupported(self.exchange_type(), "get_server_time")
    }

    async fn get_ticker(&self, symbol: &str) -> ConnectorResult<Ticker>;

    async fn get_order_book(&self, symbol: &str, depth: Option<usize>) -> ConnectorResult<OrderBook>;

    async fn get_recent_trades(&self, _symbol: &str, _limit: Option<u32>) -> ConnectorResult<Vec<PublicTrade>> {
        unsupported(self.exchange_type(), "get_recent_trades")
    }

    async fn get_klines(
        &self,
        _symbol: &str,
        _interval: KlineInterval,
        _limit: Option<u32>,
    ) -> ConnectorResult<Vec<Kline>> {
        unsupported(self.exchange_type(), "get_klines")
    }

    async fn get_symbols(&self) -> ConnectorResult<Vec<SymbolInfo>> {
        unsupported(self.exchange_type(), "get_symbols")
    }

    async fn get_symbol_info(&self, symbol: &str) -> ConnectorResult<SymbolInfo> {
        self.get_symbols()
            .await?
            .into_iter()
            .find(|info| info.symbol == symbol)
            .ok_or_else(|| ConnectorError::Validation(format!("unknown symbol: {symbol}")))
    }

    async fn refresh_symbols(&self) -> ConnectorResult<Vec<SymbolInfo>> {
        unsupported(self.exchange_type(), "refresh_symbols")
    }

    // 账户
    async fn get_account_balance(&self) -> ConnectorResult<AccountBalance>;
    async fn get_open_orders(&self, symbol: Option<&str>) -> ConnectorResult<Vec<Order>>;
    async fn get_order_history(&self, query: &HistoryQuery) -> ConnectorResult<Vec<Order>>;
    async fn get_trade_history(&self, query: &HistoryQuery) -> ConnectorResult<Vec<TradeRecord>>;

    // 交易
    /// 下单；参数校验在任何网络请求之前完成
    async fn create_order(&self, request: &OrderRequest) -> ConnectorResult<Order>;
    async fn cancel_order(&self, symbol: &str, order_id: &str) -> ConnectorResult<Order>;

    async fn cancel_all_orders(&self, _symbol: &str) -> ConnectorResult<Vec<Order>> {
        unsupported(self.exchange_type(), "cancel_all_orders")
    }

    async fn get_order(&self, _symbol: &str, _order_id: &str) -> ConnectorResult<Order> {
        unsupported(self.exchange_type(), "get_order")
    }

    // 提现
    fn enable_withdrawals(&self, _confirm: bool) -> ConnectorResult<()> {
        unsupported(self.exchange_type(), "enable_withdrawals")
    }

    fn disable_withdrawals(&self) {}

    fn withdrawals_enabled(&self) -> bool {
        false
    }

    /// 提交提现，返回交易所的提现编号
    async fn withdraw(
        &self,
        _asset: &str,
        _address: &str,
        _amount: Decimal,
        _tag: Option<&str>,
    ) -> ConnectorResult<String> {
        unsupported(self.exchange_type(), "withdraw")
    }

    async fn get_withdrawal_history(&self, _asset: Option<&str>) -> ConnectorResult<Vec<WithdrawalRecord>> {
        unsupported(self.exchange_type(), "get_withdrawal_history")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    // 只实现必需方法的最小连接器
    struct MinimalExchange;

    #[async_trait]
    impl ExchangeInterface for MinimalExchange {
        fn exchange_type(&self) -> ExchangeType {
            ExchangeType::Bybit
        }

        fn name(&self) -> &str {
            "minimal"
        }

        async fn connection_status(&self) -> ConnectionStatus {
            ConnectionStatus::Disconnected
        }

        async fn test_connection(&self) -> ConnectorResult<()> {
            Ok(())
        }

        async fn ping(&self) -> ConnectorResult<Duration> {
            Ok(Duration::ZERO)
        }

        async fn update_credentials(&self, _credentials: ExchangeCredentials) {}

        async fn purge_credentials(&self) {}

        async fn credentials_view(&self) -> Option<RedactedCredentials> {
            None
        }

        async fn get_ticker(&self, _symbol: &str) -> ConnectorResult<Ticker> {
            Err(ConnectorError::DataParsing("no data".to_string()))
        }

        async fn get_order_book(&self, symbol: &str, _depth: Option<usize>) -> ConnectorResult<OrderBook> {
            Ok(OrderBook::new(symbol, Vec::new(), Vec::new(), Utc::now()))
        }

        async fn get_account_balance(&self) -> ConnectorResult<AccountBalance> {
            Ok(AccountBalance::new(ExchangeType::Bybit, HashMap::new(), Utc::now()))
        }

        async fn get_open_orders(&self, _symbol: Option<&str>) -> ConnectorResult<Vec<Order>> {
            Ok(Vec::new())
        }

        async fn get_order_history(&self, _query: &HistoryQuery) -> ConnectorResult<Vec<Order>> {
            Ok(Vec::new())
        }

        async fn get_trade_history(&self, _query: &HistoryQuery) -> ConnectorResult<Vec<TradeRecord>> {
            Ok(Vec::new())
        }

        async fn create_order(&self, request: &OrderRequest) -> ConnectorResult<Order> {
            request.validate()?;
            Err(ConnectorError::Unsupported("paper only".to_string()))
        }

        async fn cancel_order(&self, _symbol: &str, order_id: &str) -> ConnectorResult<Order> {
            Err(ConnectorError::VenueBusiness {
                code: 20001,
                message: format!("order {order_id} not found"),
            })
        }
    }

    #[tokio::test]
    async fn test_missing_operations_are_unsupported() {
        let exchange = MinimalExchange;
        assert!(matches!(exchange.get_klines("BTC/USDT", KlineInterval::OneHour, None).await, Err(ConnectorError::Unsupported(_))));
        assert!(matches!(exchange.cancel_all_orders("BTC/USDT").await, Err(ConnectorError::Unsupported(_))));
        assert!(matches!(exchange.enable_withdrawals(true), Err(ConnectorError::Unsupported(_))));
        assert!(matches!(
            exchange.withdraw("USDT", "addr", Decimal::ONE, None).await,
            Err(ConnectorError::Unsupported(_))
        ));
        assert!(matches!(exchange.get_symbol_info("BTC/USDT").await, Err(ConnectorError::Unsupported(_))));
        assert!(!exchange.withdrawals_enabled());
    }

    #[tokio::test]
    async fn test_trait_objects_are_shareable() {
        let exchange: std::sync::Arc<dyn ExchangeInterface> = std::sync::Arc::new(MinimalExchange);
        let handle = {
            let exchange = exchange.clone();
            tokio::spawn(async move { exchange.get_open_orders(None).await })
        };
        assert!(handle.await.unwrap().unwrap().is_empty());
        assert_eq!(exchange.name(), "minimal");
    }
}

//! Bybit连接器主模块
//!
//! 通过请求管道访问 Bybit REST API，并把响应转换为标准化类型

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use rust_decimal::Decimal;
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::time::Instant;

use super::config::*;
use super::mappings::{
    from_venue_symbol, kline_interval_secs, kline_interval_to_venue, order_type_to_venue, side_to_venue,
    time_in_force_to_venue, to_venue_symbol,
};
use super::parser;
use super::parser::BybitEnvelopeParser;
use super::signer::BybitSigner;
use crate::connectors::common::pipeline::{PipelineParts, RequestPipeline, RequestSpec};
use crate::connectors::common::rate_limiter::RateLimiter;
use crate::connectors::common::retry::RetryPolicy;
use crate::connectors::common::symbol_cache::{SymbolCache, SymbolTable};
use crate::connectors::common::transport::{HttpTransport, ReqwestTransport};
use crate::connectors::common::vault::{CredentialVault, ExchangeCredentials, RedactedCredentials};
use crate::connectors::common::withdrawal_guard::WithdrawalGuard;
use crate::connectors::traits::ExchangeInterface;
use crate::types::*;

const VENUE: &str = "Bybit";

/// Bybit连接器
pub struct BybitConnector {
    /// 注册名
    name: String,
    /// 配置信息
    config: ConnectorConfig,
    /// 请求管道（签名、限流、重试）
    pipeline: RequestPipeline,
    /// 交易对元数据缓存
    symbol_cache: SymbolCache,
    /// 提现开关
    withdrawal_guard: Arc<WithdrawalGuard>,
    /// 连接状态
    status: Arc<RwLock<ConnectionStatus>>,
}

impl BybitConnector {
    /// 创建使用 reqwest 传输层的连接器
    pub fn new(
        name: impl Into<String>,
        config: ConnectorConfig,
        vault: Arc<CredentialVault>,
        credentials: Option<ExchangeCredentials>,
    ) -> ConnectorResult<Self> {
        let transport = Arc::new(ReqwestTransport::new(config.request_timeout())?);
        Ok(Self::with_transport(name, config, vault, credentials, transport))
    }

    /// 使用自定义传输层创建连接器
    pub fn with_transport(
        name: impl Into<String>,
        config: ConnectorConfig,
        vault: Arc<CredentialVault>,
        credentials: Option<ExchangeCredentials>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        let base_url = config
            .rest_api_url
            .clone()
            .unwrap_or_else(|| base_url(config.testnet).to_string());

        let pipeline = RequestPipeline::new(PipelineParts {
            venue: VENUE,
            base_url,
            transport,
            limiter: RateLimiter::new(config.rate_limits.clone(), config.default_rate_limit),
            retry: RetryPolicy::new(&config.retry),
            attempt_timeout: config.request_timeout(),
            signer: Arc::new(BybitSigner),
            parser: Arc::new(BybitEnvelopeParser),
            vault,
            credentials,
        });

        let name = name.into();
        info!(
            "[{}] Connector '{}' created ({}, {})",
            VENUE,
            name,
            if config.testnet { "testnet" } else { "mainnet" },
            pipeline.base_url()
        );

        Self {
            name,
            symbol_cache: SymbolCache::new(config.symbol_cache_ttl()),
            config,
            pipeline,
            withdrawal_guard: Arc::new(WithdrawalGuard::new(VENUE)),
            status: Arc::new(RwLock::new(ConnectionStatus::Disconnected)),
        }
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    pub fn pipeline(&self) -> &RequestPipeline {
        &self.pipeline
    }

    /// 按状态机迁移连接状态，非法迁移被忽略
    async fn transition(&self, next: ConnectionStatus) {
        let mut status = self.status.write().await;
        if *status == next {
            return;
        }
        if status.can_transition_to(next) {
            info!("[{}] {} status {} -> {}", VENUE, self.name, *status, next);
            *status = next;
        } else {
            debug!("[{}] {} ignored status change {} -> {}", VENUE, self.name, *status, next);
        }
    }

    async fn symbol_table(&self) -> Option<Arc<SymbolTable>> {
        self.symbol_cache.cached().await
    }

    async fn venue_symbol(&self, symbol: &str) -> ConnectorResult<String> {
        let table = self.symbol_table().await;
        to_venue_symbol(symbol, table.as_deref())
    }

    async fn fetch_symbols(&self) -> ConnectorResult<Vec<SymbolInfo>> {
        let result = self
            .pipeline
            .request(RequestSpec::get(SYMBOLS_PATH, "get_symbols").rate_key(RATE_KEY_MARKET_DATA))
            .await?;
        parser::parse_symbols(&result)
    }

    async fn signed_get(&self, endpoint: &str, operation: &str, rate_key: &str, params: Vec<(String, String)>) -> ConnectorResult<Value> {
        let mut spec = RequestSpec::get(endpoint, operation).rate_key(rate_key).signed();
        spec.params = params;
        self.pipeline.request(spec).await
    }

    fn required_symbol<'a>(symbol: Option<&'a str>, operation: &str) -> ConnectorResult<&'a str> {
        symbol.ok_or_else(|| ConnectorError::Validation(format!("{operation} requires a symbol on Bybit")))
    }

    fn in_range(at: Option<DateTime<Utc>>, query: &HistoryQuery) -> bool {
        match at {
            Some(at) => {
                query.start_time.map_or(true, |start| at >= start) && query.end_time.map_or(true, |end| at <= end)
            }
            None => true,
        }
    }

    /// 下单，带调用方截止时间
    pub async fn create_order_with_deadline(&self, request: &OrderRequest, deadline: Option<Instant>) -> ConnectorResult<Order> {
        request.validate()?;
        let venue_type = order_type_to_venue(request.order_type)?;
        let venue_symbol = self.venue_symbol(&request.symbol).await?;

        let time_in_force = if request.order_type == OrderType::LimitMaker {
            TimeInForce::PostOnly
        } else {
            request.time_in_force.unwrap_or(TimeInForce::GTC)
        };

        let spec = RequestSpec::post(CREATE_ORDER_PATH, "create_order")
            .rate_key(RATE_KEY_ORDER)
            .param("side", side_to_venue(request.side))
            .param("symbol", &venue_symbol)
            .param("order_type", venue_type)
            .param("qty", request.quantity.normalize())
            .param_opt("price", request.price.filter(|_| request.order_type.requires_price()).map(|p| p.normalize()))
            .param("time_in_force", time_in_force_to_venue(time_in_force))
            .param_opt("order_link_id", request.client_order_id.as_deref())
            .signed()
            .with_deadline(deadline);

        let result = self.pipeline.request(spec).await?;
        let symbol = request.symbol.clone();
        let order = parser::parse_order(&result, &move |_: &str| symbol.clone())?;

        info!(
            "[{}] Order created: {} {} {} {} @ {:?} -> {:?}",
            VENUE,
            request.symbol,
            request.side.as_str(),
            request.order_type.as_str(),
            request.quantity,
            request.price,
            order.exchange_order_id
        );
        Ok(order)
    }
}

#[async_trait]
impl ExchangeInterface for BybitConnector {
    fn exchange_type(&self) -> ExchangeType {
        ExchangeType::Bybit
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn connection_status(&self) -> ConnectionStatus {
        *self.status.read().await
    }

    async fn test_connection(&self) -> ConnectorResult<()> {
        if self.connection_status().await == ConnectionStatus::Error {
            self.transition(ConnectionStatus::Disconnected).await;
        }
        self.transition(ConnectionStatus::Connecting).await;

        let outcome = async {
            let server_time = self.get_server_time().await?;
            debug!("[{}] {} server time {}", VENUE, self.name, server_time);
            if self.pipeline.has_credentials().await {
                self.get_account_balance().await?;
            }
            Ok::<(), ConnectorError>(())
        }
        .await;

        match outcome {
            Ok(()) => {
                self.transition(ConnectionStatus::Connected).await;
                info!("[{}] {} connection test passed", VENUE, self.name);
                Ok(())
            }
            Err(err) => {
                self.transition(ConnectionStatus::Error).await;
                warn!("[{}] {} connection test failed: {}", VENUE, self.name, err);
                Err(err)
            }
        }
    }

    async fn ping(&self) -> ConnectorResult<Duration> {
        let started = Instant::now();
        match self.get_server_time().await {
            Ok(_) => Ok(started.elapsed()),
            Err(err) => {
                if self.connection_status().await == ConnectionStatus::Connected {
                    self.transition(ConnectionStatus::Error).await;
                    self.transition(ConnectionStatus::Disconnected).await;
                }
                warn!("[{}] {} ping failed: {}", VENUE, self.name, err);
                Err(err)
            }
        }
    }

    async fn update_credentials(&self, credentials: ExchangeCredentials) {
        info!("[{}] {} credentials updated to '{}'", VENUE, self.name, credentials.description());
        self.pipeline.update_credentials(credentials).await;
    }

    async fn purge_credentials(&self) {
        self.pipeline.purge_credentials().await;
    }

    async fn credentials_view(&self) -> Option<RedactedCredentials> {
        self.pipeline.credentials_view().await
    }

    async fn get_server_time(&self) -> ConnectorResult<DateTime<Utc>> {
        let result = self
            .pipeline
            .request(RequestSpec::get(SERVER_TIME_PATH, "get_server_time").rate_key(RATE_KEY_MARKET_DATA))
            .await?;
        parser::parse_server_time(&result)
    }

    async fn get_ticker(&self, symbol: &str) -> ConnectorResult<Ticker> {
        let venue_symbol = self.venue_symbol(symbol).await?;
        let result = self
            .pipeline
            .request(
                RequestSpec::get(TICKERS_PATH, "get_ticker")
                    .rate_key(RATE_KEY_MARKET_DATA)
                    .param("symbol", &venue_symbol),
            )
            .await?;
        parser::parse_ticker(&result, &venue_symbol, symbol)
    }

    async fn get_order_book(&self, symbol: &str, depth: Option<usize>) -> ConnectorResult<OrderBook> {
        if depth == Some(0) {
            return Err(ConnectorError::Validation("order book depth must be positive".to_string()));
        }
        let venue_symbol = self.venue_symbol(symbol).await?;
        let result = self
            .pipeline
            .request(
                RequestSpec::get(ORDER_BOOK_PATH, "get_order_book")
                    .rate_key(RATE_KEY_MARKET_DATA)
                    .param("symbol", &venue_symbol),
            )
            .await?;

        let book = parser::parse_order_book(&result, symbol, depth.unwrap_or(DEFAULT_ORDER_BOOK_DEPTH))?;
        if book.is_crossed() {
            warn!("[{}] Crossed order book for {}", VENUE, symbol);
        }
        Ok(book)
    }

    async fn get_recent_trades(&self, symbol: &str, limit: Option<u32>) -> ConnectorResult<Vec<PublicTrade>> {
        if let Some(limit) = limit {
            if limit == 0 || limit > 1000 {
                return Err(ConnectorError::Validation(format!("trade limit must be 1..=1000, got {limit}")));
            }
        }
        let venue_symbol = self.venue_symbol(symbol).await?;
        let result = self
            .pipeline
            .request(
                RequestSpec::get(RECENT_TRADES_PATH, "get_recent_trades")
                    .rate_key(RATE_KEY_MARKET_DATA)
                    .param("symbol", &venue_symbol)
                    .param_opt("limit", limit),
            )
            .await?;
        parser::parse_recent_trades(&result, symbol)
    }

    async fn get_klines(&self, symbol: &str, interval: KlineInterval, limit: Option<u32>) -> ConnectorResult<Vec<Kline>> {
        let limit = limit.unwrap_or(200);
        if limit == 0 || limit > 200 {
            return Err(ConnectorError::Validation(format!("kline limit must be 1..=200, got {limit}")));
        }
        let venue_symbol = self.venue_symbol(symbol).await?;
        // Bybit 需要起始时间（秒）
        let from = Utc::now().timestamp() - kline_interval_secs(interval) * i64::from(limit);

        let result = self
            .pipeline
            .request(
                RequestSpec::get(KLINE_PATH, "get_klines")
                    .rate_key(RATE_KEY_MARKET_DATA)
                    .param("symbol", &venue_symbol)
                    .param("interval", kline_interval_to_venue(interval))
                    .param("from", from)
                    .param("limit", limit),
            )
            .await?;
        parser::parse_klines(&result, symbol, interval)
    }

    async fn get_symbols(&self) -> ConnectorResult<Vec<SymbolInfo>> {
        let table = self.symbol_cache.get_or_refresh(|| self.fetch_symbols()).await?;
        Ok(table.symbols())
    }

    async fn get_symbol_info(&self, symbol: &str) -> ConnectorResult<SymbolInfo> {
        let table = self.symbol_cache.get_or_refresh(|| self.fetch_symbols()).await?;
        table
            .get(symbol)
            .cloned()
            .ok_or_else(|| ConnectorError::Validation(format!("unknown symbol: {symbol}")))
    }

    async fn refresh_symbols(&self) -> ConnectorResult<Vec<SymbolInfo>> {
        let table = self.symbol_cache.refresh(|| self.fetch_symbols()).await?;
        Ok(table.symbols())
    }

    async fn get_account_balance(&self) -> ConnectorResult<AccountBalance> {
        let result = self
            .signed_get(WALLET_BALANCE_PATH, "get_account_balance", RATE_KEY_ACCOUNT, Vec::new())
            .await?;
        parser::parse_balance(&result)
    }

    async fn get_open_orders(&self, symbol: Option<&str>) -> ConnectorResult<Vec<Order>> {
        let symbol = Self::required_symbol(symbol, "get_open_orders")?;
        let venue_symbol = self.venue_symbol(symbol).await?;
        let result = self
            .signed_get(
                QUERY_ORDER_PATH,
                "get_open_orders",
                RATE_KEY_ACCOUNT,
                vec![("symbol".to_string(), venue_symbol)],
            )
            .await?;

        let table = self.symbol_table().await;
        let symbol_of = |venue: &str| from_venue_symbol(venue, table.as_deref());
        let orders = parser::parse_orders(&result, &symbol_of)?;
        Ok(orders.into_iter().filter(Order::is_open).collect())
    }

    async fn get_order_history(&self, query: &HistoryQuery) -> ConnectorResult<Vec<Order>> {
        query.validate()?;
        let symbol = Self::required_symbol(query.symbol.as_deref(), "get_order_history")?;
        let mut params = vec![("symbol".to_string(), self.venue_symbol(symbol).await?)];
        if let Some(limit) = query.limit {
            params.push(("limit".to_string(), limit.to_string()));
        }

        let result = self
            .signed_get(ORDER_LIST_PATH, "get_order_history", RATE_KEY_ACCOUNT, params)
            .await?;

        let table = self.symbol_table().await;
        let symbol_of = |venue: &str| from_venue_symbol(venue, table.as_deref());
        let orders = parser::parse_orders(&result, &symbol_of)?;
        Ok(orders
            .into_iter()
            .filter(|order| Self::in_range(order.created_at, query))
            .collect())
    }

    async fn get_trade_history(&self, query: &HistoryQuery) -> ConnectorResult<Vec<TradeRecord>> {
        query.validate()?;
        let symbol = Self::required_symbol(query.symbol.as_deref(), "get_trade_history")?;
        let mut params = vec![("symbol".to_string(), self.venue_symbol(symbol).await?)];
        if let Some(start) = query.start_time {
            params.push(("start_time".to_string(), start.timestamp_millis().to_string()));
        }
        if let Some(limit) = query.limit {
            params.push(("limit".to_string(), limit.to_string()));
        }

        let result = self
            .signed_get(EXECUTION_LIST_PATH, "get_trade_history", RATE_KEY_ACCOUNT, params)
            .await?;

        let table = self.symbol_table().await;
        let symbol_of = |venue: &str| from_venue_symbol(venue, table.as_deref());
        let trades = parser::parse_executions(&result, &symbol_of)?;
        Ok(trades
            .into_iter()
            .filter(|trade| Self::in_range(Some(trade.timestamp), query))
            .collect())
    }

    async fn create_order(&self, request: &OrderRequest) -> ConnectorResult<Order> {
        self.create_order_with_deadline(request, None).await
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> ConnectorResult<Order> {
        if order_id.trim().is_empty() {
            return Err(ConnectorError::Validation("order id must not be empty".to_string()));
        }
        let venue_symbol = self.venue_symbol(symbol).await?;
        let result = self
            .pipeline
            .request(
                RequestSpec::post(CANCEL_ORDER_PATH, "cancel_order")
                    .rate_key(RATE_KEY_ORDER)
                    .param("symbol", &venue_symbol)
                    .param("order_id", order_id)
                    .signed(),
            )
            .await?;

        let owned_symbol = symbol.to_string();
        let order = parser::parse_order(&result, &move |_: &str| owned_symbol.clone())?;
        info!("[{}] Order {} on {} cancel -> {:?}", VENUE, order_id, symbol, order.status);
        Ok(order)
    }

    async fn cancel_all_orders(&self, symbol: &str) -> ConnectorResult<Vec<Order>> {
        let venue_symbol = self.venue_symbol(symbol).await?;
        let result = self
            .pipeline
            .request(
                RequestSpec::post(CANCEL_ALL_PATH, "cancel_all_orders")
                    .rate_key(RATE_KEY_ORDER)
                    .param("symbol", &venue_symbol)
                    .signed(),
            )
            .await?;

        let owned_symbol = symbol.to_string();
        let orders = parser::parse_orders(&result, &move |_: &str| owned_symbol.clone())?;
        info!("[{}] Canceled {} order(s) on {}", VENUE, orders.len(), symbol);
        Ok(orders)
    }

    async fn get_order(&self, symbol: &str, order_id: &str) -> ConnectorResult<Order> {
        if order_id.trim().is_empty() {
            return Err(ConnectorError::Validation("order id must not be empty".to_string()));
        }
        let venue_symbol = self.venue_symbol(symbol).await?;
        let result = self
            .signed_get(
                QUERY_ORDER_PATH,
                "get_order",
                RATE_KEY_ACCOUNT,
                vec![
                    ("symbol".to_string(), venue_symbol),
                    ("order_id".to_string(), order_id.to_string()),
                ],
            )
            .await?;

        let owned_symbol = symbol.to_string();
        parser::parse_order(&result, &move |_: &str| owned_symbol.clone())
    }

    fn enable_withdrawals(&self, confirm: bool) -> ConnectorResult<()> {
        self.withdrawal_guard.enable(confirm)
    }

    fn disable_withdrawals(&self) {
        self.withdrawal_guard.disable()
    }

    fn withdrawals_enabled(&self) -> bool {
        self.withdrawal_guard.is_enabled()
    }

    async fn withdraw(&self, asset: &str, address: &str, amount: Decimal, tag: Option<&str>) -> ConnectorResult<String> {
        let request = WithdrawalRequest {
            asset: asset.trim().to_uppercase(),
            address: address.trim().to_string(),
            amount,
            tag: tag.map(str::to_string),
        };
        self.withdrawal_guard.ensure_enabled()?;
        request.validate()?;

        let result = self
            .pipeline
            .request(
                RequestSpec::post(WITHDRAW_PATH, "withdraw")
                    .rate_key(RATE_KEY_WITHDRAW)
                    .param("coin", &request.asset)
                    .param("address", &request.address)
                    .param("amount", request.amount.normalize())
                    .param_opt("tag", request.tag.as_deref())
                    .signed()
                    .gated(self.withdrawal_guard.clone()),
            )
            .await?;

        let withdrawal_id = parser::parse_withdrawal_id(&result)?;
        info!(
            "[{}] Withdrawal {} submitted: {} {}",
            VENUE, withdrawal_id, request.amount, request.asset
        );
        Ok(withdrawal_id)
    }

    async fn get_withdrawal_history(&self, asset: Option<&str>) -> ConnectorResult<Vec<WithdrawalRecord>> {
        let params = asset
            .map(|asset| vec![("coin".to_string(), asset.trim().to_uppercase())])
            .unwrap_or_default();
        let result = self
            .signed_get(WITHDRAW_LIST_PATH, "get_withdrawal_history", RATE_KEY_WITHDRAW, params)
            .await?;
        parser::parse_withdrawals(&result)
    }
}

impl std::fmt::Debug for BybitConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BybitConnector")
            .field("name", &self.name)
            .field("testnet", &self.config.testnet)
            .field("pipeline", &self.pipeline)
            .finish_non_exhaustive()
    }
}

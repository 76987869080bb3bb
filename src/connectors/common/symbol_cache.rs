//! 交易对元数据缓存
//! TTL 过期后按需刷新，并发刷新合并为一次请求

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use crate::types::errors::ConnectorResult;
use crate::types::market_data::SymbolInfo;

/// 一次完整抓取得到的交易对表
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    by_symbol: HashMap<String, SymbolInfo>,
    by_venue: HashMap<String, String>,
}

impl SymbolTable {
    pub fn new(symbols: impl IntoIterator<Item = SymbolInfo>) -> Self {
        let mut table = Self::default();
        for info in symbols {
            table.by_venue.insert(info.venue_symbol.clone(), info.symbol.clone());
            table.by_symbol.insert(info.symbol.clone(), info);
        }
        table
    }

    /// 按统一格式（`BTC/USDC`）查找
    pub fn get(&self, symbol: &str) -> Option<&SymbolInfo> {
        self.by_symbol.get(symbol)
    }

    /// 按交易所原始格式（`BTCUSDC`）查找
    pub fn resolve_venue(&self, venue_symbol: &str) -> Option<&SymbolInfo> {
        self.by_venue
            .get(venue_symbol)
            .and_then(|symbol| self.by_symbol.get(symbol))
    }

    /// 按统一符号排序
    pub fn symbols(&self) -> Vec<SymbolInfo> {
        let mut symbols: Vec<SymbolInfo> = self.by_symbol.values().cloned().collect();
        symbols.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        symbols
    }

    pub fn len(&self) -> usize {
        self.by_symbol.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_symbol.is_empty()
    }
}

#[derive(Debug)]
struct CacheEntry {
    table: Arc<SymbolTable>,
    fetched_at: Instant,
    generation: u64,
    invalidated: bool,
}

impl CacheEntry {
    fn is_fresh(&self, ttl: Duration) -> bool {
        !self.invalidated && self.fetched_at.elapsed() < ttl
    }
}

#[derive(Debug)]
pub struct SymbolCache {
    ttl: Duration,
    entry: RwLock<Option<CacheEntry>>,
    // 单飞刷新锁
    refresh_lock: Mutex<()>,
}

impl SymbolCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entry: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// 未过期的缓存内容
    pub async fn cached(&self) -> Option<Arc<SymbolTable>> {
        self.entry
            .read()
            .await
            .as_ref()
            .filter(|entry| entry.is_fresh(self.ttl))
            .map(|entry| entry.table.clone())
    }

    async fn generation(&self) -> u64 {
        self.entry.read().await.as_ref().map(|entry| entry.generation).unwrap_or(0)
    }

    /// 缓存有效时直接返回，否则调用 `fetch` 刷新
    pub async fn get_or_refresh<F, Fut>(&self, fetch: F) -> ConnectorResult<Arc<SymbolTable>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ConnectorResult<Vec<SymbolInfo>>>,
    {
        if let Some(table) = self.cached().await {
            return Ok(table);
        }

        let _guard = self.refresh_lock.lock().await;
        // 等锁期间可能已有其他任务完成刷新
        if let Some(table) = self.cached().await {
            debug!("Symbol cache refreshed by a concurrent caller");
            return Ok(table);
        }
        self.store(fetch().await?).await
    }

    /// 强制刷新；与进行中的刷新合并
    pub async fn refresh<F, Fut>(&self, fetch: F) -> ConnectorResult<Arc<SymbolTable>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ConnectorResult<Vec<SymbolInfo>>>,
    {
        let seen = self.generation().await;
        let _guard = self.refresh_lock.lock().await;

        if self.generation().await != seen {
            if let Some(entry) = self.entry.read().await.as_ref() {
                return Ok(entry.table.clone());
            }
        }
        self.store(fetch().await?).await
    }

    pub async fn invalidate(&self) {
        if let Some(entry) = self.entry.write().await.as_mut() {
            // 保留代数，使并发的强制刷新仍能识别
            entry.invalidated = true;
        }
    }

    async fn store(&self, symbols: Vec<SymbolInfo>) -> ConnectorResult<Arc<SymbolTable>> {
        let table = Arc::new(SymbolTable::new(symbols));
        let mut entry = self.entry.write().await;
        let generation = entry.as_ref().map(|e| e.generation).unwrap_or(0) + 1;
        *entry = Some(CacheEntry {
            table: table.clone(),
            fetched_at: Instant::now(),
            generation,
            invalidated: false,
        });
        info!("Symbol cache refreshed: {} symbols (generation {})", table.len(), generation);
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::errors::ConnectorError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn info(base: &str, quote: &str) -> SymbolInfo {
        SymbolInfo {
            symbol: format!("{base}/{quote}"),
            venue_symbol: format!("{base}{quote}"),
            base_asset: base.to_string(),
            quote_asset: quote.to_string(),
            tick_size: None,
            min_quantity: None,
            max_quantity: None,
            quantity_step: None,
            trading: true,
        }
    }

    async fn fetch_counted(counter: &AtomicUsize) -> ConnectorResult<Vec<SymbolInfo>> {
        counter.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(vec![info("BTC", "USDC"), info("ETH", "USDT")])
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry_triggers_refetch() {
        let cache = SymbolCache::new(Duration::from_secs(3600));
        let counter = AtomicUsize::new(0);

        let table = cache.get_or_refresh(|| fetch_counted(&counter)).await.unwrap();
        assert_eq!(table.len(), 2);
        cache.get_or_refresh(|| fetch_counted(&counter)).await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(3601)).await;
        assert!(cache.cached().await.is_none());
        cache.get_or_refresh(|| fetch_counted(&counter)).await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_refresh_is_single_flight() {
        let cache = Arc::new(SymbolCache::new(Duration::from_secs(60)));
        let counter = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let counter = counter.clone();
                tokio::spawn(async move { cache.get_or_refresh(|| fetch_counted(&counter)).await.map(|t| t.len()) })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), 2);
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_forced_refresh_and_invalidate() {
        let cache = SymbolCache::new(Duration::from_secs(60));
        let counter = AtomicUsize::new(0);

        cache.get_or_refresh(|| fetch_counted(&counter)).await.unwrap();
        cache.refresh(|| fetch_counted(&counter)).await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 2);

        cache.invalidate().await;
        assert!(cache.cached().await.is_none());
        cache.get_or_refresh(|| fetch_counted(&counter)).await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_failed_fetch_leaves_cache_empty() {
        let cache = SymbolCache::new(Duration::from_secs(60));
        let result = cache
            .get_or_refresh(|| async { Err(ConnectorError::TransientNetwork { message: "down".into(), attempts: 3 }) })
            .await;
        assert!(result.is_err());
        assert!(cache.cached().await.is_none());
    }

    #[test]
    fn test_symbol_table_lookup() {
        let table = SymbolTable::new(vec![info("BTC", "USDC"), info("ETH", "USDT")]);
        assert_eq!(table.get("BTC/USDC").unwrap().venue_symbol, "BTCUSDC");
        assert_eq!(table.resolve_venue("ETHUSDT").unwrap().symbol, "ETH/USDT");
        assert!(table.resolve_venue("DOGEUSDT").is_none());
        let names: Vec<String> = table.symbols().into_iter().map(|s| s.symbol).collect();
        assert_eq!(names, vec!["BTC/USDC", "ETH/USDT"]);
    }
}

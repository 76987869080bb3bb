//! Bybit连接器模块
//!
//! 基于 Bybit v2 REST API 的连接器实现：行情、账户、交易与提现

pub mod connector;
pub mod mappings;
pub mod parser;
pub mod signer;


// 重新导出主要类型
pub use connector::BybitConnector;
pub use parser::BybitEnvelopeParser;
pub use signer::BybitSigner;

// Bybit特定的常量
pub mod config {
    // REST API URLs
    pub const BYBIT_API_URL: &str = "https://api.bybit.com";
    pub const BYBIT_TESTNET_API_URL: &str = "https://api-testnet.bybit.com";

    // 公共端点
    pub const SERVER_TIME_PATH: &str = "/v2/public/time";
    pub const TICKERS_PATH: &str = "/v2/public/tickers";
    pub const ORDER_BOOK_PATH: &str = "/v2/public/orderBook/L2";
    pub const RECENT_TRADES_PATH: &str = "/v2/public/trading-records";
    pub const KLINE_PATH: &str = "/v2/public/kline/list";
    pub const SYMBOLS_PATH: &str = "/v2/public/symbols";

    // 私有端点
    pub const WALLET_BALANCE_PATH: &str = "/v2/private/wallet/balance";
    pub const CREATE_ORDER_PATH: &str = "/v2/private/order/create";
    pub const CANCEL_ORDER_PATH: &str = "/v2/private/order/cancel";
    pub const CANCEL_ALL_PATH: &str = "/v2/private/order/cancelAll";
    pub const QUERY_ORDER_PATH: &str = "/v2/private/order";
    pub const ORDER_LIST_PATH: &str = "/v2/private/order/list";
    pub const EXECUTION_LIST_PATH: &str = "/v2/private/execution/list";
    pub const WITHDRAW_PATH: &str = "/v2/private/wallet/withdraw";
    pub const WITHDRAW_LIST_PATH: &str = "/v2/private/wallet/withdraw/list";

    /// 交易对元数据缓存默认 TTL（秒）
    pub const SYMBOL_CACHE_TTL_SECS: u64 = 3600;

    /// 公共接口订单簿默认深度
    pub const DEFAULT_ORDER_BOOK_DEPTH: usize = 25;

    // 限流类别：行情与交易分开计数
    pub const RATE_KEY_MARKET_DATA: &str = "market_data";
    pub const RATE_KEY_ACCOUNT: &str = "account";
    pub const RATE_KEY_ORDER: &str = "order";
    pub const RATE_KEY_WITHDRAW: &str = "withdraw";

    pub fn base_url(testnet: bool) -> &'static str {
        if testnet {
            BYBIT_TESTNET_API_URL
        } else {
            BYBIT_API_URL
        }
    }
}

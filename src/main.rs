// main.rs - fury-check: 连接性探测工具
//
// 用法: fury-check [SYMBOL ...]，例如 `fury-check BTC/USDC ETH/USDT`
// 配置文件路径取自 FURY_CONFIG，默认 config.toml

use env_logger::Env;
use log::{error, info, warn, LevelFilter};
use std::io::Write;
use std::sync::Arc;

use trifury_connect::config::{get_config, init_config, Config};
use trifury_connect::connectors::common::vault::{AesGcmKeyManager, CredentialVault};
use trifury_connect::connectors::ExchangeManager;
use trifury_connect::types::ConnectorResult;

fn init_logging(level: &str) {
    env_logger::Builder::from_env(Env::default().default_filter_or(level))
        .format(|buf, record| {
            if record.level() <= log::Level::Info {
                writeln!(buf, "[{}] {}", record.level(), record.args())
            } else {
                writeln!(
                    buf,
                    "[{} {}:{}] {}",
                    record.level(),
                    record.file().unwrap_or("unknown"),
                    record.line().unwrap_or(0),
                    record.args()
                )
            }
        })
        .filter_module("reqwest", LevelFilter::Warn)
        .filter_module("hyper", LevelFilter::Warn)
        .format_timestamp_millis()
        .format_module_path(false)
        .init();
}

/// 设置了 FURY_VAULT_KEY（base64 编码的 32 字节）时启用加密保险库
fn build_vault() -> ConnectorResult<CredentialVault> {
    match std::env::var("FURY_VAULT_KEY") {
        Ok(encoded) => Ok(CredentialVault::new(Arc::new(AesGcmKeyManager::from_base64(&encoded)?))),
        Err(_) => Ok(CredentialVault::new(Arc::new(AesGcmKeyManager::generate()))),
    }
}

#[tokio::main]
async fn main() -> ConnectorResult<()> {
    let config_path = std::env::var("FURY_CONFIG").unwrap_or_else(|_| String::from("config.toml"));
    let config_error = init_config(&config_path).await.err();
    init_logging(&get_config().general.log_level);

    match config_error {
        None => info!("Configuration loaded from {}", config_path),
        Some(e) => {
            warn!("Error loading configuration: {e}");
            warn!("Falling back to default configuration");
        }
    }

    let config: &Config = get_config();
    let manager = ExchangeManager::new(Arc::new(build_vault()?));

    for name in config.exchange_names() {
        let Some(settings) = config.get_exchange_settings(name) else {
            continue;
        };
        let credentials = match settings.load_credentials(manager.vault(), name) {
            Ok(credentials) => credentials,
            Err(e) => {
                warn!("[{}] {} runs without credentials: {}", settings.exchange, name, e);
                None
            }
        };
        if let Err(e) = manager.register_with_config(name, settings.exchange, settings.to_connector_config(), credentials) {
            error!("[{}] Failed to register {}: {}", settings.exchange, name, e);
        }
    }

    if manager.is_empty() {
        error!("No connectors configured");
        return Ok(());
    }

    let symbols: Vec<String> = std::env::args().skip(1).collect();

    for (name, outcome) in manager.test_all().await {
        let connector = manager.expect_connector(&name);
        match outcome {
            Ok(()) => {
                match connector.ping().await {
                    Ok(rtt) => info!("{} connected, round trip {:?}", name, rtt),
                    Err(e) => warn!("{} connected but ping failed: {}", name, e),
                }
                if let Some(view) = connector.credentials_view().await {
                    info!("{} using credentials '{}'", name, view.description);
                }
            }
            Err(e) => {
                error!("{} connection test failed: {}", name, e);
                continue;
            }
        }

        for symbol in &symbols {
            match connector.get_ticker(symbol).await {
                Ok(ticker) => println!(
                    "{:<12} {:<12} last={} bid={} ask={}",
                    name,
                    ticker.symbol,
                    ticker.last_price,
                    ticker.bid_price.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string()),
                    ticker.ask_price.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string()),
                ),
                Err(e) => warn!("{} ticker {} failed: {}", name, symbol, e),
            }
        }
    }

    for name in manager.names() {
        manager.remove(&name).await;
    }
    Ok(())
}

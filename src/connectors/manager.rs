// src/connectors/manager.rs - 连接器注册表

use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;
use log::{info, warn};

use super::bybit::BybitConnector;
use super::common::vault::{CredentialVault, ExchangeCredentials};
use super::traits::ExchangeInterface;
use crate::types::{ConnectorConfig, ConnectorError, ConnectorResult, ExchangeType};

/// 按注册名管理连接器，所有连接器共用一个凭证保险库
pub struct ExchangeManager {
    connectors: DashMap<String, Arc<dyn ExchangeInterface>>,
    vault: Arc<CredentialVault>,
}

impl ExchangeManager {
    pub fn new(vault: Arc<CredentialVault>) -> Self {
        Self {
            connectors: DashMap::new(),
            vault,
        }
    }

    /// 凭证需用该保险库封存后再传给 `register`
    pub fn vault(&self) -> &Arc<CredentialVault> {
        &self.vault
    }

    pub fn seal_credentials(
        &self,
        api_key: &str,
        api_secret: &str,
        passphrase: Option<&str>,
        description: impl Into<String>,
    ) -> ConnectorResult<ExchangeCredentials> {
        ExchangeCredentials::seal(&self.vault, api_key, api_secret, passphrase, description)
    }

    /// 以默认配置注册连接器
    pub fn register(
        &self,
        name: &str,
        exchange: ExchangeType,
        testnet: bool,
        credentials: Option<ExchangeCredentials>,
    ) -> ConnectorResult<Arc<dyn ExchangeInterface>> {
        let config = ConnectorConfig {
            testnet,
            ..ConnectorConfig::default()
        };
        self.register_with_config(name, exchange, config, credentials)
    }

    pub fn register_with_config(
        &self,
        name: &str,
        exchange: ExchangeType,
        config: ConnectorConfig,
        credentials: Option<ExchangeCredentials>,
    ) -> ConnectorResult<Arc<dyn ExchangeInterface>> {
        // 注册失败时凭证不得残留在保险库中
        let cleanup = credentials.clone();
        let built = match exchange {
            ExchangeType::Bybit => BybitConnector::new(name, config, self.vault.clone(), credentials)
                .map(|connector| Arc::new(connector) as Arc<dyn ExchangeInterface>),
        };

        let result = built.and_then(|connector| self.insert(name, connector.clone()).map(|_| connector));
        if result.is_err() {
            if let Some(credentials) = cleanup {
                credentials.purge(&self.vault);
            }
        }
        result
    }

    /// 注册已构造好的连接器
    pub fn insert(&self, name: &str, connector: Arc<dyn ExchangeInterface>) -> ConnectorResult<()> {
        match self.connectors.entry(name.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(ConnectorError::Configuration(format!("connector '{name}' is already registered")))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                info!("[{}] Registered connector '{}'", connector.exchange_type(), name);
                slot.insert(connector);
                Ok(())
            }
        }
    }

    pub fn get(&self, name: &str) -> ConnectorResult<Arc<dyn ExchangeInterface>> {
        self.connectors
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ConnectorError::ExchangeNotFound(name.to_string()))
    }

    /// 查找必然存在的连接器
    ///
    /// # Panics
    ///
    /// 名字未注册时 panic；仅用于调用方已确认注册过的场景。
    pub fn expect_connector(&self, name: &str) -> Arc<dyn ExchangeInterface> {
        match self.get(name) {
            Ok(connector) => connector,
            Err(_) => panic!("connector '{name}' is not registered"),
        }
    }

    /// 移除连接器并销毁其凭证
    pub async fn remove(&self, name: &str) -> bool {
        match self.connectors.remove(name) {
            Some((_, connector)) => {
                connector.purge_credentials().await;
                info!("[{}] Removed connector '{}'", connector.exchange_type(), name);
                true
            }
            None => false,
        }
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.connectors.iter().map(|entry| entry.key().clone()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.connectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }

    /// 并发测试所有连接器，结果按名字排序
    pub async fn test_all(&self) -> Vec<(String, ConnectorResult<()>)> {
        let snapshot: Vec<(String, Arc<dyn ExchangeInterface>)> = self
            .connectors
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let mut results = join_all(snapshot.into_iter().map(|(name, connector)| async move {
            let outcome = connector.test_connection().await;
            if let Err(err) = &outcome {
                warn!("[{}] Connector '{}' failed its connection test: {}", connector.exchange_type(), name, err);
            }
            (name, outcome)
        }))
        .await;

        results.sort_by(|a, b| a.0.cmp(&b.0));
        results
    }
}

impl Default for ExchangeManager {
    fn default() -> Self {
        Self::new(Arc::new(CredentialVault::unencrypted()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::common::transport::stub::StubTransport;
    use crate::types::ConnectionStatus;
    use serde_json::json;

    fn stub_connector(manager: &ExchangeManager, name: &str, stub: &Arc<StubTransport>, with_credentials: bool) {
        let credentials = with_credentials.then(|| manager.seal_credentials("key", "secret", None, name).unwrap());
        let connector = BybitConnector::with_transport(
            name,
            ConnectorConfig::default(),
            manager.vault().clone(),
            credentials,
            stub.clone(),
        );
        manager.insert(name, Arc::new(connector)).unwrap();
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let manager = ExchangeManager::default();
        assert!(manager.is_empty());

        let connector = manager.register("bybit-test", ExchangeType::Bybit, true, None).unwrap();
        assert_eq!(connector.name(), "bybit-test");
        assert_eq!(connector.exchange_type(), ExchangeType::Bybit);
        assert_eq!(connector.connection_status().await, ConnectionStatus::Disconnected);

        assert!(manager.get("bybit-test").is_ok());
        assert_eq!(manager.expect_connector("bybit-test").name(), "bybit-test");
        assert!(matches!(manager.get("missing"), Err(ConnectorError::ExchangeNotFound(_))));
    }

    #[tokio::test]
    async fn test_duplicate_names_are_rejected() {
        let manager = ExchangeManager::default();
        manager.register("bybit", ExchangeType::Bybit, false, None).unwrap();

        let credentials = manager.seal_credentials("key", "secret", None, "dup").unwrap();
        assert_eq!(manager.vault().len(), 2);
        let err = manager
            .register("bybit", ExchangeType::Bybit, true, Some(credentials))
            .err()
            .unwrap();
        assert!(matches!(err, ConnectorError::Configuration(_)));
        // 被拒绝的凭证不残留在保险库中
        assert!(manager.vault().is_empty());
        assert_eq!(manager.len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_registration_keeps_existing_credentials() {
        let manager = ExchangeManager::default();
        let original = manager.seal_credentials("key", "secret", None, "original").unwrap();
        manager.register("bybit", ExchangeType::Bybit, false, Some(original)).unwrap();
        assert_eq!(manager.vault().len(), 2);

        let duplicate = manager.seal_credentials("key2", "secret2", None, "duplicate").unwrap();
        assert_eq!(manager.vault().len(), 4);
        assert!(manager.register("bybit", ExchangeType::Bybit, true, Some(duplicate)).is_err());

        // 只清理被拒绝的那一份
        assert_eq!(manager.vault().len(), 2);
        let view = manager.expect_connector("bybit").credentials_view().await.unwrap();
        assert_eq!(view.description, "original");
    }

    #[test]
    #[should_panic(expected = "not registered")]
    fn test_expect_connector_panics_on_unknown_name() {
        let manager = ExchangeManager::default();
        manager.expect_connector("ghost");
    }

    #[tokio::test]
    async fn test_remove_purges_credentials() {
        let manager = ExchangeManager::default();
        let stub = Arc::new(StubTransport::new());
        stub_connector(&manager, "a", &stub, true);
        stub_connector(&manager, "b", &stub, true);
        assert_eq!(manager.vault().len(), 4);

        assert!(manager.remove("a").await);
        assert!(!manager.remove("a").await);
        assert_eq!(manager.vault().len(), 2);
        assert_eq!(manager.names(), vec!["b".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_runs_every_connector() {
        let manager = ExchangeManager::default();
        let healthy = Arc::new(StubTransport::new());
        healthy.set_fallback(200, json!({"ret_code": 0, "ret_msg": "OK", "result": {}, "time_now": "1767225600.0"}));
        let broken = Arc::new(StubTransport::new());
        broken.set_fallback(503, json!({"error": "maintenance"}));

        stub_connector(&manager, "zeta", &healthy, false);
        stub_connector(&manager, "alpha", &broken, false);

        let results = manager.test_all().await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, "alpha");
        assert!(matches!(results[0].1, Err(ConnectorError::Http { status: 503, attempts: 3, .. })));
        assert_eq!(results[1].0, "zeta");
        assert!(results[1].1.is_ok());

        assert_eq!(manager.expect_connector("zeta").connection_status().await, ConnectionStatus::Connected);
        assert_eq!(manager.expect_connector("alpha").connection_status().await, ConnectionStatus::Error);
    }
}

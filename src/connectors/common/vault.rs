//! 凭证保险库
//! 保存加密后的 API key/secret/passphrase，只在签名时按需解密

use std::fmt;
use std::sync::Arc;

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use dashmap::DashMap;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::errors::{ConnectorError, ConnectorResult};

const NONCE_LEN: usize = 12;

/// 可插拔的密钥管理器
pub trait KeyManager: Send + Sync {
    fn encrypt(&self, plaintext: &[u8]) -> ConnectorResult<Vec<u8>>;
    fn decrypt(&self, ciphertext: &[u8]) -> ConnectorResult<Vec<u8>>;
}

/// AES-256-GCM 密钥管理器，密文格式为 `nonce(12字节) || ciphertext`
pub struct AesGcmKeyManager {
    cipher: Aes256Gcm,
}

impl AesGcmKeyManager {
    pub fn new(key: [u8; 32]) -> Self {
        let key = Key::<Aes256Gcm>::from_slice(&key);
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }

    /// 随机生成主密钥
    pub fn generate() -> Self {
        Self {
            cipher: Aes256Gcm::new(&Aes256Gcm::generate_key(OsRng)),
        }
    }

    /// 从 base64 编码的 32 字节主密钥构造
    pub fn from_base64(encoded: &str) -> ConnectorResult<Self> {
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|e| ConnectorError::Vault(format!("master key is not valid base64: {e}")))?;
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| ConnectorError::Vault("master key must be 32 bytes".to_string()))?;
        Ok(Self::new(key))
    }
}

impl KeyManager for AesGcmKeyManager {
    fn encrypt(&self, plaintext: &[u8]) -> ConnectorResult<Vec<u8>> {
        let nonce_bytes = rand::random::<[u8; NONCE_LEN]>();
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| ConnectorError::Vault(format!("encryption failed: {e:?}")))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    fn decrypt(&self, sealed: &[u8]) -> ConnectorResult<Vec<u8>> {
        if sealed.len() < NONCE_LEN {
            return Err(ConnectorError::Vault("ciphertext too short".to_string()));
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);

        self.cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| ConnectorError::Vault(format!("decryption failed: {e:?}")))
    }
}

/// 保险库中一条密文的不透明句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SecretHandle(Uuid);

/// 解密后的明文，`Debug` 不输出内容
pub struct Plaintext(String);

impl Plaintext {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Plaintext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Plaintext(<redacted>)")
    }
}

/// 凭证保险库
pub struct CredentialVault {
    key_manager: Option<Arc<dyn KeyManager>>,
    entries: DashMap<SecretHandle, Vec<u8>>,
}

impl CredentialVault {
    pub fn new(key_manager: Arc<dyn KeyManager>) -> Self {
        Self {
            key_manager: Some(key_manager),
            entries: DashMap::new(),
        }
    }

    /// 不加密的保险库，仅保留间接访问层，不可用于生产环境
    pub fn unencrypted() -> Self {
        warn!("Credential vault running without a key manager: secrets are held in plaintext (unsafe for production)");
        Self {
            key_manager: None,
            entries: DashMap::new(),
        }
    }

    pub fn is_encrypted(&self) -> bool {
        self.key_manager.is_some()
    }

    pub fn store(&self, plaintext: &str) -> ConnectorResult<SecretHandle> {
        let sealed = match &self.key_manager {
            Some(manager) => manager.encrypt(plaintext.as_bytes())?,
            None => plaintext.as_bytes().to_vec(),
        };
        let handle = SecretHandle(Uuid::new_v4());
        self.entries.insert(handle, sealed);
        Ok(handle)
    }

    /// 解密；句柄不存在或认证失败时返回错误，不会返回默认值
    pub fn decrypt(&self, handle: &SecretHandle) -> ConnectorResult<Plaintext> {
        let sealed = self
            .entries
            .get(handle)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ConnectorError::Vault("unknown secret handle".to_string()))?;

        let bytes = match &self.key_manager {
            Some(manager) => manager.decrypt(&sealed)?,
            None => sealed,
        };
        String::from_utf8(bytes)
            .map(Plaintext)
            .map_err(|_| ConnectorError::Vault("secret is not valid UTF-8".to_string()))
    }

    /// 在闭包内使用明文，闭包返回后明文即被丢弃
    pub fn with_plaintext<R>(&self, handle: &SecretHandle, f: impl FnOnce(&str) -> R) -> ConnectorResult<R> {
        let plaintext = self.decrypt(handle)?;
        Ok(f(plaintext.expose()))
    }

    pub fn remove(&self, handle: &SecretHandle) -> bool {
        self.entries.remove(handle).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 仅用于测试：直接读取密文
    #[cfg(test)]
    fn raw(&self, handle: &SecretHandle) -> Option<Vec<u8>> {
        self.entries.get(handle).map(|entry| entry.value().clone())
    }
}

impl fmt::Debug for CredentialVault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialVault")
            .field("encrypted", &self.is_encrypted())
            .field("entries", &self.entries.len())
            .finish()
    }
}

/// 交易所凭证：保存在保险库中的 key/secret/passphrase 句柄
#[derive(Clone, PartialEq, Eq)]
pub struct ExchangeCredentials {
    api_key: SecretHandle,
    api_secret: SecretHandle,
    passphrase: Option<SecretHandle>,
    description: String,
}

/// 凭证的脱敏视图
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactedCredentials {
    pub description: String,
    pub has_passphrase: bool,
}

impl ExchangeCredentials {
    /// 将明文凭证存入保险库
    pub fn seal(
        vault: &CredentialVault,
        api_key: &str,
        api_secret: &str,
        passphrase: Option<&str>,
        description: impl Into<String>,
    ) -> ConnectorResult<Self> {
        if api_key.trim().is_empty() {
            return Err(ConnectorError::Authentication("api key is empty".to_string()));
        }
        if api_secret.trim().is_empty() {
            return Err(ConnectorError::Authentication("api secret is empty".to_string()));
        }

        let credentials = Self {
            api_key: vault.store(api_key)?,
            api_secret: vault.store(api_secret)?,
            passphrase: passphrase.map(|p| vault.store(p)).transpose()?,
            description: description.into(),
        };
        debug!("Sealed credentials '{}'", credentials.description);
        Ok(credentials)
    }

    pub fn api_key(&self) -> &SecretHandle {
        &self.api_key
    }

    pub fn api_secret(&self) -> &SecretHandle {
        &self.api_secret
    }

    pub fn passphrase(&self) -> Option<&SecretHandle> {
        self.passphrase.as_ref()
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn to_redacted_view(&self) -> RedactedCredentials {
        RedactedCredentials {
            description: self.description.clone(),
            has_passphrase: self.passphrase.is_some(),
        }
    }

    /// 从保险库中销毁全部密文
    pub fn purge(&self, vault: &CredentialVault) {
        vault.remove(&self.api_key);
        vault.remove(&self.api_secret);
        if let Some(passphrase) = &self.passphrase {
            vault.remove(passphrase);
        }
    }

    /// 整体替换为新凭证，旧句柄随即销毁
    pub fn replace(&mut self, vault: &CredentialVault, replacement: ExchangeCredentials) {
        let previous = std::mem::replace(self, replacement);
        previous.purge(vault);
        debug!("Replaced credentials '{}' with '{}'", previous.description, self.description);
    }
}

impl fmt::Debug for ExchangeCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeCredentials")
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encrypted_vault() -> CredentialVault {
        CredentialVault::new(Arc::new(AesGcmKeyManager::generate()))
    }

    #[test]
    fn test_round_trip_returns_original() {
        let vault = encrypted_vault();
        let handle = vault.store("s3cr3t-ÄPI-secret").unwrap();
        assert_eq!(vault.decrypt(&handle).unwrap().expose(), "s3cr3t-ÄPI-secret");
    }

    #[test]
    fn test_ciphertext_does_not_contain_plaintext() {
        let vault = encrypted_vault();
        let handle = vault.store("plain-secret-value").unwrap();
        let raw = vault.raw(&handle).unwrap();
        assert!(!raw.windows(b"plain-secret-value".len()).any(|w| w == b"plain-secret-value"));
    }

    #[test]
    fn test_decrypt_fails_closed() {
        let vault = encrypted_vault();
        let handle = vault.store("x").unwrap();
        assert!(vault.remove(&handle));
        assert!(matches!(vault.decrypt(&handle), Err(ConnectorError::Vault(_))));

        // 用另一把密钥解密必须失败
        let sealed = AesGcmKeyManager::generate().encrypt(b"secret").unwrap();
        assert!(AesGcmKeyManager::generate().decrypt(&sealed).is_err());
        assert!(AesGcmKeyManager::generate().decrypt(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_unencrypted_vault_still_indirects() {
        let vault = CredentialVault::unencrypted();
        assert!(!vault.is_encrypted());
        let handle = vault.store("abc").unwrap();
        let len = vault.with_plaintext(&handle, |s| s.len()).unwrap();
        assert_eq!(len, 3);
    }

    #[test]
    fn test_master_key_from_base64() {
        let encoded = BASE64.encode([7u8; 32]);
        let manager = AesGcmKeyManager::from_base64(&encoded).unwrap();
        let sealed = manager.encrypt(b"hello").unwrap();
        assert_eq!(manager.decrypt(&sealed).unwrap(), b"hello");

        assert!(AesGcmKeyManager::from_base64(&BASE64.encode([1u8; 16])).is_err());
        assert!(AesGcmKeyManager::from_base64("not base64!!").is_err());
    }

    #[test]
    fn test_credentials_redaction_and_purge() {
        let vault = encrypted_vault();
        let creds = ExchangeCredentials::seal(&vault, "key-123", "secret-456", Some("pass"), "bybit main").unwrap();
        assert_eq!(vault.len(), 3);

        let debug = format!("{creds:?}");
        assert!(!debug.contains("key-123"));
        assert!(!debug.contains("secret-456"));
        assert_eq!(
            creds.to_redacted_view(),
            RedactedCredentials {
                description: "bybit main".to_string(),
                has_passphrase: true
            }
        );

        let secret = vault.decrypt(creds.api_secret()).unwrap();
        assert_eq!(format!("{secret:?}"), "Plaintext(<redacted>)");

        creds.purge(&vault);
        assert!(vault.is_empty());
        assert!(vault.decrypt(creds.api_key()).is_err());
    }

    #[test]
    fn test_replace_purges_previous_handles() {
        let vault = encrypted_vault();
        let mut creds = ExchangeCredentials::seal(&vault, "old-key", "old-secret", None, "old").unwrap();
        let old_key = *creds.api_key();

        let fresh = ExchangeCredentials::seal(&vault, "new-key", "new-secret", None, "new").unwrap();
        creds.replace(&vault, fresh);

        assert_eq!(vault.len(), 2);
        assert!(vault.decrypt(&old_key).is_err());
        assert_eq!(vault.decrypt(creds.api_key()).unwrap().expose(), "new-key");
        assert_eq!(creds.description(), "new");
    }

    #[test]
    fn test_seal_rejects_empty_secret() {
        let vault = encrypted_vault();
        assert!(matches!(
            ExchangeCredentials::seal(&vault, "key", "", None, "empty"),
            Err(ConnectorError::Authentication(_))
        ));
    }
}

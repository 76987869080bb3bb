//! Bybit HMAC-SHA256 请求签名

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::connectors::common::pipeline::RequestSigner;
use crate::types::errors::{ConnectorError, ConnectorResult};

type HmacSha256 = Hmac<Sha256>;

/// 待签名串：参数（含 `api_key`）按键排序后以 `k=v&...` 拼接，再追加 `&timestamp=<毫秒>`
pub fn canonical_payload(params: &[(String, String)], timestamp_ms: i64) -> String {
    let mut sorted: Vec<&(String, String)> = params.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    let joined = sorted
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");

    if joined.is_empty() {
        format!("timestamp={}", timestamp_ms)
    } else {
        format!("{}&timestamp={}", joined, timestamp_ms)
    }
}

/// HMAC-SHA256，输出小写十六进制
pub fn sign_payload(payload: &str, secret: &str) -> ConnectorResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ConnectorError::Authentication(format!("HMAC init failed: {}", e)))?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BybitSigner;

impl RequestSigner for BybitSigner {
    fn sign(&self, params: &mut Vec<(String, String)>, api_key: &str, api_secret: &str, timestamp_ms: i64) -> ConnectorResult<()> {
        // 重试时重新签名，先清掉上一次的签名字段
        params.retain(|(k, _)| k != "api_key" && k != "timestamp" && k != "sign");
        params.push(("api_key".to_string(), api_key.to_string()));

        let signature = sign_payload(&canonical_payload(params, timestamp_ms), api_secret)?;
        params.push(("timestamp".to_string(), timestamp_ms.to_string()));
        params.push(("sign".to_string(), signature));
        Ok(())
    }
}

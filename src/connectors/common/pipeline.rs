//! 请求管道
//!
//! 每次尝试依次执行：获取限流许可 -> 签名 -> 检查请求闸门 -> 带超时发送 -> 分类 -> 解析响应包。
//! 签名放在限流等待之后，时间戳不会因排队而过期；截止时间同时约束限流等待和发送。
//! 可重试错误按指数退避重试，重签名使用新的时间戳。

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, error, warn};
use reqwest::Method;
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::time::{sleep, timeout, timeout_at, Instant};

use super::rate_limiter::RateLimiter;
use super::retry::RetryPolicy;
use super::transport::{HttpRequest, HttpResponse, HttpTransport};
use super::vault::{CredentialVault, ExchangeCredentials};
use crate::types::errors::{ConnectorError, ConnectorResult};

/// 交易所签名算法
pub trait RequestSigner: Send + Sync {
    /// 向参数中追加 `api_key`、时间戳和签名
    fn sign(&self, params: &mut Vec<(String, String)>, api_key: &str, api_secret: &str, timestamp_ms: i64) -> ConnectorResult<()>;
}

/// 交易所响应包解析：成功时返回业务数据，否则返回分类后的错误
pub trait EnvelopeParser: Send + Sync {
    fn parse(&self, body: &str) -> ConnectorResult<Value>;
}

/// 发送前最后一刻检查的请求闸门
pub trait RequestGate: Send + Sync {
    fn check(&self) -> ConnectorResult<()>;
}

/// 单个逻辑请求的描述
#[derive(Clone)]
pub struct RequestSpec {
    pub method: Method,
    pub endpoint: String,
    pub params: Vec<(String, String)>,
    pub signed: bool,
    /// 逻辑操作名，用于日志
    pub operation: String,
    /// 限流类别，默认与操作名相同
    pub rate_key: String,
    pub gate: Option<Arc<dyn RequestGate>>,
    pub deadline: Option<Instant>,
}

impl RequestSpec {
    pub fn new(method: Method, endpoint: impl Into<String>, operation: impl Into<String>) -> Self {
        let operation = operation.into();
        Self {
            method,
            endpoint: endpoint.into(),
            params: Vec::new(),
            signed: false,
            rate_key: operation.clone(),
            operation,
            gate: None,
            deadline: None,
        }
    }

    pub fn get(endpoint: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::new(Method::GET, endpoint, operation)
    }

    pub fn post(endpoint: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::new(Method::POST, endpoint, operation)
    }

    pub fn param(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.params.push((key.into(), value.to_string()));
        self
    }

    pub fn param_opt(self, key: impl Into<String>, value: Option<impl ToString>) -> Self {
        match value {
            Some(value) => self.param(key, value),
            None => self,
        }
    }

    pub fn rate_key(mut self, key: impl Into<String>) -> Self {
        self.rate_key = key.into();
        self
    }

    pub fn signed(mut self) -> Self {
        self.signed = true;
        self
    }

    pub fn gated(mut self, gate: Arc<dyn RequestGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }
}

impl fmt::Debug for RequestSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestSpec")
            .field("method", &self.method)
            .field("endpoint", &self.endpoint)
            .field("operation", &self.operation)
            .field("rate_key", &self.rate_key)
            .field("signed", &self.signed)
            .field("gated", &self.gate.is_some())
            .finish()
    }
}

/// 请求管道
pub struct RequestPipeline {
    venue: &'static str,
    base_url: String,
    transport: Arc<dyn HttpTransport>,
    limiter: RateLimiter,
    retry: RetryPolicy,
    attempt_timeout: Duration,
    signer: Arc<dyn RequestSigner>,
    parser: Arc<dyn EnvelopeParser>,
    vault: Arc<CredentialVault>,
    credentials: RwLock<Option<ExchangeCredentials>>,
}

/// 构造管道所需的全部组件
pub struct PipelineParts {
    pub venue: &'static str,
    pub base_url: String,
    pub transport: Arc<dyn HttpTransport>,
    pub limiter: RateLimiter,
    pub retry: RetryPolicy,
    pub attempt_timeout: Duration,
    pub signer: Arc<dyn RequestSigner>,
    pub parser: Arc<dyn EnvelopeParser>,
    pub vault: Arc<CredentialVault>,
    pub credentials: Option<ExchangeCredentials>,
}

impl RequestPipeline {
    pub fn new(parts: PipelineParts) -> Self {
        Self {
            venue: parts.venue,
            base_url: parts.base_url.trim_end_matches('/').to_string(),
            transport: parts.transport,
            limiter: parts.limiter,
            retry: parts.retry,
            attempt_timeout: parts.attempt_timeout,
            signer: parts.signer,
            parser: parts.parser,
            vault: parts.vault,
            credentials: RwLock::new(parts.credentials),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn vault(&self) -> &Arc<CredentialVault> {
        &self.vault
    }

    pub async fn has_credentials(&self) -> bool {
        self.credentials.read().await.is_some()
    }

    /// 替换凭证，旧凭证从保险库中销毁
    pub async fn update_credentials(&self, replacement: ExchangeCredentials) {
        let mut slot = self.credentials.write().await;
        match slot.as_mut() {
            Some(current) => current.replace(&self.vault, replacement),
            None => *slot = Some(replacement),
        }
    }

    /// 取出并销毁凭证
    pub async fn purge_credentials(&self) {
        if let Some(credentials) = self.credentials.write().await.take() {
            credentials.purge(&self.vault);
        }
    }

    pub async fn credentials_view(&self) -> Option<super::vault::RedactedCredentials> {
        self.credentials.read().await.as_ref().map(ExchangeCredentials::to_redacted_view)
    }

    /// 执行请求，重试在本次调用内部完成
    pub async fn request(&self, spec: RequestSpec) -> ConnectorResult<Value> {
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            match self.attempt(&spec, attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("[{}] {} succeeded on attempt {}", self.venue, spec.operation, attempt);
                    }
                    return Ok(value);
                }
                Err(err) if err.is_retryable() && self.retry.should_retry(attempt) => {
                    let delay = self.retry.delay_for(attempt);
                    if let Some(deadline) = spec.deadline {
                        if Instant::now() + delay >= deadline {
                            warn!(
                                "[{}] {} deadline reached after {} attempt(s): {}",
                                self.venue, spec.operation, attempt, err
                            );
                            return Err(ConnectorError::DeadlineExceeded { attempts: attempt });
                        }
                    }
                    warn!(
                        "[{}] {} attempt {}/{} failed: {}, retrying in {:?}",
                        self.venue,
                        spec.operation,
                        attempt,
                        self.retry.max_attempts(),
                        err,
                        delay
                    );
                    sleep(delay).await;
                }
                Err(err) => {
                    let err = err.with_attempts(attempt);
                    if err.is_caller_error() {
                        debug!("[{}] {} rejected: {}", self.venue, spec.operation, err);
                    } else if err.is_retryable() {
                        error!("[{}] {} failed after {} attempt(s): {}", self.venue, spec.operation, attempt, err);
                    } else {
                        warn!("[{}] {} failed: {}", self.venue, spec.operation, err);
                    }
                    return Err(err);
                }
            }
        }
    }

    async fn attempt(&self, spec: &RequestSpec, attempt: u32) -> ConnectorResult<Value> {
        let _permit = match spec.deadline {
            Some(deadline) => timeout_at(deadline, self.limiter.acquire(&spec.rate_key))
                .await
                .map_err(|_| ConnectorError::DeadlineExceeded {
                    attempts: attempt.saturating_sub(1),
                })?,
            None => self.limiter.acquire(&spec.rate_key).await,
        };

        let mut params = spec.params.clone();
        if spec.signed {
            self.sign(&mut params).await?;
        }

        if let Some(gate) = &spec.gate {
            gate.check()?;
        }

        let (budget, bounded_by_deadline) = match spec.deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Err(ConnectorError::DeadlineExceeded {
                        attempts: attempt.saturating_sub(1),
                    });
                }
                if remaining < self.attempt_timeout {
                    (remaining, true)
                } else {
                    (self.attempt_timeout, false)
                }
            }
            None => (self.attempt_timeout, false),
        };

        let request = HttpRequest {
            method: spec.method.clone(),
            url: format!("{}{}", self.base_url, spec.endpoint),
            params,
        };

        let response = match timeout(budget, self.transport.send(request)).await {
            Ok(result) => result?,
            Err(_) if bounded_by_deadline => return Err(ConnectorError::DeadlineExceeded { attempts: attempt }),
            Err(_) => {
                return Err(ConnectorError::TransientNetwork {
                    message: format!("request timed out after {:?}", budget),
                    attempts: attempt,
                })
            }
        };

        self.classify(response)
    }

    async fn sign(&self, params: &mut Vec<(String, String)>) -> ConnectorResult<()> {
        let guard = self.credentials.read().await;
        let credentials = guard
            .as_ref()
            .ok_or_else(|| ConnectorError::Authentication("no credentials configured".to_string()))?;

        let api_key = self.vault.decrypt(credentials.api_key())?;
        let api_secret = self.vault.decrypt(credentials.api_secret())?;
        self.signer
            .sign(params, api_key.expose(), api_secret.expose(), Utc::now().timestamp_millis())
    }

    fn classify(&self, response: HttpResponse) -> ConnectorResult<Value> {
        if response.is_success() {
            return self.parser.parse(&response.body);
        }

        let body = truncate(&response.body, 512);
        match response.status {
            401 | 403 => Err(ConnectorError::Authentication(format!("HTTP {}: {}", response.status, body))),
            429 => Err(ConnectorError::RateLimitExceeded {
                message: format!("HTTP 429: {body}"),
                attempts: 1,
            }),
            status => Err(ConnectorError::Http {
                status,
                body,
                attempts: 1,
            }),
        }
    }
}

fn truncate(body: &str, max_chars: usize) -> String {
    match body.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

impl fmt::Debug for RequestPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestPipeline")
            .field("venue", &self.venue)
            .field("base_url", &self.base_url)
            .field("retry", &self.retry)
            .field("attempt_timeout", &self.attempt_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::common::transport::stub::StubTransport;
    use crate::types::config::{RateLimitRule, RetryConfig};
    use serde_json::json;
    use std::collections::HashMap;

    struct PlainSigner;

    impl RequestSigner for PlainSigner {
        fn sign(&self, params: &mut Vec<(String, String)>, api_key: &str, _secret: &str, timestamp_ms: i64) -> ConnectorResult<()> {
            params.push(("api_key".to_string(), api_key.to_string()));
            params.push(("timestamp".to_string(), timestamp_ms.to_string()));
            params.push(("sign".to_string(), "signed".to_string()));
            Ok(())
        }
    }

    // 最小响应包：{code, data}
    struct CodeParser;

    impl EnvelopeParser for CodeParser {
        fn parse(&self, body: &str) -> ConnectorResult<Value> {
            let value: Value = serde_json::from_str(body)?;
            match value["code"].as_i64() {
                Some(0) => Ok(value["data"].clone()),
                Some(1) => Err(ConnectorError::TransientNetwork {
                    message: "busy".to_string(),
                    attempts: 1,
                }),
                Some(code) => Err(ConnectorError::VenueBusiness {
                    code,
                    message: "rejected".to_string(),
                }),
                None => Err(ConnectorError::DataParsing("missing code".to_string())),
            }
        }
    }

    struct ClosedGate;

    impl RequestGate for ClosedGate {
        fn check(&self) -> ConnectorResult<()> {
            Err(ConnectorError::SecurityGate("closed".to_string()))
        }
    }

    // 记录每次签名发生时的（暂停时钟下的）时刻
    #[derive(Default)]
    struct RecordingSigner {
        signed_at: std::sync::Mutex<Vec<Instant>>,
    }

    impl RequestSigner for RecordingSigner {
        fn sign(&self, params: &mut Vec<(String, String)>, api_key: &str, secret: &str, timestamp_ms: i64) -> ConnectorResult<()> {
            self.signed_at.lock().unwrap().push(Instant::now());
            PlainSigner.sign(params, api_key, secret, timestamp_ms)
        }
    }

    fn pipeline(stub: Arc<StubTransport>, with_credentials: bool) -> RequestPipeline {
        build_pipeline(
            stub,
            with_credentials,
            RateLimitRule::new(1000, Duration::from_secs(1)),
            Arc::new(PlainSigner),
        )
    }

    fn build_pipeline(
        stub: Arc<StubTransport>,
        with_credentials: bool,
        rule: RateLimitRule,
        signer: Arc<dyn RequestSigner>,
    ) -> RequestPipeline {
        let vault = Arc::new(CredentialVault::unencrypted());
        let credentials = with_credentials
            .then(|| ExchangeCredentials::seal(&vault, "key", "secret", None, "test").unwrap());
        RequestPipeline::new(PipelineParts {
            venue: "Test",
            base_url: "https://venue.invalid/".to_string(),
            transport: stub,
            limiter: RateLimiter::new(HashMap::new(), rule),
            retry: RetryPolicy::new(&RetryConfig {
                max_attempts: 3,
                base_delay_ms: 100,
                max_delay_ms: 1000,
            }),
            attempt_timeout: Duration::from_secs(5),
            signer,
            parser: Arc::new(CodeParser),
            vault,
            credentials,
        })
    }

    fn ok(data: Value) -> Value {
        json!({"code": 0, "data": data})
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_then_success() {
        let stub = Arc::new(StubTransport::new());
        stub.push_error(ConnectorError::TransientNetwork {
            message: "reset".to_string(),
            attempts: 1,
        });
        stub.push_json(200, json!({"code": 1}));
        stub.push_json(200, ok(json!({"price": "1"})));

        let pipeline = pipeline(stub.clone(), false);
        let value = pipeline.request(RequestSpec::get("/ticker", "get_ticker")).await.unwrap();
        assert_eq!(value, json!({"price": "1"}));
        assert_eq!(stub.calls(), 3);
        assert_eq!(stub.requests()[0].url, "https://venue.invalid/ticker");
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_report_attempts() {
        let stub = Arc::new(StubTransport::new());
        stub.set_fallback(503, json!({"error": "unavailable"}));

        let pipeline = pipeline(stub.clone(), false);
        let started = Instant::now();
        let err = pipeline.request(RequestSpec::get("/ticker", "get_ticker")).await.unwrap_err();

        assert_eq!(stub.calls(), 3);
        assert!(matches!(err, ConnectorError::Http { status: 503, attempts: 3, .. }));
        // 100ms + 200ms 退避
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_status_is_retried() {
        let stub = Arc::new(StubTransport::new());
        stub.push_json(429, json!({}));
        stub.push_json(200, ok(json!(1)));

        let pipeline = pipeline(stub.clone(), false);
        assert_eq!(pipeline.request(RequestSpec::get("/x", "x")).await.unwrap(), json!(1));
        assert_eq!(stub.calls(), 2);
    }

    #[tokio::test]
    async fn test_auth_errors_are_not_retried() {
        let stub = Arc::new(StubTransport::new());
        stub.set_fallback(401, json!({"error": "invalid key"}));

        let pipeline = pipeline(stub.clone(), true);
        let err = pipeline
            .request(RequestSpec::get("/private", "private").signed())
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::Authentication(_)));
        assert_eq!(stub.calls(), 1);
    }

    #[tokio::test]
    async fn test_http_and_venue_errors_are_distinct() {
        let stub = Arc::new(StubTransport::new());
        stub.push_json(400, json!({"error": "bad request"}));
        stub.push_json(200, json!({"code": 30010}));

        let pipeline = pipeline(stub.clone(), false);
        let http = pipeline.request(RequestSpec::get("/a", "a")).await.unwrap_err();
        let venue = pipeline.request(RequestSpec::get("/b", "b")).await.unwrap_err();

        assert!(matches!(http, ConnectorError::Http { status: 400, attempts: 1, .. }));
        assert!(matches!(venue, ConnectorError::VenueBusiness { code: 30010, .. }));
        assert_eq!(stub.calls(), 2);
    }

    #[tokio::test]
    async fn test_signed_request_without_credentials_never_reaches_transport() {
        let stub = Arc::new(StubTransport::new());
        let pipeline = pipeline(stub.clone(), false);
        let err = pipeline
            .request(RequestSpec::get("/private", "private").signed())
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::Authentication(_)));
        assert_eq!(stub.calls(), 0);
    }

    #[tokio::test]
    async fn test_signed_params_attached() {
        let stub = Arc::new(StubTransport::new());
        stub.push_json(200, ok(json!({})));
        let pipeline = pipeline(stub.clone(), true);
        pipeline
            .request(RequestSpec::post("/order", "create_order").param("symbol", "BTCUSDC").signed())
            .await
            .unwrap();

        let request = stub.last_request().unwrap();
        assert_eq!(request.method, Method::POST);
        assert_eq!(request.param("symbol"), Some("BTCUSDC"));
        assert_eq!(request.param("api_key"), Some("key"));
        assert!(request.param("timestamp").is_some());
        assert!(request.param("sign").is_some());
    }

    #[tokio::test]
    async fn test_closed_gate_blocks_before_io() {
        let stub = Arc::new(StubTransport::new());
        let pipeline = pipeline(stub.clone(), true);
        let err = pipeline
            .request(RequestSpec::post("/withdraw", "withdraw").signed().gated(Arc::new(ClosedGate)))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::SecurityGate(_)));
        assert_eq!(stub.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_is_transient() {
        let stub = Arc::new(StubTransport::new());
        stub.push_delayed(Duration::from_secs(10), 200, ok(json!(1)));
        stub.push_json(200, ok(json!(2)));

        let pipeline = pipeline(stub.clone(), false);
        assert_eq!(pipeline.request(RequestSpec::get("/slow", "slow")).await.unwrap(), json!(2));
        assert_eq!(stub.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_stops_retries() {
        let stub = Arc::new(StubTransport::new());
        stub.set_fallback(502, json!({}));

        let pipeline = pipeline(stub.clone(), false);
        let deadline = Instant::now() + Duration::from_millis(150);
        let err = pipeline
            .request(RequestSpec::get("/x", "x").with_deadline(Some(deadline)))
            .await
            .unwrap_err();

        // 第一次退避 100ms 在截止前，第二次 200ms 越过截止时间
        assert_eq!(err, ConnectorError::DeadlineExceeded { attempts: 2 });
        assert_eq!(stub.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_bounds_rate_limit_wait() {
        let stub = Arc::new(StubTransport::new());
        stub.set_fallback(200, ok(json!(1)));
        let pipeline = build_pipeline(stub.clone(), false, RateLimitRule::new(1, Duration::from_secs(10)), Arc::new(PlainSigner));

        pipeline.request(RequestSpec::get("/x", "x")).await.unwrap();

        let started = Instant::now();
        let deadline = started + Duration::from_secs(1);
        let err = pipeline
            .request(RequestSpec::get("/x", "x").with_deadline(Some(deadline)))
            .await
            .unwrap_err();

        // 截止时间在限流窗口滑过之前到达，不再等满 10 秒
        assert_eq!(err, ConnectorError::DeadlineExceeded { attempts: 0 });
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(stub.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_signing_happens_after_rate_limit_wait() {
        let stub = Arc::new(StubTransport::new());
        stub.set_fallback(200, ok(json!({})));
        let signer = Arc::new(RecordingSigner::default());
        let pipeline = build_pipeline(stub.clone(), true, RateLimitRule::new(1, Duration::from_secs(1)), signer.clone());

        let started = Instant::now();
        pipeline.request(RequestSpec::get("/private", "private").signed()).await.unwrap();
        pipeline.request(RequestSpec::get("/private", "private").signed()).await.unwrap();

        let signed_at = signer.signed_at.lock().unwrap().clone();
        assert_eq!(signed_at.len(), 2);
        // 第二次签名发生在限流等待结束之后
        assert!(signed_at[1].duration_since(started) >= Duration::from_secs(1));
        assert_eq!(stub.calls(), 2);
    }

    #[tokio::test]
    async fn test_update_credentials_replaces_vault_entries() {
        let stub = Arc::new(StubTransport::new());
        let pipeline = pipeline(stub, true);
        assert_eq!(pipeline.vault().len(), 2);

        let fresh = ExchangeCredentials::seal(pipeline.vault(), "k2", "s2", Some("p"), "rotated").unwrap();
        pipeline.update_credentials(fresh).await;
        assert_eq!(pipeline.vault().len(), 3);
        assert_eq!(pipeline.credentials_view().await.unwrap().description, "rotated");

        pipeline.purge_credentials().await;
        assert!(pipeline.vault().is_empty());
        assert!(!pipeline.has_credentials().await);
    }

    #[test]
    fn test_truncate_long_bodies() {
        assert_eq!(truncate("abc", 5), "abc");
        assert_eq!(truncate("abcdef", 3), "abc...");
    }
}

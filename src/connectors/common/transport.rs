//! HTTP 传输层
//! 请求管道只依赖 `HttpTransport`，生产环境使用 reqwest，测试中替换为脚本化的桩

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::{Client, Method};
use serde_json::{Map, Value};

use crate::types::errors::{ConnectorError, ConnectorResult};

/// 发送给传输层的请求；GET 参数放在查询串，POST 参数编码为 JSON 对象
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub params: Vec<(String, String)>,
}

impl HttpRequest {
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn json_body(&self) -> Value {
        let map: Map<String, Value> = self
            .params
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        Value::Object(map)
    }
}

/// 原始 HTTP 响应
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP 传输抽象
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// 发送一次请求；连接失败、读取失败返回 `TransientNetwork`，HTTP 状态码原样返回
    async fn send(&self, request: HttpRequest) -> ConnectorResult<HttpResponse>;
}

/// 基于 reqwest 的传输实现
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(connect_timeout: Duration) -> ConnectorResult<Self> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| ConnectorError::Configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

fn network_error(err: reqwest::Error) -> ConnectorError {
    let kind = if err.is_timeout() {
        "timeout"
    } else if err.is_connect() {
        "connect"
    } else {
        "request"
    };
    ConnectorError::TransientNetwork {
        message: format!("{kind} error: {err}"),
        attempts: 1,
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> ConnectorResult<HttpResponse> {
        debug!("{} {}", request.method, request.url);

        let builder = if request.method == Method::GET {
            self.client.get(&request.url).query(&request.params)
        } else {
            self.client
                .request(request.method.clone(), &request.url)
                .json(&request.json_body())
        };

        let response = builder.send().await.map_err(network_error)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(network_error)?;
        Ok(HttpResponse { status, body })
    }
}

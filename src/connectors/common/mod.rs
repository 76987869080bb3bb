// src/connectors/common/mod.rs - 连接器通用功能

pub mod vault;
pub mod rate_limiter;
pub mod retry;
pub mod transport;
pub mod pipeline;
pub mod symbol_cache;
pub mod withdrawal_guard;

// 重新导出主要类型
pub use vault::{
    AesGcmKeyManager,
    CredentialVault,
    ExchangeCredentials,
    KeyManager,
    Plaintext,
    RedactedCredentials,
    SecretHandle,
};

pub use rate_limiter::{Permit, RateLimiter};
pub use retry::RetryPolicy;
pub use transport::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};

pub use pipeline::{
    EnvelopeParser,
    PipelineParts,
    RequestGate,
    RequestPipeline,
    RequestSigner,
    RequestSpec,
};

pub use symbol_cache::{SymbolCache, SymbolTable};
pub use withdrawal_guard::WithdrawalGuard;

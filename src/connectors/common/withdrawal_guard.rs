//! 提现安全开关
//! 默认关闭，必须显式确认才能打开；请求管道在发送前最后一刻再检查一次

use std::sync::atomic::{AtomicBool, Ordering};

use log::{info, warn};

use super::pipeline::RequestGate;
use crate::types::errors::{ConnectorError, ConnectorResult};

#[derive(Debug, Default)]
pub struct WithdrawalGuard {
    venue: &'static str,
    enabled: AtomicBool,
}

impl WithdrawalGuard {
    pub fn new(venue: &'static str) -> Self {
        Self {
            venue,
            enabled: AtomicBool::new(false),
        }
    }

    /// 打开提现；`confirm` 为 false 时拒绝且保持关闭
    pub fn enable(&self, confirm: bool) -> ConnectorResult<()> {
        if !confirm {
            return Err(ConnectorError::Validation(
                "withdrawals can only be enabled with explicit confirmation".to_string(),
            ));
        }
        self.enabled.store(true, Ordering::SeqCst);
        warn!("[{}] Withdrawals ENABLED", self.venue);
        Ok(())
    }

    pub fn disable(&self) {
        if self.enabled.swap(false, Ordering::SeqCst) {
            info!("[{}] Withdrawals disabled", self.venue);
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn ensure_enabled(&self) -> ConnectorResult<()> {
        if self.is_enabled() {
            Ok(())
        } else {
            warn!("[{}] Withdrawal blocked: withdrawals are disabled", self.venue);
            Err(ConnectorError::SecurityGate("withdrawals are disabled".to_string()))
        }
    }
}

impl RequestGate for WithdrawalGuard {
    fn check(&self) -> ConnectorResult<()> {
        self.ensure_enabled()
    }
}

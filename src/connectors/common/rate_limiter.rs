//! 按操作类别的滑动窗口限流器
//! 每个类别独立计数，行情轮询不会挤占下单额度

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use log::debug;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};

use crate::types::config::RateLimitRule;

/// 限流许可
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permit {
    pub key: String,
    /// 获取许可前等待的时间
    pub waited: Duration,
}

#[derive(Debug)]
struct SlidingWindow {
    rule: RateLimitRule,
    history: VecDeque<Instant>,
}

impl SlidingWindow {
    fn new(rule: RateLimitRule) -> Self {
        Self {
            rule,
            history: VecDeque::with_capacity(rule.max_requests as usize),
        }
    }

    // 有空位时记录并返回 None，否则返回最早可用时间
    fn try_take(&mut self, now: Instant) -> Option<Instant> {
        let window = self.rule.window();
        while let Some(front) = self.history.front() {
            if now.duration_since(*front) >= window {
                self.history.pop_front();
            } else {
                break;
            }
        }

        if self.history.len() < self.rule.max_requests as usize {
            self.history.push_back(now);
            None
        } else {
            self.history.front().map(|front| *front + window)
        }
    }
}

/// 限流器
#[derive(Debug)]
pub struct RateLimiter {
    rules: HashMap<String, RateLimitRule>,
    default_rule: RateLimitRule,
    windows: DashMap<String, Arc<Mutex<SlidingWindow>>>,
}

impl RateLimiter {
    pub fn new(rules: HashMap<String, RateLimitRule>, default_rule: RateLimitRule) -> Self {
        Self {
            rules: rules
                .into_iter()
                .map(|(key, rule)| (key, Self::sanitize(rule)))
                .collect(),
            default_rule: Self::sanitize(default_rule),
            windows: DashMap::new(),
        }
    }

    // 零额度会让调用方永久挂起
    fn sanitize(rule: RateLimitRule) -> RateLimitRule {
        RateLimitRule {
            max_requests: rule.max_requests.max(1),
            window_ms: rule.window_ms.max(1),
        }
    }

    pub fn rule_for(&self, key: &str) -> RateLimitRule {
        self.rules.get(key).copied().unwrap_or(self.default_rule)
    }

    fn window_for(&self, key: &str) -> Arc<Mutex<SlidingWindow>> {
        self.windows
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(SlidingWindow::new(self.rule_for(key)))))
            .clone()
    }

    /// 获取许可；额度用尽时挂起当前任务直到窗口滑过，不会丢弃请求
    pub async fn acquire(&self, key: &str) -> Permit {
        let window = self.window_for(key);
        let started = Instant::now();
        // 持锁等待，同一类别的等待者按 FIFO 顺序放行
        let mut guard = window.lock().await;

        loop {
            match guard.try_take(Instant::now()) {
                None => {
                    return Permit {
                        key: key.to_string(),
                        waited: started.elapsed(),
                    }
                }
                Some(ready_at) => {
                    debug!("Rate limit reached for '{}', waiting {:?}", key, ready_at.saturating_duration_since(Instant::now()));
                    sleep_until(ready_at).await;
                }
            }
        }
    }

    /// 不等待时当前还能立即获取的许可数
    pub async fn available(&self, key: &str) -> u32 {
        let window = self.window_for(key);
        let guard = window.lock().await;
        let now = Instant::now();
        let window_len = guard.rule.window();
        let in_window = guard
            .history
            .iter()
            .filter(|at| now.duration_since(**at) < window_len)
            .count() as u32;
        guard.rule.max_requests.saturating_sub(in_window)
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(
            HashMap::new(),
            RateLimitRule {
                max_requests: 50,
                window_ms: 1000,
            },
        )
    }
}

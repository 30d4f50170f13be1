//! 按代理维度的滑动窗口配额。
//!
//! 每个 key 在一个窗口内最多消耗 `points` 点；把点数用到 0 的那一次消耗会让该 key
//! 额外进入 `block` 时长的冷却期，冷却期内无论窗口是否已滚动都不可用。

use crate::error::BalancerError;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaConfig {
    pub points: u32,
    pub window: Duration,
    pub block: Duration,
}

impl QuotaConfig {
    pub fn validate(&self) -> Result<(), BalancerError> {
        if self.points == 0 {
            return Err(BalancerError::config("配额点数必须大于 0"));
        }
        if self.window.is_zero() {
            return Err(BalancerError::config("配额窗口必须大于 0"));
        }
        Ok(())
    }
}

/// 剩余点数。从未消耗过的 key 视为不受限。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remaining {
    Unbounded,
    Points(u32),
}

#[derive(Debug, Clone)]
struct QuotaEntry {
    remaining: u32,
    window_expires_at: Instant,
    blocked_until: Option<Instant>,
}

impl QuotaEntry {
    fn roll(&mut self, cfg: &QuotaConfig, now: Instant) {
        if now > self.window_expires_at {
            self.remaining = cfg.points;
            self.window_expires_at = now + cfg.window;
        }
        if self.blocked_until.is_some_and(|until| until <= now) {
            self.blocked_until = None;
        }
    }

    fn is_blocked(&self, now: Instant) -> bool {
        self.blocked_until.is_some_and(|until| until > now)
    }
}

#[derive(Debug)]
pub struct QuotaTracker {
    cfg: QuotaConfig,
    entries: Mutex<HashMap<String, QuotaEntry>>,
}

impl QuotaTracker {
    pub fn new(cfg: QuotaConfig) -> Self {
        Self {
            cfg,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> QuotaConfig {
        self.cfg
    }

    pub async fn remaining(&self, key: &str) -> Remaining {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        match entries.get_mut(key) {
            None => Remaining::Unbounded,
            Some(e) => {
                e.roll(&self.cfg, now);
                Remaining::Points(e.remaining)
            }
        }
    }

    pub async fn is_available(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        match entries.get_mut(key) {
            None => true,
            Some(e) => {
                e.roll(&self.cfg, now);
                !e.is_blocked(now) && e.remaining > 0
            }
        }
    }

    /// 当前窗口已开始计数且仍有余量（未冷却、剩余点数 > 0）。
    pub async fn has_open_budget(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        match entries.get_mut(key) {
            None => false,
            Some(e) => {
                e.roll(&self.cfg, now);
                !e.is_blocked(now) && e.remaining > 0
            }
        }
    }

    /// 消耗 1 点，返回剩余点数。
    ///
    /// 已被冷却或点数为 0 时返回 `QuotaExhausted`，不扣减点数。
    pub async fn consume(&self, key: &str) -> Result<u32, BalancerError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| QuotaEntry {
                remaining: self.cfg.points,
                window_expires_at: now + self.cfg.window,
                blocked_until: None,
            });
        entry.roll(&self.cfg, now);

        if entry.is_blocked(now) || entry.remaining == 0 {
            return Err(BalancerError::QuotaExhausted {
                key: key.to_string(),
            });
        }

        entry.remaining -= 1;
        if entry.remaining == 0 {
            entry.blocked_until = Some(now + self.cfg.block);
            tracing::debug!(
                endpoint = key,
                block_ms = self.cfg.block.as_millis() as u64,
                "代理配额耗尽，进入冷却"
            );
        }
        Ok(entry.remaining)
    }

    /// 冷却截止时间（仅在仍处于冷却期时返回）。
    pub async fn blocked_until(&self, key: &str) -> Option<Instant> {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        entries
            .get(key)
            .and_then(|e| e.blocked_until)
            .filter(|until| *until > now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn tracker(points: u32, window_ms: u64, block_ms: u64) -> QuotaTracker {
        QuotaTracker::new(QuotaConfig {
            points,
            window: Duration::from_millis(window_ms),
            block: Duration::from_millis(block_ms),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_costs_the_full_block_duration() {
        let q = tracker(2, 100, 200);
        let key = "http://127.0.0.1:4001";

        assert_eq!(q.consume(key).await, Ok(1));
        assert_eq!(q.consume(key).await, Ok(0));
        assert!(q.consume(key).await.unwrap_err().is_quota_exhausted());

        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(q.consume(key).await.is_err());
        assert!(!q.is_available(key).await);

        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(q.is_available(key).await);
        assert_eq!(q.consume(key).await, Ok(1));
    }

    #[tokio::test(start_paused = true)]
    async fn window_rollover_restores_points_without_block() {
        let q = tracker(3, 100, 1000);
        let key = "k";
        q.consume(key).await.unwrap();
        q.consume(key).await.unwrap();
        assert_eq!(q.remaining(key).await, Remaining::Points(1));

        tokio::time::advance(Duration::from_millis(101)).await;
        assert_eq!(q.remaining(key).await, Remaining::Points(3));
        assert!(q.blocked_until(key).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn block_outlasts_a_shorter_window() {
        let q = tracker(1, 50, 300);
        q.consume("k").await.unwrap();
        let until = q.blocked_until("k").await.unwrap();
        assert_eq!(until, Instant::now() + Duration::from_millis(300));

        tokio::time::advance(Duration::from_millis(120)).await;
        // 窗口已滚动，点数恢复，但仍在冷却期。
        assert_eq!(q.remaining("k").await, Remaining::Points(1));
        assert!(!q.is_available("k").await);
    }

    #[tokio::test]
    async fn unknown_keys_are_unbounded() {
        let q = tracker(1, 1000, 1000);
        assert_eq!(q.remaining("never-used").await, Remaining::Unbounded);
        assert!(q.is_available("never-used").await);
    }

    #[tokio::test]
    async fn concurrent_consumers_never_overdraw() {
        let q = Arc::new(tracker(5, 60_000, 60_000));
        let tasks: Vec<_> = (0..20)
            .map(|_| {
                let q = q.clone();
                tokio::spawn(async move { q.consume("shared").await })
            })
            .collect();
        let ok = futures::future::join_all(tasks)
            .await
            .into_iter()
            .filter(|r| matches!(r, Ok(Ok(_))))
            .count();
        assert_eq!(ok, 5);
        assert_eq!(q.remaining("shared").await, Remaining::Points(0));
    }

    #[test]
    fn zero_points_is_rejected() {
        let cfg = QuotaConfig {
            points: 0,
            window: Duration::from_secs(1),
            block: Duration::from_secs(1),
        };
        assert!(cfg.validate().is_err());
    }
}

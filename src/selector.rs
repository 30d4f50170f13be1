//! 选择算法：轮询，配置了配额时按配额感知的轮询。
//!
//! 游标是跨请求共享的轮转状态，所有读改写都在同一把锁内完成，
//! 并发调用方不会拿到同一个“下一个”下标（池大小为 1 时除外）。

use crate::error::BalancerError;
use crate::pool::EndpointDescriptor;
use crate::quota::QuotaTracker;
use std::sync::Arc;
use tokio::sync::Mutex;

/// 所有代理都不可用时的通知回调（仅通知，不影响本次选择结果）。
pub type ExhaustedHook = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Default)]
struct SelectionCursor {
    current_index: usize,
    started: bool,
}

pub struct EndpointSelector {
    quota: Option<Arc<QuotaTracker>>,
    on_exhausted: Option<ExhaustedHook>,
    cursor: Mutex<SelectionCursor>,
}

impl EndpointSelector {
    pub fn new(quota: Option<Arc<QuotaTracker>>, on_exhausted: Option<ExhaustedHook>) -> Self {
        Self {
            quota,
            on_exhausted,
            cursor: Mutex::new(SelectionCursor::default()),
        }
    }

    pub fn round_robin() -> Self {
        Self::new(None, None)
    }

    pub async fn current_index(&self) -> usize {
        self.cursor.lock().await.current_index
    }

    /// 选出下一个代理并推进游标。
    pub async fn next(
        &self,
        pool: &[EndpointDescriptor],
    ) -> Result<EndpointDescriptor, BalancerError> {
        if pool.is_empty() {
            return Err(BalancerError::EmptyPool);
        }

        let mut cursor = self.cursor.lock().await;
        if cursor.current_index >= pool.len() {
            // 池缩小到游标之外：从头开始。
            cursor.current_index = 0;
            cursor.started = false;
        }

        let idx = match &self.quota {
            None => {
                if cursor.started {
                    (cursor.current_index + 1) % pool.len()
                } else {
                    0
                }
            }
            Some(quota) => self.choose_index(quota, pool, cursor.current_index).await?,
        };

        cursor.current_index = idx;
        cursor.started = true;
        Ok(pool[idx].clone())
    }

    async fn choose_index(
        &self,
        quota: &QuotaTracker,
        pool: &[EndpointDescriptor],
        current: usize,
    ) -> Result<usize, BalancerError> {
        // 当前代理的窗口已开始计数且仍有余量：继续用它，直到用完再轮转。
        if quota.has_open_budget(&pool[current].key).await {
            return Ok(current);
        }

        for idx in (current + 1..pool.len()).chain(0..current) {
            if quota.is_available(&pool[idx].key).await {
                return Ok(idx);
            }
        }

        // 没有其它候选：当前代理可用则复用。
        if quota.is_available(&pool[current].key).await {
            return Ok(current);
        }

        if let Some(hook) = &self.on_exhausted {
            hook();
        }
        Err(BalancerError::NoEndpointsAvailable)
    }
}

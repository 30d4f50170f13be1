use crate::error::BalancerError;
use crate::logging::{self, LogLevel};
use crate::pool::source::EndpointSource;
use crate::pool::types::{EndpointDescriptor, PoolSnapshot, normalize_list};
use crate::util::id;
use arc_swap::ArcSwap;
use chrono::Utc;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

type RefreshResult = Result<Arc<Vec<EndpointDescriptor>>, BalancerError>;
type RefreshRx = watch::Receiver<Option<RefreshResult>>;

/// 代理池：按 TTL 缓存代理列表，并保证同一时刻最多只有一次刷新在进行。
///
/// - 快照通过 ArcSwap 整体替换，读取无锁
/// - 刷新进行中时：已有（可能过期的）非空列表的调用方直接拿旧列表；
///   池为空的调用方等待本次刷新结束并拿到同一结果（成功或失败）
/// - 刷新失败会清空池，错误只抛给发起刷新的调用方和正在等待的调用方
pub struct EndpointPool {
    source: Arc<dyn EndpointSource>,
    ttl: Duration,
    shuffle: bool,
    log_level: LogLevel,
    snapshot: ArcSwap<PoolSnapshot>,
    inflight: Mutex<Option<RefreshRx>>,
}

impl EndpointPool {
    pub fn new(source: Arc<dyn EndpointSource>, ttl: Duration, shuffle: bool) -> Self {
        Self {
            source,
            ttl,
            shuffle,
            log_level: LogLevel::Off,
            snapshot: ArcSwap::from_pointee(PoolSnapshot::default()),
            inflight: Mutex::new(None),
        }
    }

    pub fn with_log_level(mut self, log_level: LogLevel) -> Self {
        self.log_level = log_level;
        self
    }

    /// 当前快照（不触发刷新）。
    pub fn snapshot(&self) -> Arc<PoolSnapshot> {
        self.snapshot.load_full()
    }

    pub fn is_refreshing(&self) -> bool {
        self.inflight
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    /// 获取代理列表，必要时刷新。
    pub async fn get(&self, force_refresh: bool) -> RefreshResult {
        let tx = match self.claim(force_refresh)? {
            Role::Ready(endpoints) => return Ok(endpoints),
            Role::Follower(rx) => return wait_for_refresh(rx).await,
            Role::Leader(tx) => tx,
        };

        let _reset = InflightReset(&self.inflight);
        let result = self.refresh_once().await;
        let _ = tx.send(Some(result.clone()));
        result
    }

    /// 决定本次调用的角色。快照必须在持有 inflight 锁之后读取：
    /// 刷新发起方先写快照再释放标记，持锁读到的快照总是最新的。
    fn claim(&self, force_refresh: bool) -> Result<Role, BalancerError> {
        let mut guard = self
            .inflight
            .lock()
            .map_err(|_| BalancerError::fetch_failed("代理池状态锁已损坏"))?;
        let current = self.snapshot.load_full();

        if let Some(rx) = guard.as_ref() {
            if !current.is_empty() {
                return Ok(Role::Ready(current.endpoints.clone()));
            }
            return Ok(Role::Follower(rx.clone()));
        }

        if !self.needs_refresh(force_refresh, &current) {
            return Ok(Role::Ready(current.endpoints.clone()));
        }

        let (tx, rx) = watch::channel(None);
        *guard = Some(rx);
        Ok(Role::Leader(tx))
    }

    fn needs_refresh(&self, force: bool, current: &PoolSnapshot) -> bool {
        if force || current.is_empty() {
            return true;
        }
        match current.fetched_at {
            None => true,
            Some(at) => Instant::now().saturating_duration_since(at) > self.ttl,
        }
    }

    async fn refresh_once(&self) -> RefreshResult {
        let prev = self.snapshot.load_full();
        let fetched = match self.source.fetch().await {
            Ok(v) => normalize_list(&v),
            Err(e) => Err(BalancerError::fetch_failed(format!("{e:#}"))),
        };

        let now = Instant::now();
        match fetched {
            Ok(mut endpoints) => {
                if self.shuffle {
                    id::shuffle(&mut endpoints);
                }
                let endpoints = Arc::new(endpoints);
                let generation = prev.generation + 1;
                self.snapshot.store(Arc::new(PoolSnapshot {
                    endpoints: endpoints.clone(),
                    fetched_at: Some(now),
                    refreshed_at: Some(Utc::now()),
                    generation,
                }));
                tracing::debug!(count = endpoints.len(), "代理池刷新完成");
                if self.log_level.verbose_enabled() {
                    logging::pool_refreshed(&endpoints, generation);
                }
                Ok(endpoints)
            }
            Err(e) => {
                self.snapshot.store(Arc::new(PoolSnapshot {
                    endpoints: Arc::new(Vec::new()),
                    fetched_at: Some(now),
                    refreshed_at: Some(Utc::now()),
                    generation: prev.generation,
                }));
                tracing::warn!(error = %e, "代理池刷新失败，已清空代理列表");
                Err(e)
            }
        }
    }
}

enum Role {
    /// 不需要刷新，或刷新进行中但已有旧列表可用。
    Ready(Arc<Vec<EndpointDescriptor>>),
    Leader(watch::Sender<Option<RefreshResult>>),
    Follower(RefreshRx),
}

/// 无论刷新成功、失败还是发起方被取消，都清除进行中标记。
struct InflightReset<'a>(&'a Mutex<Option<RefreshRx>>);

impl Drop for InflightReset<'_> {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.0.lock() {
            *guard = None;
        }
    }
}

async fn wait_for_refresh(mut rx: RefreshRx) -> RefreshResult {
    match rx.wait_for(|r| r.is_some()).await {
        Ok(r) => r
            .clone()
            .unwrap_or_else(|| Err(BalancerError::fetch_failed("代理池刷新被中断"))),
        Err(_) => Err(BalancerError::fetch_failed("代理池刷新被中断")),
    }
}

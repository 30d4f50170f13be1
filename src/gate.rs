//! 发送闸门：限制同时进行中的请求数，并保证相邻两次放行之间至少间隔 `min_interval`。
//!
//! 等待者按先来先到的顺序放行（tokio 的 Semaphore 与 Mutex 都是公平的）。

use std::future::Future;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;

#[derive(Debug)]
pub struct DispatchGate {
    permits: Semaphore,
    max_concurrent: Option<usize>,
    min_interval: Duration,
    /// 下一次允许放行的最早时间。
    next_slot: Mutex<Option<Instant>>,
}

impl DispatchGate {
    /// `max_concurrent` 为 None 表示不限制并发。
    pub fn new(max_concurrent: Option<usize>, min_interval: Duration) -> Self {
        let permits = max_concurrent
            .filter(|n| *n > 0)
            .unwrap_or(Semaphore::MAX_PERMITS);
        Self {
            permits: Semaphore::new(permits),
            max_concurrent: max_concurrent.filter(|n| *n > 0),
            min_interval,
            next_slot: Mutex::new(None),
        }
    }

    pub fn max_concurrent(&self) -> Option<usize> {
        self.max_concurrent
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// 当前进行中的任务数（不限并发时恒为 0）。
    pub fn in_flight(&self) -> usize {
        match self.max_concurrent {
            Some(max) => max.saturating_sub(self.permits.available_permits()),
            None => 0,
        }
    }

    /// 获得放行后执行 task，task 结束时归还并发名额。
    pub async fn admit<F, T>(&self, task: F) -> T
    where
        F: Future<Output = T>,
    {
        // 信号量从不关闭，acquire 不会返回错误。
        let _permit = self.permits.acquire().await.ok();
        self.wait_for_slot().await;
        task.await
    }

    async fn wait_for_slot(&self) {
        if self.min_interval.is_zero() {
            return;
        }
        let slot = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = match *next {
                Some(at) if at > now => at,
                _ => now,
            };
            *next = Some(slot + self.min_interval);
            slot
        };
        tokio::time::sleep_until(slot).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn admissions_are_spaced_by_min_interval() {
        let gate = Arc::new(DispatchGate::new(None, Duration::from_millis(100)));
        let start = Instant::now();

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let gate = gate.clone();
                tokio::spawn(async move { gate.admit(async { Instant::now() }).await })
            })
            .collect();
        let mut times: Vec<Duration> = futures::future::join_all(tasks)
            .await
            .into_iter()
            .map(|r| r.unwrap() - start)
            .collect();
        times.sort();

        assert_eq!(
            times,
            vec![
                Duration::ZERO,
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(300)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn waiters_are_admitted_in_arrival_order() {
        let gate = Arc::new(DispatchGate::new(Some(1), Duration::from_millis(100)));
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let mut tasks = Vec::new();
        for i in 0..6 {
            let gate = gate.clone();
            let order = order.clone();
            tasks.push(tokio::spawn(async move {
                gate.admit(async {
                    order.lock().unwrap().push(i);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                })
                .await
            }));
            // 让刚派生的任务先进入等待队列。
            tokio::task::yield_now().await;
        }
        futures::future::join_all(tasks).await;

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4, 5]);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_never_exceeds_limit() {
        let gate = Arc::new(DispatchGate::new(Some(2), Duration::ZERO));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..6)
            .map(|_| {
                let gate = gate.clone();
                let running = running.clone();
                let peak = peak.clone();
                tokio::spawn(async move {
                    gate.admit(async {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await
                })
            })
            .collect();
        futures::future::join_all(tasks).await;

        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(gate.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn free_slot_still_waits_for_interval() {
        let gate = DispatchGate::new(Some(10), Duration::from_millis(250));
        let start = Instant::now();
        gate.admit(async {}).await;
        gate.admit(async {}).await;
        assert_eq!(Instant::now() - start, Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_gate_admits_immediately() {
        let gate = DispatchGate::new(Some(1), Duration::from_millis(100));
        gate.admit(async {}).await;
        tokio::time::advance(Duration::from_secs(1)).await;
        let start = Instant::now();
        gate.admit(async {}).await;
        assert_eq!(Instant::now() - start, Duration::ZERO);
    }
}

//! 后台执行器：在阻塞线程池中运行同步计算
//!
//! 推理引擎的一次完整运行是同步、可能耗时数秒的过程，放到 spawn_blocking 中执行，
//! 不阻塞回合调度。Semaphore 限制同时在跑的运行数；许可随闭包进入工作线程，
//! 超时放弃等待后仍会占用，直到工作线程真正结束。超时从调用 run 开始计算，
//! 线程池被占满时排队等待许可的回合同样会按时失败。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use crate::core::BotError;

/// 有界后台执行器
#[derive(Clone)]
pub struct OffloadExecutor {
    permits: Arc<Semaphore>,
    timeout: Option<Duration>,
}

impl OffloadExecutor {
    /// max_concurrent_runs 至少为 1；timeout_secs 为 0 表示不设超时
    pub fn new(max_concurrent_runs: usize, timeout_secs: u64) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent_runs.max(1))),
            timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
        }
    }

    /// 当前空闲的运行许可数
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// 在工作线程中执行 f，挂起直到完成、超时或线程异常
    pub async fn run<F, T>(&self, f: F) -> Result<T, BotError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        // 截止时间覆盖排队等许可与执行两段
        let attempt = async move {
            let permit = permits
                .acquire_owned()
                .await
                .map_err(|e| BotError::Worker(e.to_string()))?;
            let handle = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                f()
            });
            handle.await.map_err(|e| {
                if e.is_panic() {
                    BotError::Worker("worker panicked".to_string())
                } else {
                    BotError::Worker(e.to_string())
                }
            })
        };

        match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, attempt).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!(
                        timeout_secs = limit.as_secs(),
                        available_permits = self.permits.available_permits(),
                        "offloaded run timed out"
                    );
                    Err(BotError::Timeout(limit.as_secs()))
                }
            },
            None => attempt.await,
        }
    }
}

impl Default for OffloadExecutor {
    fn default() -> Self {
        Self::new(4, 120)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_runs_on_worker_thread() {
        let executor = OffloadExecutor::new(2, 5);
        let caller = std::thread::current().id();
        let worker = executor
            .run(move || std::thread::current().id())
            .await
            .unwrap();
        assert_ne!(caller, worker);
    }

    #[tokio::test]
    async fn test_returns_value() {
        let executor = OffloadExecutor::default();
        let answer = executor.run(|| "42".to_string()).await.unwrap();
        assert_eq!(answer, "42");
    }

    #[tokio::test]
    async fn test_timeout() {
        let executor = OffloadExecutor::new(1, 1);
        let result = executor
            .run(|| std::thread::sleep(Duration::from_millis(2500)))
            .await;
        assert!(matches!(result, Err(BotError::Timeout(1))));
    }

    #[tokio::test]
    async fn test_panic_becomes_worker_error() {
        let executor = OffloadExecutor::new(1, 0);
        let result: Result<(), _> = executor.run(|| panic!("boom")).await;
        assert!(matches!(result, Err(BotError::Worker(_))));
        // 许可已归还
        assert_eq!(executor.available_permits(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrency_is_bounded() {
        let executor = OffloadExecutor::new(2, 0);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let executor = executor.clone();
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                executor
                    .run(move || {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_millis(50));
                        running.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_timeout_covers_wait_for_permit() {
        let executor = OffloadExecutor::new(1, 1);

        // 第一次运行超时后仍占着唯一的许可
        let first = executor
            .run(|| std::thread::sleep(Duration::from_millis(2500)))
            .await;
        assert!(matches!(first, Err(BotError::Timeout(1))));
        assert_eq!(executor.available_permits(), 0);

        let started = std::time::Instant::now();
        let second = executor.run(|| "quick").await;
        assert!(matches!(second, Err(BotError::Timeout(1))));
        assert!(started.elapsed() < Duration::from_millis(1500));
    }
}

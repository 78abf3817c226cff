//! 优雅关闭
//!
//! Ctrl+C / SIGTERM 或控制台 quit 取消根 token。Webhook 服务随之停止接收新请求；
//! 每个回合持有根 token 的子 token，正在进行的回合不再投递最终答案。

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

/// 进程级关闭开关
#[derive(Clone, Default)]
pub struct ShutdownManager {
    root: CancellationToken,
}

/// 关闭来源（仅用于日志）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl+C 或控制台 quit
    UserInitiated,
    /// SIGTERM
    Signal,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 单个回合的 token：关闭时随之取消，单独取消不影响其他回合
    pub fn turn_token(&self) -> CancellationToken {
        self.root.child_token()
    }

    pub fn shutdown(&self, reason: ShutdownReason) {
        if self.root.is_cancelled() {
            return;
        }
        tracing::info!(?reason, "shutdown requested");
        self.root.cancel();
    }

    pub async fn wait_for_shutdown(&self) {
        self.root.cancelled().await;
    }

    /// 后台监听 Ctrl+C 与 SIGTERM
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("received Ctrl+C, stopping");
                manager.shutdown(ShutdownReason::UserInitiated);
            }
        });

        #[cfg(unix)]
        {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                match signal(SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                        tracing::info!("received SIGTERM, stopping");
                        manager.shutdown(ShutdownReason::Signal);
                    }
                    Err(e) => tracing::warn!("SIGTERM handler not installed: {}", e),
                }
            });
        }
    }
}

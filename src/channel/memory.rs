//! 内存回复通道：按顺序记录出站消息，可模拟发送失败与断开

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{Outbound, ReplyChannel};
use crate::core::BotError;

/// 记录型通道
#[derive(Debug, Default)]
pub struct RecordingChannel {
    sent: Mutex<Vec<Outbound>>,
    /// 接下来若干次发送直接失败
    failures_left: AtomicUsize,
    closed: AtomicBool,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// 让接下来 n 次 send 返回 Delivery 错误
    pub fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// 模拟频道断开
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// 已成功发送的全部消息（按发送顺序）
    pub fn sent(&self) -> Vec<Outbound> {
        self.sent.lock().map(|v| v.clone()).unwrap_or_default()
    }

    /// 仅文本消息
    pub fn texts(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|o| match o {
                Outbound::Text(t) => Some(t),
                Outbound::Typing => None,
            })
            .collect()
    }
}

#[async_trait]
impl ReplyChannel for RecordingChannel {
    async fn send(&self, outbound: Outbound) -> Result<(), BotError> {
        let should_fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(BotError::Delivery("simulated send failure".to_string()));
        }
        self.sent
            .lock()
            .map_err(|e| BotError::Delivery(e.to_string()))?
            .push(outbound);
        Ok(())
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }
}

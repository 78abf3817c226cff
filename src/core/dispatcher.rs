//! 回合分发
//!
//! 每个会话一个队列和一个消费任务：同一会话的回合按提交顺序逐个处理，
//! 不同会话并发执行，互不阻塞。submit 是同步、非阻塞的，适合在 Webhook 中立即返回。
//!
//! 队列清空后消费任务在锁内移除自己的条目并退出，下一次提交会重新启动。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot};

use crate::core::{Turn, TurnHandler, TurnOutcome};

type Job = (Turn, oneshot::Sender<TurnOutcome>);
type Queues = Arc<Mutex<HashMap<String, mpsc::UnboundedSender<Job>>>>;

/// 按会话串行的回合分发器
pub struct TurnDispatcher {
    handler: Arc<TurnHandler>,
    queues: Queues,
}

impl TurnDispatcher {
    pub fn new(handler: Arc<TurnHandler>) -> Self {
        Self {
            handler,
            queues: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn handler(&self) -> &Arc<TurnHandler> {
        &self.handler
    }

    /// 提交回合；返回的 receiver 在回合结束时得到结果，调用方可以忽略
    ///
    /// 必须在 tokio runtime 中调用（首次提交某会话时会启动其消费任务）。
    pub fn submit(&self, turn: Turn) -> oneshot::Receiver<TurnOutcome> {
        let (done_tx, done_rx) = oneshot::channel();
        let conversation = turn.conversation_id.clone();
        // 持锁发送，消费任务的空队列检查与此互斥
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());

        let mut job = (turn, done_tx);
        if let Some(tx) = queues.get(&conversation) {
            match tx.send(job) {
                Ok(()) => return done_rx,
                // 消费任务已退出（panic），重新启动
                Err(mpsc::error::SendError(returned)) => {
                    tracing::warn!(%conversation, "conversation worker gone, restarting");
                    job = returned;
                }
            }
        }

        let tx = self.spawn_worker(&conversation);
        if tx.send(job).is_err() {
            tracing::error!(%conversation, "failed to queue turn");
        }
        queues.insert(conversation, tx);
        done_rx
    }

    /// 当前有待处理回合的会话数
    pub fn active_conversations(&self) -> usize {
        self.queues.lock().map(|q| q.len()).unwrap_or(0)
    }

    fn spawn_worker(&self, conversation: &str) -> mpsc::UnboundedSender<Job> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let handler = Arc::clone(&self.handler);
        let queues = Arc::clone(&self.queues);
        let conversation = conversation.to_string();
        tokio::spawn(async move {
            tracing::debug!(%conversation, "conversation worker started");
            while let Some((turn, done)) = rx.recv().await {
                let outcome = handler.on_message(turn).await;
                let idle = {
                    let mut queues = queues.lock().unwrap_or_else(|e| e.into_inner());
                    let idle = rx.is_empty();
                    if idle {
                        queues.remove(&conversation);
                    }
                    idle
                };
                let _ = done.send(outcome);
                if idle {
                    break;
                }
            }
            tracing::debug!(%conversation, "conversation worker stopped");
        });
        tx
    }
}

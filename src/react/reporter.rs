//! 进度反馈
//!
//! 工作线程一侧持有 ProgressSink，on_error / on_tool_start / on_action 只把 LifecycleEvent
//! 写入无界通道，立即返回；回合所在的调度侧由 ProgressReporter 按 FIFO 取出事件，
//! 格式化后发送到频道。发送失败只记日志，不影响回合。

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::channel::ReplyChannel;
use crate::react::LifecycleEvent;

/// Agent 动作日志中工具输入的标记
pub const ACTION_INPUT_MARKER: &str = "Action Input:";

/// 创建一对进度通道：工作线程端与调度端
pub fn progress_channel(channel: Arc<dyn ReplyChannel>) -> (ProgressSink, ProgressReporter) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ProgressSink { tx }, ProgressReporter { rx, channel })
}

/// 工作线程端：同步、非阻塞地上报事件
#[derive(Clone, Debug)]
pub struct ProgressSink {
    tx: mpsc::UnboundedSender<LifecycleEvent>,
}

impl ProgressSink {
    /// 不连接任何频道的 sink（事件直接丢弃）
    pub fn detached() -> Self {
        let (tx, _) = mpsc::unbounded_channel();
        Self { tx }
    }

    pub fn on_error(&self, err: impl std::fmt::Display) {
        self.emit(LifecycleEvent::EngineError {
            message: err.to_string(),
        });
    }

    pub fn on_tool_start(&self, tool: impl Into<String>) {
        self.emit(LifecycleEvent::ToolStarted { tool: tool.into() });
    }

    pub fn on_action(&self, log: impl Into<String>) {
        self.emit(LifecycleEvent::ActionTaken { log: log.into() });
    }

    /// 接收端已关闭（回合超时或结束）时静默丢弃
    pub fn emit(&self, event: LifecycleEvent) {
        let _ = self.tx.send(event);
    }
}

/// 调度端：消费事件并发送进度消息
pub struct ProgressReporter {
    rx: mpsc::UnboundedReceiver<LifecycleEvent>,
    channel: Arc<dyn ReplyChannel>,
}

impl ProgressReporter {
    /// 等待下一个事件；所有 sink 都已释放且队列为空时返回 None
    pub async fn next_event(&mut self) -> Option<LifecycleEvent> {
        self.rx.recv().await
    }

    /// 把当前已排队的事件全部发出（不等待新事件），返回发出的事件数
    pub async fn flush(&mut self) -> usize {
        let mut n = 0;
        while let Ok(event) = self.rx.try_recv() {
            self.report(&event).await;
            n += 1;
        }
        n
    }

    /// 关闭接收端：之后 sink 上报的事件被丢弃，已排队的事件也一并丢弃
    pub fn close(&mut self) {
        self.rx.close();
        while self.rx.try_recv().is_ok() {}
    }

    /// 将单个事件转为频道消息并发送；发送失败记录后继续
    pub async fn report(&self, event: &LifecycleEvent) {
        for outbound in render_event(event) {
            if let Err(e) = self.channel.send(outbound).await {
                tracing::warn!(event = event.kind(), "progress delivery failed: {}", e);
            }
        }
    }
}

/// 事件 -> 出站消息序列
pub fn render_event(event: &LifecycleEvent) -> Vec<crate::channel::Outbound> {
    use crate::channel::Outbound;

    match event {
        LifecycleEvent::EngineError { message } => {
            vec![Outbound::Text(format!("LLM Error: {message}\n"))]
        }
        LifecycleEvent::ToolStarted { tool } => {
            vec![Outbound::Text(format!("Tool: {tool}\n")), Outbound::Typing]
        }
        LifecycleEvent::ActionTaken { log } => match extract_action_input(log) {
            Some(input) => vec![
                Outbound::Text(format!("\u{2611} Searching: {input} ...")),
                Outbound::Typing,
            ],
            None => Vec::new(),
        },
    }
}

/// 取出第一个 "Action Input:" 之后（到下一个标记为止）的文本；无标记或内容为空时返回 None
pub fn extract_action_input(log: &str) -> Option<&str> {
    let (_, rest) = log.split_once(ACTION_INPUT_MARKER)?;
    let input = rest
        .split_once(ACTION_INPUT_MARKER)
        .map_or(rest, |(first, _)| first)
        .trim();
    (!input.is_empty()).then_some(input)
}

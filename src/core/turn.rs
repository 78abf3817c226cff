//! 回合处理
//!
//! 一条入站消息即一个回合：Received -> TypingSent -> ToolsWired -> Running -> Answered | Failed。
//!
//! - 任何准备工作之前先发送「正在输入」提示
//! - 每个回合重新构建工具集与推理引擎，进度通道绑定到本回合的回复通道
//! - 推理引擎在后台执行器中运行，调度侧同时消费进度事件；最终答案发送前把已排队事件全部发出
//! - 发送最终答案前检查回合是否仍然存活；答案投递成功后才写入会话记忆

use std::fmt;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::channel::{ChannelAccount, ReplyChannel};
use crate::core::{BotError, OffloadExecutor};
use crate::memory::MemoryStore;
use crate::react::{progress_channel, EngineFactory};
use crate::tools::ToolFactory;

/// 单个入站回合
#[derive(Clone)]
pub struct Turn {
    pub id: String,
    pub conversation_id: String,
    pub text: String,
    /// 发送者
    pub from: ChannelAccount,
    /// 接收者（即机器人自身）
    pub recipient: ChannelAccount,
    pub channel: Arc<dyn ReplyChannel>,
    /// 频道断开或进程关闭时取消
    pub cancel: CancellationToken,
}

impl Turn {
    pub fn new(
        conversation_id: impl Into<String>,
        text: impl Into<String>,
        channel: Arc<dyn ReplyChannel>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.into(),
            text: text.into(),
            from: ChannelAccount::new("user"),
            recipient: ChannelAccount::new("bot"),
            channel,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_accounts(mut self, from: ChannelAccount, recipient: ChannelAccount) -> Self {
        self.from = from;
        self.recipient = recipient;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// 回合未被取消且频道仍可投递
    pub fn is_live(&self) -> bool {
        !self.cancel.is_cancelled() && self.channel.is_open()
    }
}

/// 回合阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Received,
    TypingSent,
    ToolsWired,
    Running,
    Answered,
    Failed,
}

impl fmt::Display for TurnPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TurnPhase::Received => "received",
            TurnPhase::TypingSent => "typing_sent",
            TurnPhase::ToolsWired => "tools_wired",
            TurnPhase::Running => "running",
            TurnPhase::Answered => "answered",
            TurnPhase::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// 回合结果
#[derive(Debug)]
pub enum TurnOutcome {
    Answered { answer: String },
    /// phase 为出错时所处的阶段
    Failed { phase: TurnPhase, error: BotError },
    /// 去除提及标记后为空的消息
    Ignored,
}

impl TurnOutcome {
    pub fn is_answered(&self) -> bool {
        matches!(self, TurnOutcome::Answered { .. })
    }
}

static AT_MENTION_RE: OnceLock<Regex> = OnceLock::new();

/// 去掉频道 @ 提及标签，如 <at>relay-bot</at>
pub fn strip_mentions(s: &str) -> String {
    let re = AT_MENTION_RE.get_or_init(|| {
        Regex::new(r"(?s)<at[^>]*>.*?</at>\s*").expect("mention pattern is valid")
    });
    re.replace_all(s, "").trim().to_string()
}

/// 回合处理器：所有会话共享一个实例
pub struct TurnHandler {
    memory: MemoryStore,
    tools: Arc<dyn ToolFactory>,
    engines: Arc<dyn EngineFactory>,
    executor: OffloadExecutor,
    welcome_message: String,
    delivery_retries: usize,
}

impl TurnHandler {
    pub fn new(
        memory: MemoryStore,
        tools: Arc<dyn ToolFactory>,
        engines: Arc<dyn EngineFactory>,
        executor: OffloadExecutor,
    ) -> Self {
        Self {
            memory,
            tools,
            engines,
            executor,
            welcome_message: "Hello and welcome!".to_string(),
            delivery_retries: 1,
        }
    }

    pub fn welcome_message(mut self, message: impl Into<String>) -> Self {
        self.welcome_message = message.into();
        self
    }

    /// 最终答案投递失败后的重试次数
    pub fn delivery_retries(mut self, retries: usize) -> Self {
        self.delivery_retries = retries;
        self
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    /// 处理一条用户消息，返回回合结果
    pub async fn on_message(&self, turn: Turn) -> TurnOutcome {
        let span = tracing::info_span!(
            "turn",
            conversation = %turn.conversation_id,
            turn = %turn.id,
        );
        self.run_turn(turn).instrument(span).await
    }

    async fn run_turn(&self, turn: Turn) -> TurnOutcome {
        let text = strip_mentions(&turn.text);
        if text.is_empty() {
            tracing::debug!("empty message after mention stripping, ignored");
            return TurnOutcome::Ignored;
        }
        tracing::info!(chars = text.chars().count(), "turn received");

        if let Err(e) = turn.channel.send_typing().await {
            tracing::warn!("typing indicator failed: {}", e);
        }
        tracing::debug!(phase = %TurnPhase::TypingSent);

        let (sink, mut reporter) = progress_channel(Arc::clone(&turn.channel));
        let engine = match self.tools.build().await {
            Ok(tools) => {
                tracing::debug!(tools = ?tools.tool_names(), "tool set built");
                self.engines.build(tools).await
            }
            Err(e) => Err(e),
        };
        let engine = match engine {
            Ok(engine) => engine,
            Err(e) => return self.fail(&turn, TurnPhase::TypingSent, e).await,
        };
        tracing::debug!(phase = %TurnPhase::ToolsWired);

        // 持有会话记忆锁直到回合结束：同一会话的回合串行
        let slot = self.memory.slot(&turn.conversation_id).await;
        let mut memory = slot.lock().await;
        let history = memory.recent();

        tracing::debug!(phase = %TurnPhase::Running, history = history.len());
        let input = text.clone();
        let run = self
            .executor
            .run(move || engine.run(&input, &history, &sink));
        tokio::pin!(run);

        let result = loop {
            tokio::select! {
                biased;
                Some(event) = reporter.next_event() => reporter.report(&event).await,
                result = &mut run => break result,
            }
        };
        let result = result.and_then(|r| r.map_err(BotError::from));

        let answer = match result {
            Ok(answer) => answer,
            Err(e @ BotError::Timeout(_)) => {
                reporter.close();
                return self.fail(&turn, TurnPhase::Running, e).await;
            }
            Err(e) => {
                reporter.flush().await;
                return self.fail(&turn, TurnPhase::Running, e).await;
            }
        };
        reporter.flush().await;

        if !turn.is_live() {
            tracing::warn!("channel closed before the answer, dropping it");
            return TurnOutcome::Failed {
                phase: TurnPhase::Running,
                error: BotError::ChannelClosed,
            };
        }

        if let Err(e) = self.deliver(&turn, &answer).await {
            tracing::error!(phase = %TurnPhase::Running, "answer delivery failed: {}", e);
            return TurnOutcome::Failed {
                phase: TurnPhase::Running,
                error: e,
            };
        }

        memory.append(text, answer.clone());
        tracing::info!(phase = %TurnPhase::Answered, "turn answered");
        TurnOutcome::Answered { answer }
    }

    /// 发送最终答案，失败时按 delivery_retries 重试
    async fn deliver(&self, turn: &Turn, text: &str) -> Result<(), BotError> {
        let mut attempt = 0;
        loop {
            match turn.channel.send_text(text).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.delivery_retries => {
                    attempt += 1;
                    tracing::warn!(attempt, "delivery failed, retrying: {}", e);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// 记录失败并把错误提示发给用户，投递失败同样重试
    async fn fail(&self, turn: &Turn, phase: TurnPhase, error: BotError) -> TurnOutcome {
        tracing::error!(%phase, "turn failed: {}", error);
        if turn.is_live() {
            if let Err(e) = self.deliver(turn, &error.user_message()).await {
                tracing::warn!("error notification failed: {}", e);
            }
        }
        TurnOutcome::Failed { phase, error }
    }

    /// 成员加入会话：向每个非机器人成员按顺序发送欢迎语，返回发送次数
    pub async fn on_members_added(&self, members: &[ChannelAccount], turn: &Turn) -> usize {
        let mut sent = 0;
        for member in members.iter().filter(|m| m.id != turn.recipient.id) {
            if let Err(e) = turn.channel.send_text(&self.welcome_message).await {
                tracing::warn!(member = %member.id, "welcome delivery failed: {}", e);
            }
            sent += 1;
        }
        sent
    }
}

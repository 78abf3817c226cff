//! 频道层：回复通道抽象与实现
//!
//! - **ReplyChannel**: 回合的出站句柄（发送文本 / 正在输入提示、检查是否仍连接）
//! - **RecordingChannel**: 内存实现，记录全部出站消息（测试与调试）
//! - **ConsoleChannel**: 标准输出实现（relay-console）
//! - **bot_framework**: Bot Framework Webhook 与 HTTP 回复通道（需 feature botframework）

pub mod console;
pub mod memory;

#[cfg(feature = "botframework")]
pub mod bot_framework;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::BotError;

pub use console::ConsoleChannel;
pub use memory::RecordingChannel;

/// 出站消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    /// 「正在输入」提示，告知用户仍在处理
    Typing,
}

/// 频道账号（用户或机器人）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelAccount {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChannelAccount {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }
}

/// 回复通道：每个回合持有一个，发送失败返回 BotError::Delivery
#[async_trait]
pub trait ReplyChannel: Send + Sync {
    async fn send(&self, outbound: Outbound) -> Result<(), BotError>;

    /// 频道是否仍可投递（断开后不再发送最终答案）
    fn is_open(&self) -> bool {
        true
    }

    async fn send_text(&self, text: &str) -> Result<(), BotError> {
        self.send(Outbound::Text(text.to_string())).await
    }

    async fn send_typing(&self) -> Result<(), BotError> {
        self.send(Outbound::Typing).await
    }
}

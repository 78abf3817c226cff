//! 标准输出回复通道

use std::io::Write;

use async_trait::async_trait;

use super::{Outbound, ReplyChannel};
use crate::core::BotError;

/// 控制台通道：文本直接打印，正在输入提示打印为 "..."
#[derive(Debug, Default)]
pub struct ConsoleChannel {
    /// 是否显示正在输入提示
    pub show_typing: bool,
}

impl ConsoleChannel {
    pub fn new(show_typing: bool) -> Self {
        Self { show_typing }
    }
}

#[async_trait]
impl ReplyChannel for ConsoleChannel {
    async fn send(&self, outbound: Outbound) -> Result<(), BotError> {
        let mut out = std::io::stdout().lock();
        let written = match outbound {
            Outbound::Text(text) => writeln!(out, "bot> {}", text.trim_end()),
            Outbound::Typing if self.show_typing => writeln!(out, "bot> ..."),
            Outbound::Typing => Ok(()),
        };
        written
            .and_then(|_| out.flush())
            .map_err(|e| BotError::Delivery(e.to_string()))
    }
}

//! 短期记忆：对话窗口
//!
//! 保留最近 k 轮对话（user/assistant 对），超出时淘汰最旧的一轮，供 Agent 拼装上下文。

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    User,
    Assistant,
    System,
}

/// 单条消息
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// 一轮完整对话：用户输入与最终回复
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exchange {
    pub user: String,
    pub assistant: String,
}

impl Exchange {
    pub fn new(user: impl Into<String>, assistant: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            assistant: assistant.into(),
        }
    }

    /// 展开为两条消息（user 在前）
    pub fn to_messages(&self) -> [Message; 2] {
        [
            Message::user(self.user.clone()),
            Message::assistant(self.assistant.clone()),
        ]
    }
}

/// 滑动窗口记忆：最多 capacity 轮，按插入顺序保存，满后淘汰最旧的一轮
#[derive(Clone, Debug)]
pub struct WindowMemory {
    exchanges: VecDeque<Exchange>,
    capacity: usize,
}

impl WindowMemory {
    pub fn new(capacity: usize) -> Self {
        Self {
            exchanges: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// 追加一轮；超出容量时丢弃最旧的一轮。capacity 为 0 时不保留任何内容
    pub fn append(&mut self, user: impl Into<String>, assistant: impl Into<String>) {
        if self.capacity == 0 {
            return;
        }
        if self.exchanges.len() == self.capacity {
            self.exchanges.pop_front();
        }
        self.exchanges.push_back(Exchange::new(user, assistant));
    }

    /// 最近的对话，最旧在前
    pub fn recent(&self) -> Vec<Exchange> {
        self.exchanges.iter().cloned().collect()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.exchanges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exchanges.is_empty()
    }
}

//! 会话记忆存储
//!
//! 按 conversation id 隔离的 WindowMemory，每个会话一把异步锁：
//! 回合处理期间持有该锁，保证同一会话的回合串行写入，不同会话互不阻塞。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use super::WindowMemory;

/// 单个会话的记忆槽位
pub type MemorySlot = Arc<Mutex<WindowMemory>>;

/// 会话记忆存储：conversation_id -> WindowMemory
#[derive(Clone)]
pub struct MemoryStore {
    slots: Arc<RwLock<HashMap<String, MemorySlot>>>,
    window_turns: usize,
}

impl MemoryStore {
    pub fn new(window_turns: usize) -> Self {
        Self {
            slots: Arc::new(RwLock::new(HashMap::new())),
            window_turns,
        }
    }

    /// 获取或创建会话槽位
    pub async fn slot(&self, conversation_id: &str) -> MemorySlot {
        if let Some(slot) = self.slots.read().await.get(conversation_id) {
            return Arc::clone(slot);
        }
        let mut slots = self.slots.write().await;
        Arc::clone(
            slots
                .entry(conversation_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(WindowMemory::new(self.window_turns)))),
        )
    }

    /// 当前已知会话数
    pub async fn conversation_count(&self) -> usize {
        self.slots.read().await.len()
    }

    pub fn window_turns(&self) -> usize {
        self.window_turns
    }
}

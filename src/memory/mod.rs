//! 记忆层：会话窗口记忆（最近 k 轮）与按会话隔离的存储

pub mod conversation;
pub mod store;

pub use conversation::{Exchange, Message, Role, WindowMemory};
pub use store::{MemorySlot, MemoryStore};

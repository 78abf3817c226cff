//! LLM 客户端抽象
//!
//! 所有后端（Azure / OpenAI 兼容 / Mock）实现 LlmClient。

use async_trait::async_trait;

use crate::memory::Message;

/// LLM 客户端 trait：一次非流式完成
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, messages: &[Message]) -> Result<String, String>;

    /// 模型或部署名（用于日志）
    fn model_name(&self) -> &str {
        "unknown"
    }
}

//! 通用对话工具：问题不需要检索时直接交给 LLM 回答

use std::sync::Arc;

use async_trait::async_trait;

use crate::llm::LlmClient;
use crate::memory::Message;
use crate::tools::{Tool, ToolDescriptor};

const CHAT_SYSTEM_PROMPT: &str = "You are a helpful and friendly assistant. \
Answer the user's question directly and concisely. If you do not know the answer, say so.";

/// "@chatgpt" 工具
pub struct ChatTool {
    descriptor: ToolDescriptor,
    llm: Arc<dyn LlmClient>,
}

impl ChatTool {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            descriptor: ToolDescriptor::new(
                "@chatgpt",
                "useful when the questions includes the term: @chatgpt, or when the question \
                 is general knowledge, chit-chat, or does not need any search.\n",
            )
            .returns_directly(true),
            llm,
        }
    }
}

#[async_trait]
impl Tool for ChatTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, input: &str) -> Result<String, String> {
        let question = input.replace("@chatgpt", "");
        self.llm
            .complete(&[
                Message::system(CHAT_SYSTEM_PROMPT),
                Message::user(question.trim()),
            ])
            .await
    }
}

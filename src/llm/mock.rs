//! Mock / 脚本化 LLM 客户端（用于测试与离线运行，无需 API）

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::LlmClient;
use crate::memory::{Message, Role};

/// Mock 客户端：把最后一条 User 消息交给 echo 工具
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, Role::User))
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");

        Ok(serde_json::json!({
            "action": "echo",
            "action_input": format!("Echo from Mock: {last_user}"),
        })
        .to_string())
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}

/// 脚本化客户端：按顺序返回预置回复，并记录每次收到的消息
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    replies: Mutex<VecDeque<Result<String, String>>>,
    calls: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedLlmClient {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_results(replies.into_iter().map(|r| Ok(r.into())))
    }

    pub fn with_results(replies: impl IntoIterator<Item = Result<String, String>>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// 已收到的全部请求
    pub fn calls(&self) -> Vec<Vec<Message>> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(messages.to_vec());
        }
        self.replies
            .lock()
            .map_err(|e| e.to_string())?
            .pop_front()
            .unwrap_or_else(|| Err("script exhausted".to_string()))
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_routes_to_echo() {
        let reply = MockLlmClient
            .complete(&[Message::system("sys"), Message::user("hello")])
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(value["action"], "echo");
        assert_eq!(value["action_input"], "Echo from Mock: hello");
    }

    #[tokio::test]
    async fn test_scripted_replays_then_errors() {
        let llm = ScriptedLlmClient::new(["one"]);
        assert_eq!(llm.complete(&[Message::user("q")]).await.unwrap(), "one");
        assert!(llm.complete(&[]).await.is_err());
        assert_eq!(llm.calls().len(), 2);
    }
}

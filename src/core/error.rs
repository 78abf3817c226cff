//! 回合错误类型
//!
//! 与回合状态机配合：Setup / Engine / Timeout 结束于 Failed 并给用户错误提示；
//! Delivery 只记录日志，不影响进程与后续回合。

use thiserror::Error;

/// 推理引擎运行中抛出的错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Tool execution failed: {0}")]
    Tool(String),

    #[error("Agent stopped after {0} iterations without a final answer")]
    IterationLimit(usize),
}

/// 回合处理过程中可能出现的错误
#[derive(Error, Debug)]
pub enum BotError {
    /// 工具或引擎构建失败（如远程 API 规格拉取失败）
    #[error("Setup failed: {0}")]
    Setup(String),

    #[error(transparent)]
    Engine(#[from] EngineError),

    /// 向频道发送消息失败
    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Run timed out after {0}s")]
    Timeout(u64),

    /// 频道已断开或回合已被取消，答案不再投递
    #[error("Channel closed before the answer was delivered")]
    ChannelClosed,

    /// 后台工作线程异常退出（panic 或被中止）
    #[error("Worker failed: {0}")]
    Worker(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl BotError {
    /// 发给用户的错误提示文本
    pub fn user_message(&self) -> String {
        match self {
            BotError::Setup(e) => format!("Sorry, I could not get ready to answer: {e}"),
            BotError::Timeout(secs) => format!(
                "Sorry, this is taking too long (over {secs}s). Please try again or rephrase your question."
            ),
            other => format!("Sorry, something went wrong: {other}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_converts() {
        let err: BotError = EngineError::Llm("quota".to_string()).into();
        assert!(matches!(err, BotError::Engine(EngineError::Llm(_))));
        assert_eq!(err.to_string(), "LLM error: quota");
    }

    #[test]
    fn test_user_messages() {
        assert!(BotError::Timeout(30).user_message().contains("30s"));
        assert!(BotError::Setup("spec fetch".into())
            .user_message()
            .contains("spec fetch"));
        assert!(BotError::Engine(EngineError::IterationLimit(3))
            .user_message()
            .starts_with("Sorry, something went wrong"));
    }
}

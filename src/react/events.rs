//! 推理过程事件：Agent 运行中产生，经通道流向回合处理方并转为用户可见的进度消息

use serde::Serialize;

/// 单步过程事件（可序列化为 JSON 供日志或前端展示）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// LLM 调用出错
    EngineError { message: String },
    /// 开始调用工具
    ToolStarted { tool: String },
    /// Agent 决定的动作（原始日志，含 "Action Input:" 段）
    ActionTaken { log: String },
}

impl LifecycleEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            LifecycleEvent::EngineError { .. } => "engine_error",
            LifecycleEvent::ToolStarted { .. } => "tool_started",
            LifecycleEvent::ActionTaken { .. } => "action_taken",
        }
    }
}

//! 认知层：推理引擎（对话式工具 Agent）、输出解析、Prompt、过程事件与进度反馈

pub mod agent;
pub mod events;
pub mod planner;
pub mod prompt;
pub mod reporter;

pub use agent::{ConversationalAgent, ConversationalAgentFactory, EngineFactory, ReasoningEngine};
pub use events::LifecycleEvent;
pub use planner::{parse_agent_output, AgentOutput};
pub use prompt::PromptTemplates;
pub use reporter::{progress_channel, ProgressReporter, ProgressSink};

//! Relay Bot - 聊天机器人回合处理与进度推送
//!
//! 模块划分：
//! - **agent**: 按配置装配 TurnHandler（relay-bot / relay-console 共用）
//! - **channel**: 回复通道抽象、内存 / 控制台实现、Bot Framework Webhook
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 回合状态机、按会话分发、后台执行器、错误类型、优雅关闭
//! - **llm**: LLM 客户端抽象与实现（Azure OpenAI / OpenAI 兼容 / Mock）
//! - **memory**: 按会话隔离的窗口记忆
//! - **observability**: tracing 初始化
//! - **react**: 对话式工具 Agent、输出解析、Prompt、进度事件与反馈
//! - **tools**: 工具（文档 / 书籍检索、API 检索、聊天、echo）与回合级工具工厂

pub mod agent;
pub mod channel;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod tools;

pub use agent::create_turn_handler;
pub use core::{BotError, Turn, TurnDispatcher, TurnHandler, TurnOutcome};

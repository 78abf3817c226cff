//! 回合处理器装配
//!
//! 供 relay-bot（Bot Framework）与 relay-console 共用：
//! 按配置创建 LLM 客户端、工具工厂、推理引擎工厂、会话记忆与后台执行器，组装成 TurnHandler。
//! 工具内部使用的 LLM 与主 Agent 的 LLM 分开创建，max tokens 不同。

use std::sync::Arc;

use crate::config::AppConfig;
use crate::core::{OffloadExecutor, TurnHandler};
use crate::llm::create_llm_from_config;
use crate::memory::MemoryStore;
use crate::react::{ConversationalAgentFactory, PromptTemplates};
use crate::tools::ConfiguredToolFactory;

/// 根据配置创建 TurnHandler
pub fn create_turn_handler(cfg: &AppConfig) -> TurnHandler {
    let tool_llm = create_llm_from_config(cfg, cfg.llm.tool_max_tokens);
    let agent_llm = create_llm_from_config(cfg, cfg.llm.agent_max_tokens);

    let tools =
        ConfiguredToolFactory::new(cfg.tools.clone(), tool_llm).with_echo(offline_mode(cfg));

    let prompts = PromptTemplates::load(
        cfg.app.system_prompt_path.as_deref(),
        cfg.app.human_prompt_path.as_deref(),
    );
    let engines = ConversationalAgentFactory::new(agent_llm.clone(), prompts, cfg.llm.max_iterations);

    tracing::info!(
        provider = %cfg.llm.provider,
        model = agent_llm.model_name(),
        window_turns = cfg.memory.window_turns,
        max_concurrent_runs = cfg.runtime.max_concurrent_runs,
        "turn handler ready"
    );

    TurnHandler::new(
        MemoryStore::new(cfg.memory.window_turns),
        Arc::new(tools),
        Arc::new(engines),
        OffloadExecutor::new(cfg.runtime.max_concurrent_runs, cfg.runtime.run_timeout_secs),
    )
    .welcome_message(cfg.app.welcome_message.clone())
    .delivery_retries(cfg.runtime.delivery_retries)
}

/// 配置为 mock 提供方时离线运行，问题都交给 echo 工具
fn offline_mode(cfg: &AppConfig) -> bool {
    cfg.llm.provider.eq_ignore_ascii_case("mock")
}

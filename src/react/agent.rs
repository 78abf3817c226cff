//! 对话式工具 Agent（推理引擎）
//!
//! ReasoningEngine::run 是同步调用，由回合处理方放到后台工作线程执行：
//! Plan (LLM) -> Action (Tool) -> Observe -> 下一轮 Plan，直到 Final Answer、
//! 工具直接返回或达到最大轮数。LLM 与工具本身是异步的，通过 runtime Handle 在工作线程上 block_on。
//! 运行过程经 ProgressSink 上报 ActionTaken / ToolStarted / EngineError。

use std::sync::Arc;

use async_trait::async_trait;
use tokio::runtime::Handle;

use crate::core::{BotError, EngineError};
use crate::llm::LlmClient;
use crate::memory::{Exchange, Message};
use crate::react::planner::{parse_agent_output, AgentOutput};
use crate::react::{ProgressSink, PromptTemplates};
use crate::tools::ToolSet;

/// 推理引擎：一次完整运行，返回最终答案；运行期间通过 progress 上报过程事件
pub trait ReasoningEngine: Send + Sync {
    fn run(
        &self,
        input: &str,
        history: &[Exchange],
        progress: &ProgressSink,
    ) -> Result<String, EngineError>;
}

/// 回合级引擎构建接口：每个回合用新的工具集构建一个引擎
#[async_trait]
pub trait EngineFactory: Send + Sync {
    async fn build(&self, tools: ToolSet) -> Result<Arc<dyn ReasoningEngine>, BotError>;
}

/// 对话式 Agent：system（前缀 + 工具 + 格式）+ 历史 + 用户输入
pub struct ConversationalAgent {
    llm: Arc<dyn LlmClient>,
    tools: ToolSet,
    prompts: PromptTemplates,
    max_iterations: usize,
    handle: Handle,
}

impl ConversationalAgent {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        tools: ToolSet,
        prompts: PromptTemplates,
        max_iterations: usize,
        handle: Handle,
    ) -> Self {
        Self {
            llm,
            tools,
            prompts,
            max_iterations: max_iterations.max(1),
            handle,
        }
    }

    fn initial_messages(&self, input: &str, history: &[Exchange]) -> Vec<Message> {
        let mut messages = vec![Message::system(
            self.prompts.system_prompt(&self.tools.descriptors()),
        )];
        messages.extend(history.iter().flat_map(Exchange::to_messages));
        messages.push(Message::user(self.prompts.human_message(input)));
        messages
    }
}

impl ReasoningEngine for ConversationalAgent {
    fn run(
        &self,
        input: &str,
        history: &[Exchange],
        progress: &ProgressSink,
    ) -> Result<String, EngineError> {
        let mut messages = self.initial_messages(input, history);

        for step in 0..self.max_iterations {
            let output = match self.handle.block_on(self.llm.complete(&messages)) {
                Ok(o) => o,
                Err(e) => {
                    progress.on_error(&e);
                    return Err(EngineError::Llm(e));
                }
            };

            let parsed = parse_agent_output(&output);
            let (tool_name, tool_input) = match &parsed {
                AgentOutput::Finish(answer) => {
                    tracing::debug!(step, "agent finished");
                    return Ok(answer.clone());
                }
                AgentOutput::Action { tool, input } => (tool.clone(), input.clone()),
            };
            progress.on_action(parsed.log());

            let observation = match self.tools.get(&tool_name) {
                None => format!(
                    "{} is not a valid tool, try one of [{}].",
                    tool_name,
                    self.tools.tool_names().join(", ")
                ),
                Some(tool) => {
                    progress.on_tool_start(tool.name());
                    match self.handle.block_on(self.tools.execute(tool.as_ref(), &tool_input)) {
                        Ok(out) if tool.descriptor().returns_directly => return Ok(out),
                        Ok(out) => out,
                        Err(e) => {
                            tracing::warn!(tool = %tool.name(), "tool failed: {}", e);
                            format!("Error: {}", e)
                        }
                    }
                }
            };

            // 将工具调用与结果写回对话，供下一轮 Plan 使用
            messages.push(Message::assistant(output));
            messages.push(Message::user(PromptTemplates::observation_message(
                &tool_name,
                &observation,
            )));
        }

        Err(EngineError::IterationLimit(self.max_iterations))
    }
}

/// ConversationalAgent 的工厂：共享 LLM 与 Prompt，每回合注入新的工具集
pub struct ConversationalAgentFactory {
    llm: Arc<dyn LlmClient>,
    prompts: PromptTemplates,
    max_iterations: usize,
}

impl ConversationalAgentFactory {
    pub fn new(llm: Arc<dyn LlmClient>, prompts: PromptTemplates, max_iterations: usize) -> Self {
        Self {
            llm,
            prompts,
            max_iterations,
        }
    }
}

#[async_trait]
impl EngineFactory for ConversationalAgentFactory {
    async fn build(&self, tools: ToolSet) -> Result<Arc<dyn ReasoningEngine>, BotError> {
        let handle = Handle::try_current().map_err(|e| BotError::Setup(e.to_string()))?;
        Ok(Arc::new(ConversationalAgent::new(
            Arc::clone(&self.llm),
            tools,
            self.prompts.clone(),
            self.max_iterations,
            handle,
        )))
    }
}

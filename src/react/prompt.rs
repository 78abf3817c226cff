//! 主 Agent 的 Prompt 模板
//!
//! system = 前缀 + 工具列表 + 回复格式说明；human 模板中的 {input} 替换为用户输入。
//! 前缀与 human 模板可由配置中的文件覆盖。

use std::path::Path;

use crate::tools::ToolDescriptor;

pub const DEFAULT_SYSTEM_PREFIX: &str = "\
You are a smart assistant designed to help users find information. \
You have access to several tools (experts). Pick the tool whose description best matches the \
question; when the user names a tool with '@' (for example @docsearch), always use that tool. \
Use the conversation history to resolve follow-up questions. \
If no tool fits, answer directly as a helpful assistant.";

pub const DEFAULT_HUMAN_TEMPLATE: &str = "{input}";

const FORMAT_INSTRUCTIONS: &str = r#"RESPONSE FORMAT
---------------
Reply with exactly one JSON object and nothing else.

To use a tool:
{"action": "<tool name>", "action_input": "<the input for the tool>"}

To answer the user directly:
{"action": "Final Answer", "action_input": "<your answer>"}"#;

/// Prompt 模板
#[derive(Debug, Clone)]
pub struct PromptTemplates {
    pub system_prefix: String,
    pub human_template: String,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self {
            system_prefix: DEFAULT_SYSTEM_PREFIX.to_string(),
            human_template: DEFAULT_HUMAN_TEMPLATE.to_string(),
        }
    }
}

impl PromptTemplates {
    /// 从文件加载，文件不存在或为空时使用默认值
    pub fn load(system_path: Option<&Path>, human_path: Option<&Path>) -> Self {
        let read = |p: Option<&Path>| {
            p.and_then(|p| std::fs::read_to_string(p).ok())
                .filter(|s| !s.trim().is_empty())
        };
        let defaults = Self::default();
        Self {
            system_prefix: read(system_path).unwrap_or(defaults.system_prefix),
            human_template: read(human_path).unwrap_or(defaults.human_template),
        }
    }

    pub fn system_prompt(&self, tools: &[ToolDescriptor]) -> String {
        let tool_lines = tools
            .iter()
            .map(|t| format!("> {}: {}", t.name, t.description.trim()))
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "{}\n\nTOOLS\n-----\n{}\n\n{}",
            self.system_prefix.trim(),
            tool_lines,
            FORMAT_INSTRUCTIONS
        )
    }

    pub fn human_message(&self, input: &str) -> String {
        self.human_template.replace("{input}", input)
    }

    /// 工具结果回填给模型的消息
    pub fn observation_message(tool: &str, observation: &str) -> String {
        format!(
            "TOOL RESPONSE from {tool}:\n---------------------\n{observation}\n\n\
             Using the tool response, reply with the next JSON action (or the Final Answer)."
        )
    }
}

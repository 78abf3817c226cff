//! Agent 输出解析
//!
//! 主 Agent 以 JSON 回复 `{"action": "...", "action_input": "..."}`；
//! action 为 "Final Answer" 时 action_input 即最终答案，否则为要调用的工具。
//! 找不到可用 JSON 时把整段文本当作最终答案。

use serde::Deserialize;
use serde_json::Value;

/// 表示结束推理的 action 名
pub const FINAL_ANSWER: &str = "Final Answer";

/// 解析后的 Agent 输出
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentOutput {
    /// 直接回复用户
    Finish(String),
    /// 需要调用工具
    Action { tool: String, input: String },
}

impl AgentOutput {
    /// 动作日志（Action / Action Input 两行），用于进度反馈
    pub fn log(&self) -> String {
        match self {
            AgentOutput::Finish(answer) => format!("Final Answer: {answer}"),
            AgentOutput::Action { tool, input } => {
                format!("Action: {tool}\nAction Input: {input}")
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawAction {
    action: String,
    #[serde(default)]
    action_input: Value,
}

/// 解析 LLM 输出：若含有效 JSON 且 action 非空则为 Action / Finish，否则整体作为回复
pub fn parse_agent_output(output: &str) -> AgentOutput {
    let trimmed = output.trim();

    // 尝试提取 JSON 块（```json ... ``` 或纯 JSON）
    let json_str = if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim())
    } else if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            &trimmed[start..=end]
        } else {
            return AgentOutput::Finish(trimmed.to_string());
        }
    } else {
        return AgentOutput::Finish(trimmed.to_string());
    };

    let Ok(raw) = serde_json::from_str::<RawAction>(json_str) else {
        return AgentOutput::Finish(trimmed.to_string());
    };
    let input = match raw.action_input {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    };
    let action = raw.action.trim();
    if action.is_empty() {
        AgentOutput::Finish(trimmed.to_string())
    } else if action.eq_ignore_ascii_case(FINAL_ANSWER) {
        AgentOutput::Finish(input)
    } else {
        AgentOutput::Action {
            tool: action.to_string(),
            input,
        }
    }
}

//! 工具注册表
//!
//! 所有工具实现 Tool trait（descriptor / execute），每个回合由 ToolFactory 构建一份新的 ToolSet；
//! ToolSet 保持注册顺序（决定 prompt 中的工具列表顺序），调用时加超时并输出结构化审计日志。

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use tokio::time::timeout;

/// 工具元数据：名称、描述（供 LLM 理解）、是否直接返回
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// true 时工具输出即为最终答案，Agent 不再继续推理
    pub returns_directly: bool,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            returns_directly: false,
        }
    }

    pub fn returns_directly(mut self, yes: bool) -> Self {
        self.returns_directly = yes;
        self
    }
}

/// 工具 trait：元数据 + 异步执行（输入为 Agent 给出的 action_input 文本）
#[async_trait]
pub trait Tool: Send + Sync {
    fn descriptor(&self) -> &ToolDescriptor;

    fn name(&self) -> &str {
        &self.descriptor().name
    }

    async fn execute(&self, input: &str) -> Result<String, String>;
}

/// 回合内的工具集合：按注册顺序保存 Arc<dyn Tool>
#[derive(Clone)]
pub struct ToolSet {
    tools: Vec<Arc<dyn Tool>>,
    timeout: Duration,
}

impl Default for ToolSet {
    fn default() -> Self {
        Self::new(60)
    }
}

impl ToolSet {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            tools: Vec::new(),
            timeout: Duration::from_secs(timeout_secs.max(1)),
        }
    }

    /// 注册工具；同名工具后注册者覆盖先注册者
    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        self.tools.retain(|t| t.name() != tool.name());
        self.tools.push(tool);
    }

    /// 按名称查找；允许 LLM 省略或多写前导 '@'
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        let name = name.trim();
        let bare = name.trim_start_matches('@');
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .or_else(|| {
                self.tools
                    .iter()
                    .find(|t| t.name().trim_start_matches('@').eq_ignore_ascii_case(bare))
            })
            .cloned()
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools.iter().map(|t| t.descriptor().clone()).collect()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// 执行指定工具；超时或失败均返回 Err 文本，并输出 JSON 审计日志
    pub async fn execute(&self, tool: &dyn Tool, input: &str) -> Result<String, String> {
        let start = Instant::now();
        let result = timeout(self.timeout, tool.execute(input)).await;

        let outcome = match &result {
            Ok(Ok(_)) => "ok",
            Ok(Err(_)) => "error",
            Err(_) => "timeout",
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool.name(),
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "input_preview": preview(input, 200),
        });
        tracing::info!(audit = %audit, "tool");

        match result {
            Ok(r) => r,
            Err(_) => Err(format!(
                "Tool {} timed out after {}s",
                tool.name(),
                self.timeout.as_secs()
            )),
        }
    }
}

/// 截取前 max 个字符，超出时追加 "..."
pub fn preview(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        format!("{}...", s.chars().take(max).collect::<String>())
    } else {
        s.to_string()
    }
}

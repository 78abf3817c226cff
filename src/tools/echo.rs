//! Echo 工具（离线 / Mock 模式）

use async_trait::async_trait;

use crate::tools::{Tool, ToolDescriptor};

/// Echo 工具：原样返回输入，输出即最终答案
pub struct EchoTool {
    descriptor: ToolDescriptor,
}

impl EchoTool {
    pub fn new() -> Self {
        Self {
            descriptor: ToolDescriptor::new("echo", "Echo the input text back (offline testing).")
                .returns_directly(true),
        }
    }
}

impl Default for EchoTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for EchoTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, input: &str) -> Result<String, String> {
        let text = input.trim();
        if text.is_empty() {
            Ok("(empty)".to_string())
        } else {
            Ok(text.to_string())
        }
    }
}

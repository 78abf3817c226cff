//! LLM 层：客户端抽象与实现（Azure / OpenAI 兼容 / Mock）

pub mod mock;
pub mod openai;
pub mod traits;

pub use mock::{MockLlmClient, ScriptedLlmClient};
pub use openai::{create_llm_from_config, OpenAiClient};
pub use traits::LlmClient;

//! OpenAI / Azure OpenAI 客户端
//!
//! 通过 async_openai 调用 Azure 部署或任意 OpenAI 兼容端点（可配置 base_url），
//! 每个客户端固定 temperature 与 max tokens。

use std::sync::Arc;

use async_openai::config::{AzureConfig, Config, OpenAIConfig};
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;

use crate::config::AppConfig;
use crate::llm::{LlmClient, MockLlmClient};
use crate::memory::{Message, Role};

/// OpenAI 兼容客户端：持有 Client、模型（或部署）名与采样参数
pub struct OpenAiClient<C: Config = OpenAIConfig> {
    client: Client<C>,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAiClient<OpenAIConfig> {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let config = match base_url {
            Some(url) => OpenAIConfig::new().with_api_base(url).with_api_key(api_key),
            None => OpenAIConfig::new().with_api_key(api_key),
        };
        Self::with_config(config, model)
    }
}

impl OpenAiClient<AzureConfig> {
    /// Azure 部署：model 即部署名
    pub fn azure(api_base: &str, deployment: &str, api_version: &str, api_key: &str) -> Self {
        let config = AzureConfig::new()
            .with_api_base(api_base)
            .with_api_key(api_key)
            .with_deployment_id(deployment)
            .with_api_version(api_version);
        Self::with_config(config, deployment)
    }
}

impl<C: Config> OpenAiClient<C> {
    pub fn with_config(config: C, model: &str) -> Self {
        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            temperature: 0.5,
            max_tokens: 1000,
        }
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    fn to_openai_messages(
        &self,
        messages: &[Message],
    ) -> Result<Vec<ChatCompletionRequestMessage>, String> {
        messages
            .iter()
            .map(|m| {
                let msg = match m.role {
                    Role::System => ChatCompletionRequestMessage::System(
                        ChatCompletionRequestSystemMessageArgs::default()
                            .content(m.content.clone())
                            .build()
                            .map_err(|e| e.to_string())?,
                    ),
                    Role::User => ChatCompletionRequestMessage::User(
                        ChatCompletionRequestUserMessageArgs::default()
                            .content(m.content.clone())
                            .build()
                            .map_err(|e| e.to_string())?,
                    ),
                    Role::Assistant => ChatCompletionRequestMessage::Assistant(
                        ChatCompletionRequestAssistantMessageArgs::default()
                            .content(m.content.clone())
                            .build()
                            .map_err(|e| e.to_string())?,
                    ),
                };
                Ok(msg)
            })
            .collect()
    }
}

#[async_trait]
impl<C: Config + Send + Sync> LlmClient for OpenAiClient<C> {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(self.to_openai_messages(messages)?)
            .temperature(self.temperature)
            .max_completion_tokens(self.max_tokens)
            .build()
            .map_err(|e| e.to_string())?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| e.to_string())?;

        if let Some(usage) = &response.usage {
            tracing::debug!(
                model = %self.model,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "llm usage"
            );
        }

        Ok(response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default())
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// 根据配置与环境变量选择 LLM 后端（Azure / OpenAI 兼容 / Mock）
///
/// Azure 需要 base_url（或 AZURE_OPENAI_ENDPOINT）与 AZURE_OPENAI_API_KEY；
/// 缺少 Key 时回退到 Mock，保证机器人仍能离线运行。
pub fn create_llm_from_config(cfg: &AppConfig, max_tokens: u32) -> Arc<dyn LlmClient> {
    let llm = &cfg.llm;
    match llm.provider.to_lowercase().as_str() {
        "azure" => {
            let base = llm
                .base_url
                .clone()
                .or_else(|| std::env::var("AZURE_OPENAI_ENDPOINT").ok());
            let key = std::env::var("AZURE_OPENAI_API_KEY").ok();
            let version = std::env::var("AZURE_OPENAI_API_VERSION")
                .unwrap_or_else(|_| llm.api_version.clone());
            match (base, key) {
                (Some(base), Some(key)) => {
                    tracing::info!("Using Azure OpenAI deployment ({})", llm.model);
                    Arc::new(
                        OpenAiClient::azure(&base, &llm.model, &version, &key)
                            .temperature(llm.temperature)
                            .max_tokens(max_tokens),
                    )
                }
                _ => {
                    tracing::warn!("Azure endpoint or AZURE_OPENAI_API_KEY missing, using Mock LLM");
                    Arc::new(MockLlmClient)
                }
            }
        }
        "openai" if std::env::var("OPENAI_API_KEY").is_ok() => {
            tracing::info!("Using OpenAI LLM ({})", llm.model);
            Arc::new(
                OpenAiClient::new(llm.base_url.as_deref(), &llm.model, None)
                    .temperature(llm.temperature)
                    .max_tokens(max_tokens),
            )
        }
        "mock" => Arc::new(MockLlmClient),
        other => {
            tracing::warn!("No API key set or provider '{}' unknown, using Mock LLM", other);
            Arc::new(MockLlmClient)
        }
    }
}

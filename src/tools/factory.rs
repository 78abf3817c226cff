//! 工具工厂
//!
//! 每个回合调用一次 build，得到一份新的 ToolSet。构建可能包含网络请求（拉取远程 API 规格），
//! 失败时返回 BotError::Setup，由回合处理方转为用户可见的错误提示。

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::ToolsSection;
use crate::core::BotError;
use crate::llm::LlmClient;
use crate::tools::{
    ApiSearchTool, ApiSpecSource, ChatTool, EchoTool, IndexSearchTool, SearchService, ToolSet,
};

/// 回合级工具集构建接口（可在测试中替换为固定工具集）
#[async_trait]
pub trait ToolFactory: Send + Sync {
    async fn build(&self) -> Result<ToolSet, BotError>;
}

/// 按配置构建工具集：[@docsearch, @chatgpt, @booksearch, @apisearch]（+ echo）
pub struct ConfiguredToolFactory {
    cfg: ToolsSection,
    llm: Arc<dyn LlmClient>,
    spec_source: Option<ApiSpecSource>,
    with_echo: bool,
}

impl ConfiguredToolFactory {
    /// llm 为工具内部使用的模型（max tokens 较主 Agent 更大）
    pub fn new(cfg: ToolsSection, llm: Arc<dyn LlmClient>) -> Self {
        let spec_source = cfg.api_search.enabled.then(|| {
            ApiSpecSource::new(
                cfg.api_search.spec_url.clone(),
                cfg.api_search.cache_spec,
                cfg.api_search.spec_timeout_secs,
            )
        });
        Self {
            cfg,
            llm,
            spec_source,
            with_echo: false,
        }
    }

    /// 额外注册 echo 工具（Mock 模式下离线运行）
    pub fn with_echo(mut self, yes: bool) -> Self {
        self.with_echo = yes;
        self
    }

    fn search_service(&self) -> Option<SearchService> {
        let endpoint = self.cfg.search.endpoint.clone()?;
        Some(SearchService {
            endpoint,
            api_key: self.cfg.search.api_key.clone(),
            api_version: self.cfg.search.api_version.clone(),
        })
    }
}

#[async_trait]
impl ToolFactory for ConfiguredToolFactory {
    async fn build(&self) -> Result<ToolSet, BotError> {
        let mut tools = ToolSet::new(self.cfg.tool_timeout_secs);

        match self.search_service() {
            Some(service) => {
                if self.cfg.doc_search.enabled {
                    tools.register(IndexSearchTool::documents(
                        Arc::clone(&self.llm),
                        service.clone(),
                        self.cfg.doc_search.indexes.clone(),
                        self.cfg.doc_search.top_k,
                    ));
                }
                if self.cfg.book_search.enabled {
                    tools.register(IndexSearchTool::books(
                        Arc::clone(&self.llm),
                        service,
                        self.cfg.book_search.indexes.clone(),
                        self.cfg.book_search.top_k,
                        self.cfg.book_search.sas_token.clone(),
                    ));
                }
            }
            None => tracing::debug!("search endpoint not configured, skipping index search tools"),
        }

        if self.cfg.chat.enabled {
            tools.register(ChatTool::new(Arc::clone(&self.llm)));
        }

        if let Some(source) = &self.spec_source {
            let spec = source.load().await?;
            tools.register(ApiSearchTool::new(
                Arc::clone(&self.llm),
                spec,
                self.cfg.api_search.limit_to_domains.clone(),
                self.cfg.api_search.max_response_chars,
            ));
        }

        if self.with_echo {
            tools.register(EchoTool::new());
        }

        Ok(tools)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn offline_cfg() -> ToolsSection {
        let mut cfg = ToolsSection::default();
        cfg.api_search.enabled = false;
        cfg
    }

    #[tokio::test]
    async fn test_offline_tools() {
        let factory = ConfiguredToolFactory::new(offline_cfg(), Arc::new(MockLlmClient)).with_echo(true);
        let tools = factory.build().await.unwrap();
        assert_eq!(tools.tool_names(), vec!["@chatgpt", "echo"]);
        assert!(tools.descriptors().iter().all(|d| d.returns_directly));
    }

    #[tokio::test]
    async fn test_search_tools_need_endpoint() {
        let mut cfg = offline_cfg();
        cfg.search.endpoint = Some("https://search.example".to_string());
        let tools = ConfiguredToolFactory::new(cfg, Arc::new(MockLlmClient))
            .build()
            .await
            .unwrap();
        assert_eq!(tools.tool_names(), vec!["@docsearch", "@booksearch", "@chatgpt"]);
    }

    #[tokio::test]
    async fn test_each_build_is_fresh() {
        let factory = ConfiguredToolFactory::new(offline_cfg(), Arc::new(MockLlmClient));
        let a = factory.build().await.unwrap();
        let b = factory.build().await.unwrap();
        let (ta, tb) = (a.get("@chatgpt").unwrap(), b.get("@chatgpt").unwrap());
        assert!(!Arc::ptr_eq(&ta, &tb));
    }

    #[tokio::test]
    async fn test_spec_failure_is_setup_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let mut cfg = ToolsSection::default();
        cfg.api_search.spec_url = format!("{}/swagger.json", server.uri());
        let result = ConfiguredToolFactory::new(cfg, Arc::new(MockLlmClient))
            .build()
            .await;
        assert!(matches!(result, Err(BotError::Setup(_))));
    }
}

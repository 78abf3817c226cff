//! 索引检索工具：文档检索（@docsearch）与向量书库检索（@booksearch）
//!
//! 对检索服务的每个索引发起 REST 查询（`POST {endpoint}/indexes/{index}/docs/search`），
//! 合并各索引前 k 条结果，再由 LLM 根据这些片段组织答案并标注来源。
//! 排序与召回质量由检索服务负责。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

use crate::llm::LlmClient;
use crate::memory::Message;
use crate::tools::registry::preview;
use crate::tools::{Tool, ToolDescriptor};

/// 单个片段最多保留的字符数
const SNIPPET_CHARS: usize = 1500;

const ANSWER_SYSTEM_PROMPT: &str = "You answer questions using only the numbered sources provided. \
Cite sources inline as [n]. If the sources do not contain the answer, say you could not find it.";

/// 检索服务连接参数
#[derive(Debug, Clone)]
pub struct SearchService {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub api_version: String,
}

/// 一条命中结果
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub index: String,
    pub title: String,
    pub content: String,
    pub location: Option<String>,
    pub score: f64,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    value: Vec<Value>,
}

/// 索引检索工具
pub struct IndexSearchTool {
    descriptor: ToolDescriptor,
    llm: Arc<dyn LlmClient>,
    client: Client,
    service: SearchService,
    indexes: Vec<String>,
    top_k: usize,
    sas_token: Option<String>,
}

impl IndexSearchTool {
    /// 文档检索（@docsearch）
    pub fn documents(
        llm: Arc<dyn LlmClient>,
        service: SearchService,
        indexes: Vec<String>,
        top_k: usize,
    ) -> Self {
        Self::new(
            ToolDescriptor::new(
                "@docsearch",
                "useful when the questions includes the term: @docsearch, or when you need to \
                 search the company's documents and files.\n",
            ),
            llm,
            service,
            indexes,
            top_k,
        )
    }

    /// 书库检索（@booksearch），来源链接追加 SAS token
    pub fn books(
        llm: Arc<dyn LlmClient>,
        service: SearchService,
        indexes: Vec<String>,
        top_k: usize,
        sas_token: Option<String>,
    ) -> Self {
        let mut tool = Self::new(
            ToolDescriptor::new(
                "@booksearch",
                "useful when the questions includes the term: @booksearch.\n",
            ),
            llm,
            service,
            indexes,
            top_k,
        );
        tool.sas_token = sas_token;
        tool
    }

    fn new(
        descriptor: ToolDescriptor,
        llm: Arc<dyn LlmClient>,
        service: SearchService,
        indexes: Vec<String>,
        top_k: usize,
    ) -> Self {
        Self {
            descriptor: descriptor.returns_directly(true),
            llm,
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            service,
            indexes,
            top_k: top_k.max(1),
            sas_token: None,
        }
    }

    async fn search_index(&self, index: &str, query: &str) -> Result<Vec<SearchHit>, String> {
        let url = format!(
            "{}/indexes/{}/docs/search?api-version={}",
            self.service.endpoint.trim_end_matches('/'),
            index,
            self.service.api_version
        );
        let mut req = self.client.post(&url).json(&serde_json::json!({
            "search": query,
            "top": self.top_k,
        }));
        if let Some(key) = &self.service.api_key {
            req = req.header("api-key", key);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| format!("Search request failed: {}", e))?;
        if !resp.status().is_success() {
            return Err(format!("Search HTTP {} on index {}", resp.status(), index));
        }
        let body: SearchResponse = resp
            .json()
            .await
            .map_err(|e| format!("Search response parse: {}", e))?;

        Ok(body
            .value
            .iter()
            .map(|doc| self.to_hit(index, doc))
            .collect())
    }

    fn to_hit(&self, index: &str, doc: &Value) -> SearchHit {
        let field = |names: &[&str]| {
            names
                .iter()
                .find_map(|n| doc.get(*n).and_then(Value::as_str))
                .map(str::to_string)
        };
        let location = field(&["location", "url", "source"]).map(|loc| match &self.sas_token {
            Some(sas) => format!("{}?{}", loc, sas.trim_start_matches('?')),
            None => loc,
        });
        SearchHit {
            index: index.to_string(),
            title: field(&["title", "name"]).unwrap_or_else(|| "(untitled)".to_string()),
            content: field(&["chunk", "content", "text"]).unwrap_or_default(),
            location,
            score: doc
                .get("@search.score")
                .and_then(Value::as_f64)
                .unwrap_or(0.0),
        }
    }

    /// 查询所有索引，按得分排序取前 k 条
    pub async fn search(&self, query: &str) -> Result<Vec<SearchHit>, String> {
        let mut hits = Vec::new();
        for index in &self.indexes {
            hits.extend(self.search_index(index, query).await?);
        }
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(self.top_k);
        Ok(hits)
    }
}

/// 把命中结果拼成带编号的来源段落
pub fn format_sources(hits: &[SearchHit]) -> String {
    hits.iter()
        .enumerate()
        .map(|(i, h)| {
            let source = h.location.as_deref().unwrap_or(&h.index);
            format!(
                "[{}] {} ({})\n{}",
                i + 1,
                h.title,
                source,
                preview(&h.content, SNIPPET_CHARS)
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[async_trait]
impl Tool for IndexSearchTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, input: &str) -> Result<String, String> {
        let query = input.replace(self.descriptor.name.as_str(), "");
        let query = query.trim();
        tracing::info!(tool = %self.descriptor.name, query = %query, "index search");

        let hits = self.search(query).await?;
        if hits.is_empty() {
            return Ok("I could not find anything relevant in the indexed content.".to_string());
        }

        self.llm
            .complete(&[
                Message::system(ANSWER_SYSTEM_PROMPT),
                Message::user(format!(
                    "Sources:\n{}\n\nQuestion: {}",
                    format_sources(&hits),
                    query
                )),
            ])
            .await
    }
}

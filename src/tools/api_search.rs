//! REST API 检索工具（@apisearch）
//!
//! 构建时拉取远程 OpenAPI 规格并精简为 servers / description / endpoints；
//! 调用时让 LLM 根据精简规格写出一个 GET 请求 URL，URL 必须位于 limit_to_domains 之内，
//! 请求结果再交给 LLM 组织答案。
//!
//! 规格来源 ApiSpecSource 可配置是否跨回合缓存（cache_spec）。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::OnceCell;

use crate::core::BotError;
use crate::llm::LlmClient;
use crate::memory::Message;
use crate::tools::registry::preview;
use crate::tools::{Tool, ToolDescriptor};

const HTTP_METHODS: [&str; 5] = ["get", "post", "patch", "put", "delete"];

/// 精简后的接口
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReducedEndpoint {
    /// 形如 "GET /v3/covid-19/all"
    pub name: String,
    pub description: String,
    pub parameters: Vec<Value>,
}

/// 精简后的 OpenAPI 规格
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReducedSpec {
    pub servers: Vec<String>,
    pub description: String,
    pub endpoints: Vec<ReducedEndpoint>,
}

impl ReducedSpec {
    /// 供 prompt 使用的紧凑文本
    pub fn to_prompt(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// 精简 OpenAPI 规格：只保留服务地址、说明、各接口的摘要与参数（name / in / description / required）
pub fn reduce_openapi_spec(spec: &Value) -> ReducedSpec {
    let servers = spec
        .get("servers")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|s| s.get("url").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let description = spec
        .pointer("/info/description")
        .or_else(|| spec.pointer("/info/title"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let mut endpoints = Vec::new();
    if let Some(paths) = spec.get("paths").and_then(Value::as_object) {
        for (route, operations) in paths {
            let Some(operations) = operations.as_object() else { continue };
            for (method, docs) in operations {
                if !HTTP_METHODS.contains(&method.as_str()) {
                    continue;
                }
                let description = docs
                    .get("summary")
                    .or_else(|| docs.get("description"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let parameters = docs
                    .get("parameters")
                    .and_then(Value::as_array)
                    .map(|params| params.iter().map(reduce_parameter).collect())
                    .unwrap_or_default();
                endpoints.push(ReducedEndpoint {
                    name: format!("{} {}", method.to_uppercase(), route),
                    description,
                    parameters,
                });
            }
        }
    }

    ReducedSpec {
        servers,
        description,
        endpoints,
    }
}

fn reduce_parameter(param: &Value) -> Value {
    let mut out = serde_json::Map::new();
    for key in ["name", "in", "description", "required"] {
        if let Some(v) = param.get(key) {
            out.insert(key.to_string(), v.clone());
        }
    }
    Value::Object(out)
}

/// 远程规格来源：cache_spec=true 时只拉取一次，之后跨回合复用
pub struct ApiSpecSource {
    url: String,
    client: Client,
    cache_spec: bool,
    cached: OnceCell<Arc<ReducedSpec>>,
}

impl ApiSpecSource {
    pub fn new(url: impl Into<String>, cache_spec: bool, timeout_secs: u64) -> Self {
        Self {
            url: url.into(),
            client: Client::builder()
                .timeout(Duration::from_secs(timeout_secs.max(1)))
                .build()
                .unwrap_or_default(),
            cache_spec,
            cached: OnceCell::new(),
        }
    }

    /// 取得精简规格；拉取或解析失败为 SetupError
    pub async fn load(&self) -> Result<Arc<ReducedSpec>, BotError> {
        if self.cache_spec {
            self.cached
                .get_or_try_init(|| self.fetch())
                .await
                .map(Arc::clone)
        } else {
            self.fetch().await
        }
    }

    async fn fetch(&self) -> Result<Arc<ReducedSpec>, BotError> {
        tracing::info!(url = %self.url, "fetching API spec");
        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| BotError::Setup(format!("API spec fetch failed: {}", e)))?;
        if !resp.status().is_success() {
            return Err(BotError::Setup(format!(
                "API spec fetch failed: HTTP {}",
                resp.status()
            )));
        }
        let spec: Value = resp
            .json()
            .await
            .map_err(|e| BotError::Setup(format!("API spec is not valid JSON: {}", e)))?;
        Ok(Arc::new(reduce_openapi_spec(&spec)))
    }
}

/// REST API 检索工具
pub struct ApiSearchTool {
    descriptor: ToolDescriptor,
    llm: Arc<dyn LlmClient>,
    client: Client,
    spec: Arc<ReducedSpec>,
    limit_to_domains: Vec<String>,
    max_response_chars: usize,
}

impl ApiSearchTool {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        spec: Arc<ReducedSpec>,
        limit_to_domains: Vec<String>,
        max_response_chars: usize,
    ) -> Self {
        let description = format!(
            "useful when the questions includes the term: @apisearch. Calls a REST API: {}\n",
            preview(&spec.description, 200)
        );
        Self {
            descriptor: ToolDescriptor::new("@apisearch", description).returns_directly(true),
            llm,
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            spec,
            limit_to_domains,
            max_response_chars,
        }
    }

    /// URL 是否位于允许的前缀之内（空列表表示不限制）
    ///
    /// 按解析后的 scheme、host、端口比较，路径须落在前缀路径的段边界之内。
    pub fn is_allowed(&self, url: &str) -> bool {
        if self.limit_to_domains.is_empty() {
            return true;
        }
        let Ok(target) = Url::parse(url) else {
            return false;
        };
        self.limit_to_domains.iter().any(|prefix| match Url::parse(prefix) {
            Ok(allowed) => {
                same_origin(&allowed, &target) && within_path(allowed.path(), target.path())
            }
            Err(e) => {
                tracing::warn!(%prefix, "ignoring unparsable allowed domain: {}", e);
                false
            }
        })
    }

    async fn plan_request(&self, question: &str) -> Result<String, String> {
        let system = format!(
            "You are given a reduced OpenAPI specification:\n{}\n\n\
             Write the single full GET request URL (including the server) that best answers the \
             user's question. Reply with the URL only.",
            self.spec.to_prompt()
        );
        let reply = self
            .llm
            .complete(&[Message::system(system), Message::user(question)])
            .await?;
        extract_url(&reply).ok_or_else(|| format!("No URL in planner reply: {}", preview(&reply, 200)))
    }
}

fn same_origin(allowed: &Url, target: &Url) -> bool {
    allowed.scheme() == target.scheme()
        && allowed.host_str().is_some()
        && allowed.host_str() == target.host_str()
        && allowed.port_or_known_default() == target.port_or_known_default()
}

fn within_path(prefix: &str, path: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    prefix.is_empty()
        || path == prefix
        || path
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// 从 LLM 回复中取第一个 http(s) URL
pub fn extract_url(text: &str) -> Option<String> {
    text.split_whitespace()
        .map(|w| w.trim_matches(|c: char| matches!(c, '`' | '"' | '\'' | '<' | '>' | '(' | ')')))
        .find(|w| w.starts_with("http://") || w.starts_with("https://"))
        .map(str::to_string)
}

#[async_trait]
impl Tool for ApiSearchTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, input: &str) -> Result<String, String> {
        let question = input.replace("@apisearch", "");
        let question = question.trim();

        let url = self.plan_request(question).await?;
        if !self.is_allowed(&url) {
            return Err(format!("URL outside allowed domains: {}", url));
        }
        tracing::info!(url = %url, "api search request");

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| format!("Request failed: {}", e))?;
        if !resp.status().is_success() {
            return Err(format!("HTTP {}", resp.status()));
        }
        let body = resp
            .text()
            .await
            .map_err(|e| format!("Read body: {}", e))?;

        self.llm
            .complete(&[
                Message::system(
                    "Answer the user's question using the API response below. Be concise.",
                ),
                Message::user(format!(
                    "API response from {}:\n{}\n\nQuestion: {}",
                    url,
                    preview(&body, self.max_response_chars),
                    question
                )),
            ])
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlmClient;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sample_spec(server: &str) -> Value {
        serde_json::json!({
            "openapi": "3.0.0",
            "info": {"title": "Disease API", "description": "Open disease data"},
            "servers": [{"url": server}],
            "paths": {
                "/v3/covid-19/all": {
                    "get": {
                        "summary": "Get global COVID-19 totals",
                        "parameters": [
                            {"name": "yesterday", "in": "query", "description": "Yesterday's data",
                             "required": false, "schema": {"type": "string"}}
                        ],
                        "responses": {"200": {"description": "ok"}}
                    },
                    "parameters": []
                }
            }
        })
    }

    #[test]
    fn test_reduce_keeps_operations_only() {
        let reduced = reduce_openapi_spec(&sample_spec("https://disease.sh"));
        assert_eq!(reduced.servers, vec!["https://disease.sh".to_string()]);
        assert_eq!(reduced.description, "Open disease data");
        assert_eq!(reduced.endpoints.len(), 1);

        let endpoint = &reduced.endpoints[0];
        assert_eq!(endpoint.name, "GET /v3/covid-19/all");
        assert_eq!(endpoint.description, "Get global COVID-19 totals");
        assert_eq!(
            endpoint.parameters[0],
            serde_json::json!({"name": "yesterday", "in": "query",
                               "description": "Yesterday's data", "required": false})
        );
    }

    #[test]
    fn test_extract_url() {
        assert_eq!(
            extract_url("Sure: `https://disease.sh/v3/covid-19/all`"),
            Some("https://disease.sh/v3/covid-19/all".to_string())
        );
        assert_eq!(extract_url("no url here"), None);
    }

    #[tokio::test]
    async fn test_spec_source_caches_when_enabled() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/swagger.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(sample_spec("https://x")))
            .expect(1)
            .mount(&server)
            .await;

        let source = ApiSpecSource::new(format!("{}/swagger.json", server.uri()), true, 5);
        let first = source.load().await.unwrap();
        let second = source.load().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_spec_source_refetches_when_disabled() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/swagger.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(sample_spec("https://x")))
            .expect(2)
            .mount(&server)
            .await;

        let source = ApiSpecSource::new(format!("{}/swagger.json", server.uri()), false, 5);
        source.load().await.unwrap();
        source.load().await.unwrap();
    }

    #[tokio::test]
    async fn test_spec_fetch_failure_is_setup_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        let source = ApiSpecSource::new(format!("{}/missing.json", server.uri()), true, 5);
        assert!(matches!(source.load().await, Err(BotError::Setup(_))));
    }

    #[tokio::test]
    async fn test_execute_calls_planned_url() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v3/covid-19/all"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"cases": 42}"#))
            .expect(1)
            .mount(&server)
            .await;

        let planned = format!("{}/v3/covid-19/all", server.uri());
        let llm = Arc::new(ScriptedLlmClient::new([planned.clone(), "42 cases.".to_string()]));
        let spec = Arc::new(reduce_openapi_spec(&sample_spec(&server.uri())));
        let tool = ApiSearchTool::new(llm.clone(), spec, vec![server.uri()], 1000);

        let answer = tool.execute("@apisearch how many cases?").await.unwrap();
        assert_eq!(answer, "42 cases.");
        assert!(llm.calls()[1][1].content.contains(r#"{"cases": 42}"#));
    }

    #[tokio::test]
    async fn test_execute_rejects_foreign_domain() {
        let llm = Arc::new(ScriptedLlmClient::new(["https://evil.example/steal"]));
        let spec = Arc::new(reduce_openapi_spec(&sample_spec("https://disease.sh")));
        let tool = ApiSearchTool::new(llm, spec, vec!["https://disease.sh/".into()], 1000);
        let err = tool.execute("cases?").await.unwrap_err();
        assert!(err.contains("outside allowed domains"));
    }

    #[test]
    fn test_allowed_domain_needs_exact_host() {
        let llm = Arc::new(ScriptedLlmClient::new(Vec::<String>::new()));
        let spec = Arc::new(reduce_openapi_spec(&sample_spec("https://disease.sh")));
        let tool = ApiSearchTool::new(llm, spec, vec!["https://disease.sh".into()], 1000);

        assert!(tool.is_allowed("https://disease.sh/v3/covid-19/all"));
        assert!(tool.is_allowed("https://disease.sh:443/v3/covid-19/all"));
        assert!(!tool.is_allowed("https://disease.sh.evil.com/x"));
        assert!(!tool.is_allowed("https://disease.sh@evil.com/x"));
        assert!(!tool.is_allowed("http://disease.sh/v3/covid-19/all"));
        assert!(!tool.is_allowed("https://disease.sh:8443/v3"));
        assert!(!tool.is_allowed("not a url"));
    }

    #[test]
    fn test_allowed_path_stops_at_segment_boundary() {
        let llm = Arc::new(ScriptedLlmClient::new(Vec::<String>::new()));
        let spec = Arc::new(reduce_openapi_spec(&sample_spec("https://disease.sh")));
        let tool = ApiSearchTool::new(llm, spec, vec!["https://disease.sh/v3".into()], 1000);

        assert!(tool.is_allowed("https://disease.sh/v3"));
        assert!(tool.is_allowed("https://disease.sh/v3/covid-19/all?yesterday=true"));
        assert!(!tool.is_allowed("https://disease.sh/v3-internal/keys"));
        assert!(!tool.is_allowed("https://disease.sh/v2/all"));
    }
}

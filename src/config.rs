//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `RELAY__*` 覆盖（双下划线表示嵌套，如 `RELAY__LLM__PROVIDER=azure`）。
//! 配置在进程启动时读取一次，核心逻辑不会修改它。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub memory: MemorySection,
    pub runtime: RuntimeSection,
    pub llm: LlmSection,
    pub tools: ToolsSection,
    pub channel: ChannelSection,
}

/// [app] 段：名称、欢迎语、Prompt 文件
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: String,
    /// 新成员加入会话时发送的欢迎语
    pub welcome_message: String,
    /// 覆盖默认 system prompt 的文件（Markdown / 纯文本）
    pub system_prompt_path: Option<PathBuf>,
    /// 覆盖默认 human 后缀模板的文件，模板中 {input} 会被替换为用户输入
    pub human_prompt_path: Option<PathBuf>,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: "relay-bot".to_string(),
            welcome_message: default_welcome_message(),
            system_prompt_path: None,
            human_prompt_path: None,
        }
    }
}

fn default_welcome_message() -> String {
    "Hello and welcome! I can search your documents (@docsearch), books (@booksearch), \
     public APIs (@apisearch), or just chat (@chatgpt). What would you like to know?"
        .to_string()
}

/// [memory] 段：每个会话保留的对话轮数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemorySection {
    pub window_turns: usize,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self { window_turns: 10 }
    }
}

/// [runtime] 段：后台运行并发、超时与投递重试
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeSection {
    /// 同时在跑的推理运行数上限（限制并发 LLM 调用）
    pub max_concurrent_runs: usize,
    /// 单次推理运行超时（秒），0 表示不限制
    pub run_timeout_secs: u64,
    /// 最终答案发送失败后的重试次数
    pub delivery_retries: usize,
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            max_concurrent_runs: 4,
            run_timeout_secs: 120,
            delivery_retries: 1,
        }
    }
}

/// [llm] 段：后端选择与采样参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：azure / openai / mock
    pub provider: String,
    /// 模型名（Azure 下为部署名）
    pub model: String,
    /// API 基地址（Azure 资源地址或 OpenAI 兼容端点）
    pub base_url: Option<String>,
    /// Azure API 版本
    pub api_version: String,
    pub temperature: f32,
    /// 工具内部 LLM 调用的 max tokens
    pub tool_max_tokens: u32,
    /// 主 Agent 的 max tokens
    pub agent_max_tokens: u32,
    /// 单回合 Agent 最多思考/调用工具的轮数
    pub max_iterations: usize,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "mock".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            api_version: "2024-06-01".to_string(),
            temperature: 0.5,
            tool_max_tokens: 1000,
            agent_max_tokens: 500,
            max_iterations: 6,
        }
    }
}

/// [tools] 段：各工具开关与参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
    pub search: SearchServiceSection,
    pub doc_search: DocSearchSection,
    pub book_search: BookSearchSection,
    pub chat: ChatSection,
    pub api_search: ApiSearchSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 60,
            search: SearchServiceSection::default(),
            doc_search: DocSearchSection::default(),
            book_search: BookSearchSection::default(),
            chat: ChatSection::default(),
            api_search: ApiSearchSection::default(),
        }
    }
}

/// [tools.search] 段：检索服务地址与密钥（doc/book 检索共用）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchServiceSection {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub api_version: String,
}

impl Default for SearchServiceSection {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            api_version: "2023-11-01".to_string(),
        }
    }
}

/// [tools.doc_search] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DocSearchSection {
    pub enabled: bool,
    pub indexes: Vec<String>,
    /// 每个索引取前 k 条
    pub top_k: usize,
}

impl Default for DocSearchSection {
    fn default() -> Self {
        Self {
            enabled: true,
            indexes: vec!["cogsrch-index-files".into(), "cogsrch-index-csv".into()],
            top_k: 10,
        }
    }
}

/// [tools.book_search] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BookSearchSection {
    pub enabled: bool,
    pub indexes: Vec<String>,
    pub top_k: usize,
    /// 附加到来源链接上的 SAS token
    pub sas_token: Option<String>,
}

impl Default for BookSearchSection {
    fn default() -> Self {
        Self {
            enabled: true,
            indexes: vec!["cogsrch-index-books-vector".into()],
            top_k: 10,
            sas_token: None,
        }
    }
}

/// [tools.chat] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChatSection {
    pub enabled: bool,
}

impl Default for ChatSection {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// [tools.api_search] 段：远程 OpenAPI 规格与允许访问的域名
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiSearchSection {
    pub enabled: bool,
    pub spec_url: String,
    pub limit_to_domains: Vec<String>,
    /// true：首次拉取后跨回合复用；false：每个回合重新拉取
    pub cache_spec: bool,
    pub spec_timeout_secs: u64,
    /// 接口响应截断长度（字符）
    pub max_response_chars: usize,
}

impl Default for ApiSearchSection {
    fn default() -> Self {
        Self {
            enabled: true,
            spec_url: "https://disease.sh/apidocs/swagger_v3.json".to_string(),
            limit_to_domains: vec!["https://disease.sh/".to_string()],
            cache_spec: true,
            spec_timeout_secs: 15,
            max_response_chars: 8000,
        }
    }
}

/// [channel] 段：Bot Framework 监听端口与凭据
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChannelSection {
    pub port: u16,
    pub app_id: String,
    pub app_password: String,
    /// 出站回复使用的 Bearer token（由外部获取后注入）
    pub bearer_token: Option<String>,
}

impl Default for ChannelSection {
    fn default() -> Self {
        Self {
            port: 3978,
            app_id: String::new(),
            app_password: String::new(),
            bearer_token: None,
        }
    }
}

/// 从 config 目录加载配置，环境变量 RELAY__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 RELAY__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("RELAY")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("tools.api_search.limit_to_domains")
            .with_list_parse_key("tools.doc_search.indexes")
            .with_list_parse_key("tools.book_search.indexes")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.memory.window_turns, 10);
        assert_eq!(cfg.channel.port, 3978);
        assert_eq!(cfg.llm.provider, "mock");
        assert!(cfg.tools.api_search.cache_spec);
        assert_eq!(cfg.runtime.delivery_retries, 1);
    }

    #[test]
    fn test_load_explicit_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[memory]
window_turns = 3

[runtime]
run_timeout_secs = 5

[tools.api_search]
cache_spec = false
limit_to_domains = ["https://example.com/"]
"#
        )
        .unwrap();

        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.memory.window_turns, 3);
        assert_eq!(cfg.runtime.run_timeout_secs, 5);
        assert_eq!(cfg.runtime.max_concurrent_runs, 4);
        assert!(!cfg.tools.api_search.cache_spec);
        assert_eq!(
            cfg.tools.api_search.limit_to_domains,
            vec!["https://example.com/".to_string()]
        );
        assert_eq!(cfg.tools.doc_search.top_k, 10);
    }
}

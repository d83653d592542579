//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `AIGENT__*` 覆盖（双下划线表示嵌套，如 `AIGENT__LLM__PROVIDER=openai`）。
//! 每个段都有默认值，空配置也能运行（默认使用 mock 模型）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::broker::BrokerConfig;
use crate::core::{EngineConfig, RecoveryConfig};
use crate::llm::ModelSpec;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub engine: EngineSection,
    pub recovery: RecoverySection,
    pub tools: ToolsSection,
    pub broker: BrokerSection,
    pub server: ServerSection,
}

/// [app] 段
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppSection {
    pub name: Option<String>,
}

/// [llm] 段：后端选择与请求超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 注册表中的后端名：openai / deepseek / qwen / mock
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    /// 单次生成请求超时（秒）
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "mock".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_request_timeout_secs() -> u64 {
    60
}

/// [engine] 段：迭代上限、总超时、计划重试次数、相关性门限
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSection {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_plan_attempts")]
    pub max_plan_attempts: usize,
    /// 0 表示关闭相关性检查
    #[serde(default = "default_relevance_threshold")]
    pub relevance_threshold: f64,
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            timeout_secs: default_timeout_secs(),
            max_plan_attempts: default_max_plan_attempts(),
            relevance_threshold: default_relevance_threshold(),
            default_top_k: default_top_k(),
        }
    }
}

fn default_max_iterations() -> usize {
    10
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_max_plan_attempts() -> usize {
    3
}

fn default_relevance_threshold() -> f64 {
    crate::planner::relevance::DEFAULT_RELEVANCE_THRESHOLD
}

fn default_top_k() -> usize {
    5
}

/// [recovery] 段：替代输入/查询的生成参数
#[derive(Debug, Clone, Deserialize)]
pub struct RecoverySection {
    #[serde(default = "default_recovery_top_k")]
    pub retrieval_top_k: usize,
    #[serde(default = "default_query_trim_chars")]
    pub query_trim_chars: usize,
    #[serde(default = "default_min_trim_query_chars")]
    pub min_trim_query_chars: usize,
    #[serde(default = "default_history_fragment_chars")]
    pub history_fragment_chars: usize,
}

impl Default for RecoverySection {
    fn default() -> Self {
        Self {
            retrieval_top_k: default_recovery_top_k(),
            query_trim_chars: default_query_trim_chars(),
            min_trim_query_chars: default_min_trim_query_chars(),
            history_fragment_chars: default_history_fragment_chars(),
        }
    }
}

fn default_recovery_top_k() -> usize {
    3
}

fn default_query_trim_chars() -> usize {
    5
}

fn default_min_trim_query_chars() -> usize {
    10
}

fn default_history_fragment_chars() -> usize {
    120
}

/// [tools] 段
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout_secs(),
        }
    }
}

fn default_tool_timeout_secs() -> u64 {
    30
}

/// [broker] 段：订阅队列容量、订阅存活时间、客户端重连间隔、保活间隔
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerSection {
    #[serde(default = "default_client_buffer")]
    pub client_buffer: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_subscription_ttl_secs")]
    pub subscription_ttl_secs: u64,
    /// 0 表示不发送 retry 字段
    #[serde(default = "default_retry_ms")]
    pub retry_ms: u64,
    /// 事件流空闲保活间隔，0 表示不发送
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            client_buffer: default_client_buffer(),
            queue_capacity: default_queue_capacity(),
            subscription_ttl_secs: default_subscription_ttl_secs(),
            retry_ms: default_retry_ms(),
            keep_alive_secs: default_keep_alive_secs(),
        }
    }
}

fn default_client_buffer() -> usize {
    100
}

fn default_queue_capacity() -> usize {
    1000
}

fn default_subscription_ttl_secs() -> u64 {
    30 * 60
}

fn default_retry_ms() -> u64 {
    5000
}

fn default_keep_alive_secs() -> u64 {
    15
}

/// [server] 段（aigent-web）
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

fn default_bind_addr() -> String {
    "127.0.0.1:8080".to_string()
}

impl AppConfig {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_iterations: self.engine.max_iterations,
            timeout: Duration::from_secs(self.engine.timeout_secs),
            max_plan_attempts: self.engine.max_plan_attempts,
            relevance_threshold: self.engine.relevance_threshold,
            default_top_k: self.engine.default_top_k,
            recovery: RecoveryConfig {
                retrieval_top_k: self.recovery.retrieval_top_k,
                query_trim_chars: self.recovery.query_trim_chars,
                min_trim_query_chars: self.recovery.min_trim_query_chars,
                history_fragment_chars: self.recovery.history_fragment_chars,
            },
        }
    }

    pub fn broker_config(&self) -> BrokerConfig {
        BrokerConfig {
            client_buffer: self.broker.client_buffer.max(1),
            queue_capacity: self.broker.queue_capacity.max(1),
            subscription_ttl: Duration::from_secs(self.broker.subscription_ttl_secs),
            retry_ms: (self.broker.retry_ms > 0).then_some(self.broker.retry_ms),
            keep_alive: (self.broker.keep_alive_secs > 0)
                .then(|| Duration::from_secs(self.broker.keep_alive_secs)),
        }
    }

    /// 供 ModelRegistry::create 使用；api_key 由各后端工厂从环境变量读取
    pub fn model_spec(&self) -> ModelSpec {
        let mut spec = ModelSpec::new(self.llm.provider.clone(), self.llm.model.clone());
        spec.base_url = self.llm.base_url.clone();
        spec.request_timeout_secs = self.llm.request_timeout_secs;
        spec
    }
}

/// 从 config 目录加载配置，环境变量 AIGENT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path，则追加该文件（可覆盖前面的键；显式指定的文件必须存在）
/// 3. 最后叠加环境变量 AIGENT__*（双下划线表示嵌套键）
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

    if let Some(path) = config_path {
        builder = builder.add_source(config::File::from(path).required(true));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("AIGENT")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

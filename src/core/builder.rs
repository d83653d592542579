//! 引擎构建器：命令行与 HTTP 入口共用的初始化逻辑
//!
//! 按配置创建模型（经 ModelRegistry）、内置工具、内存检索后端与事件代理，最后组装 Engine。

use std::path::PathBuf;
use std::sync::Arc;

use crate::broker::EventBroker;
use crate::config::AppConfig;
use crate::core::{Backends, Engine};
use crate::llm::{LlmClient, ModelRegistry, RegistryError};
use crate::retrieval::InMemoryRetriever;
use crate::tools::{CalculatorTool, EchoTool, ToolError, ToolExecutor, ToolRegistry};

/// 组装好的运行组件；retriever 与 broker 也单独暴露给入口（导入文档、订阅事件）
pub struct EngineComponents {
    pub engine: Arc<Engine>,
    pub llm: Arc<dyn LlmClient>,
    pub tools: Arc<ToolExecutor>,
    pub retriever: Arc<InMemoryRetriever>,
    pub broker: EventBroker,
    pub config: AppConfig,
}

pub struct EngineBuilder {
    config: AppConfig,
    models: ModelRegistry,
    llm: Option<Arc<dyn LlmClient>>,
}

impl EngineBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            models: ModelRegistry::with_builtins(),
            llm: None,
        }
    }

    /// 使用自定义模型注册表（追加 provider 时用）
    pub fn with_models(mut self, models: ModelRegistry) -> Self {
        self.models = models;
        self
    }

    /// 直接指定模型实例，跳过注册表
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 内置工具：echo、calculator
    pub fn build_tool_registry(&self) -> Result<ToolRegistry, ToolError> {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool)?;
        registry.register(CalculatorTool)?;
        Ok(registry)
    }

    pub fn build_llm(&self) -> Result<Arc<dyn LlmClient>, RegistryError> {
        match &self.llm {
            Some(llm) => Ok(Arc::clone(llm)),
            None => self.models.create(&self.config.model_spec()),
        }
    }

    /// 必须在 tokio 运行时内调用（事件代理会 spawn 后台任务）
    pub fn build(self) -> anyhow::Result<EngineComponents> {
        let llm = self.build_llm()?;
        let tools = Arc::new(ToolExecutor::new(
            self.build_tool_registry()?,
            self.config.tools.tool_timeout_secs,
        ));
        let retriever = Arc::new(InMemoryRetriever::new());
        let broker = EventBroker::spawn(self.config.broker_config());

        let backends = Backends::new(Arc::clone(&llm))
            .with_tools(Arc::clone(&tools))
            .with_retriever(retriever.clone());
        let engine = Engine::new(backends, self.config.engine_config()).with_broker(broker.clone());
        tracing::info!(
            model = llm.name(),
            tools = ?tools.tool_names(),
            "engine ready"
        );

        Ok(EngineComponents {
            engine: Arc::new(engine),
            llm,
            tools,
            retriever,
            broker,
            config: self.config,
        })
    }
}

/// 从默认路径（或指定文件）加载配置并创建构建器
pub fn create_engine_builder(config_path: Option<PathBuf>) -> anyhow::Result<EngineBuilder> {
    let config = crate::config::load_config(config_path)?;
    Ok(EngineBuilder::new(config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_build_with_defaults_uses_mock() {
        let components = EngineBuilder::new(AppConfig::default()).build().unwrap();
        assert_eq!(components.llm.name(), "mock");
        assert_eq!(components.tools.tool_names(), vec!["calculator", "echo"]);
        assert!(components.retriever.is_empty());

        let answer = components.engine.execute("explain traits").await.unwrap();
        assert_eq!(answer, "Mock answer: explain traits");
        components.broker.shutdown().await;
    }

    #[test]
    fn test_unknown_provider_is_error() {
        let mut config = AppConfig::default();
        config.llm.provider = "nope".to_string();
        let builder = EngineBuilder::new(config);
        assert!(matches!(builder.build_llm(), Err(RegistryError::UnknownProvider(_))));
    }
}

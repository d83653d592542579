//! 模型注册表：provider 名 → 客户端工厂
//!
//! 注册表是一个普通实例，由启动代码构造后注入引擎，不使用进程级全局变量。
//! 内置 openai / deepseek / qwen（均走 OpenAI 兼容端点）与 mock；同名实例创建后缓存复用。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;

use crate::llm::{LlmClient, MockLlmClient, OpenAiClient};

pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
pub const QWEN_BASE_URL: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";

/// 创建模型实例所需的参数
#[derive(Debug, Clone)]
pub struct ModelSpec {
    /// 实例名（缓存键）
    pub name: String,
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub request_timeout_secs: u64,
}

impl ModelSpec {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        let provider = provider.into();
        Self {
            name: provider.clone(),
            provider,
            model: model.into(),
            base_url: None,
            api_key: None,
            request_timeout_secs: 60,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("provider '{0}' is already registered")]
    AlreadyRegistered(String),
    #[error("unsupported provider '{0}'")]
    UnknownProvider(String),
    #[error("failed to create model '{name}': {reason}")]
    Creation { name: String, reason: String },
}

pub type ModelFactory =
    Arc<dyn Fn(&ModelSpec) -> Result<Arc<dyn LlmClient>, RegistryError> + Send + Sync>;

#[derive(Default)]
pub struct ModelRegistry {
    factories: HashMap<String, ModelFactory>,
    instances: Mutex<HashMap<String, Arc<dyn LlmClient>>>,
}

impl ModelRegistry {
    /// 空注册表
    pub fn new() -> Self {
        Self::default()
    }

    /// 带内置 provider 的注册表
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.insert_factory("openai", Arc::new(openai_factory));
        registry.insert_factory("deepseek", Arc::new(deepseek_factory));
        registry.insert_factory("qwen", Arc::new(qwen_factory));
        registry.insert_factory("mock", Arc::new(mock_factory));
        registry
    }

    /// 注册工厂；同名重复注册返回错误
    pub fn register<F>(&mut self, provider: &str, factory: F) -> Result<(), RegistryError>
    where
        F: Fn(&ModelSpec) -> Result<Arc<dyn LlmClient>, RegistryError> + Send + Sync + 'static,
    {
        if self.factories.contains_key(provider) {
            return Err(RegistryError::AlreadyRegistered(provider.to_string()));
        }
        self.insert_factory(provider, Arc::new(factory));
        Ok(())
    }

    fn insert_factory(&mut self, provider: &str, factory: ModelFactory) {
        self.factories.insert(provider.to_string(), factory);
    }

    /// 已注册的 provider 名（排序后）
    pub fn providers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// 创建（或取回缓存的）模型实例
    pub fn create(&self, spec: &ModelSpec) -> Result<Arc<dyn LlmClient>, RegistryError> {
        if let Some(existing) = self.get(&spec.name) {
            return Ok(existing);
        }
        let factory = self
            .factories
            .get(&spec.provider)
            .ok_or_else(|| RegistryError::UnknownProvider(spec.provider.clone()))?;
        let client = factory(spec)?;
        tracing::info!(name = %spec.name, provider = %spec.provider, model = %spec.model, "model created");
        if let Ok(mut instances) = self.instances.lock() {
            instances.insert(spec.name.clone(), Arc::clone(&client));
        }
        Ok(client)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn LlmClient>> {
        self.instances.lock().ok()?.get(name).cloned()
    }
}

fn openai_factory(spec: &ModelSpec) -> Result<Arc<dyn LlmClient>, RegistryError> {
    Ok(openai_compatible(spec, None, "OPENAI_API_KEY"))
}

fn deepseek_factory(spec: &ModelSpec) -> Result<Arc<dyn LlmClient>, RegistryError> {
    Ok(openai_compatible(spec, Some(DEEPSEEK_BASE_URL), "DEEPSEEK_API_KEY"))
}

fn qwen_factory(spec: &ModelSpec) -> Result<Arc<dyn LlmClient>, RegistryError> {
    Ok(openai_compatible(spec, Some(QWEN_BASE_URL), "DASHSCOPE_API_KEY"))
}

fn mock_factory(_spec: &ModelSpec) -> Result<Arc<dyn LlmClient>, RegistryError> {
    Ok(Arc::new(MockLlmClient::new()))
}

/// base_url 以 spec 为准；api_key 依次取 spec、provider 专属环境变量、OPENAI_API_KEY
fn openai_compatible(spec: &ModelSpec, default_base: Option<&str>, key_env: &str) -> Arc<dyn LlmClient> {
    let base_url = spec.base_url.as_deref().or(default_base);
    let api_key = spec
        .api_key
        .clone()
        .or_else(|| std::env::var(key_env).ok());
    Arc::new(
        OpenAiClient::new(base_url, &spec.model, api_key.as_deref())
            .with_provider(spec.provider.clone())
            .with_request_timeout(Duration::from_secs(spec.request_timeout_secs)),
    )
}

//! LLM 客户端抽象
//!
//! 引擎只依赖 generate（提示词 → 文本）；OpenAI 兼容端点与 Mock 都实现 LlmClient。

use async_trait::async_trait;
use thiserror::Error;

/// 模型调用失败
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("model returned an empty response")]
    EmptyResponse,
    #[error("request timed out after {0}s")]
    Timeout(u64),
    #[error("mock script exhausted")]
    ScriptExhausted,
}

/// LLM 客户端 trait：非流式生成
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 根据提示词生成文本
    async fn generate(&self, prompt: &str) -> Result<String, LlmError>;

    /// 后端名称（日志用）
    fn name(&self) -> &str;
}

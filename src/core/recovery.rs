//! 步骤失败后的恢复策略
//!
//! 按 (动作, 失败后端) 选择策略：
//! - 工具失败：原输入 + 历史片段派生替代输入，依次重试，取第一个成功
//! - 检索失败：原查询 / 截尾查询 / 追加历史关键词，依次检索，取第一个非空结果
//! - 推理失败：带全部执行历史的恢复提示词重新生成
//! - 其它：带错误信息与历史的通用提示词
//!
//! 恢复只做一次，恢复失败由调用方视为整次运行失败。

use crate::core::engine::Backends;
use crate::core::{BackendError, RecoveryError};
use crate::planner::prompts::{default_recovery_prompt, reason_recovery_prompt};
use crate::planner::{ActionKind, Step};
use crate::retrieval::format_results;

/// 恢复参数（截尾长度等启发式均可配置）
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// 替代查询检索条数
    pub retrieval_top_k: usize,
    /// 截尾查询去掉的字符数
    pub query_trim_chars: usize,
    /// 查询字符数超过该值才生成截尾查询
    pub min_trim_query_chars: usize,
    /// 拼入替代输入的历史片段最大字符数
    pub history_fragment_chars: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            retrieval_top_k: 3,
            query_trim_chars: 5,
            min_trim_query_chars: 10,
            history_fragment_chars: 120,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStrategy {
    ToolAlternatives,
    AlternativeQueries,
    ReasonWithHistory,
    Default,
}

impl RecoveryStrategy {
    pub fn select(action: ActionKind, error: &BackendError) -> Self {
        match (action, error) {
            (ActionKind::ToolCall, BackendError::Tool(_)) => Self::ToolAlternatives,
            (ActionKind::RetrievalSearch, BackendError::Retrieval(_)) => Self::AlternativeQueries,
            (ActionKind::Reason, BackendError::Model(_)) => Self::ReasonWithHistory,
            _ => Self::Default,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecoveryEngine {
    config: RecoveryConfig,
}

impl RecoveryEngine {
    pub fn new(config: RecoveryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    pub async fn recover(
        &self,
        backends: &Backends,
        step: &Step,
        error: &BackendError,
        history: &[String],
    ) -> Result<String, RecoveryError> {
        let strategy = RecoveryStrategy::select(step.action, error);
        tracing::warn!(action = %step.action, ?strategy, error = %error, "attempting recovery");
        match strategy {
            RecoveryStrategy::ToolAlternatives => self.recover_tool(backends, step, history).await,
            RecoveryStrategy::AlternativeQueries => {
                self.recover_retrieval(backends, step, history).await
            }
            RecoveryStrategy::ReasonWithHistory => {
                let prompt = step.parameters.str("prompt")?;
                Ok(backends
                    .llm
                    .generate(&reason_recovery_prompt(prompt, history))
                    .await?)
            }
            RecoveryStrategy::Default => Ok(backends
                .llm
                .generate(&default_recovery_prompt(&error.to_string(), history))
                .await?),
        }
    }

    async fn recover_tool(
        &self,
        backends: &Backends,
        step: &Step,
        history: &[String],
    ) -> Result<String, RecoveryError> {
        let tools = backends
            .tools
            .as_ref()
            .ok_or(RecoveryError::NotConfigured("tool"))?;
        let tool_name = step.parameters.non_empty_str("tool_name")?;
        let input = step.parameters.str("input")?;

        // 至少包含原输入
        let alternatives = self.alternative_inputs(input, history);
        let mut last = String::new();
        for (i, alt) in alternatives.iter().enumerate() {
            match tools.execute(tool_name, alt).await {
                Ok(result) => {
                    tracing::info!(tool = tool_name, attempt = i + 1, "tool recovered");
                    return Ok(result);
                }
                Err(e) => {
                    tracing::warn!(tool = tool_name, attempt = i + 1, error = %e, "alternative input failed");
                    last = e.to_string();
                }
            }
        }
        Err(RecoveryError::ToolAlternativesExhausted {
            tool: tool_name.to_string(),
            attempts: alternatives.len(),
            last,
        })
    }

    async fn recover_retrieval(
        &self,
        backends: &Backends,
        step: &Step,
        history: &[String],
    ) -> Result<String, RecoveryError> {
        let retriever = backends
            .retriever
            .as_ref()
            .ok_or(RecoveryError::NotConfigured("retrieval"))?;
        let query = step.parameters.non_empty_str("query")?;

        let alternatives = self.alternative_queries(query, history);
        for (i, alt) in alternatives.iter().enumerate() {
            match retriever.search(alt, self.config.retrieval_top_k).await {
                Ok(results) if !results.is_empty() => {
                    tracing::info!(attempt = i + 1, query = %alt, "retrieval recovered");
                    return Ok(format_results(&results));
                }
                Ok(_) => tracing::warn!(attempt = i + 1, query = %alt, "alternative query returned nothing"),
                Err(e) => tracing::warn!(attempt = i + 1, query = %alt, error = %e, "alternative query failed"),
            }
        }
        Err(RecoveryError::QueryAlternativesExhausted {
            attempts: alternatives.len(),
        })
    }

    /// 原输入；有历史时追加最后一条结果片段；多于一条时再追加整段历史片段
    pub fn alternative_inputs(&self, input: &str, history: &[String]) -> Vec<String> {
        let mut inputs = vec![input.to_string()];
        if let Some(last) = history.last() {
            let fragment = truncate_chars(last.trim(), self.config.history_fragment_chars);
            if !fragment.is_empty() {
                inputs.push(format!("{input} {fragment}"));
            }
        }
        if history.len() > 1 {
            let joined = history.join("; ");
            let fragment = truncate_chars(joined.trim(), self.config.history_fragment_chars);
            inputs.push(format!("{input} {fragment}"));
        }
        dedup(inputs)
    }

    /// 原查询；足够长时去掉末尾若干字符；有历史时追加最后一条结果的首个词
    pub fn alternative_queries(&self, query: &str, history: &[String]) -> Vec<String> {
        let mut queries = vec![query.to_string()];
        let len = query.chars().count();
        if len > self.config.min_trim_query_chars && self.config.query_trim_chars > 0 {
            let trimmed = truncate_chars(query, len.saturating_sub(self.config.query_trim_chars));
            let trimmed = trimmed.trim();
            if !trimmed.is_empty() {
                queries.push(trimmed.to_string());
            }
        }
        if let Some(word) = history.last().and_then(|h| h.split_whitespace().next()) {
            queries.push(format!("{query} {word}"));
        }
        dedup(queries)
    }
}

/// 按字符截断（不会切断 UTF-8 字符）
fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn dedup(items: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(items.len());
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::llm::{LlmClient, LlmError, MockLlmClient};
    use crate::planner::Parameters;
    use crate::retrieval::{InMemoryRetriever, Retriever};
    use crate::tools::{EchoTool, ToolError, ToolExecutor, ToolRegistry};

    fn backends(llm: Arc<dyn LlmClient>) -> Backends {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool).unwrap();
        let retriever = InMemoryRetriever::new();
        retriever.add_document("d1", "tokio async runtime").unwrap();
        Backends {
            llm,
            tools: Some(Arc::new(ToolExecutor::new(registry, 5))),
            retriever: Some(Arc::new(retriever) as Arc<dyn Retriever>),
        }
    }

    #[test]
    fn test_strategy_selection() {
        let tool_err = BackendError::Tool(ToolError::NotFound("x".into()));
        let model_err = BackendError::Model(LlmError::EmptyResponse);
        assert_eq!(
            RecoveryStrategy::select(ActionKind::ToolCall, &tool_err),
            RecoveryStrategy::ToolAlternatives
        );
        assert_eq!(
            RecoveryStrategy::select(ActionKind::Reason, &model_err),
            RecoveryStrategy::ReasonWithHistory
        );
        assert_eq!(
            RecoveryStrategy::select(ActionKind::ToolCall, &model_err),
            RecoveryStrategy::Default
        );
    }

    #[test]
    fn test_alternative_queries() {
        let engine = RecoveryEngine::default();
        let history = vec!["tokio is great".to_string()];
        assert_eq!(
            engine.alternative_queries("async runtimes in rust", &history),
            vec!["async runtimes in rust", "async runtimes in", "async runtimes in rust tokio"]
        );
        // 不超过 10 个字符不截尾
        assert_eq!(engine.alternative_queries("short", &[]), vec!["short"]);
    }

    #[test]
    fn test_alternative_queries_trim_is_char_safe() {
        let engine = RecoveryEngine::default();
        let alts = engine.alternative_queries("异步运行时的设计与实现原理", &[]);
        assert_eq!(alts, vec!["异步运行时的设计与实现原理", "异步运行时的设计"]);
    }

    #[test]
    fn test_alternative_inputs_use_history_fragments() {
        let engine = RecoveryEngine::new(RecoveryConfig {
            history_fragment_chars: 4,
            ..RecoveryConfig::default()
        });
        assert_eq!(engine.alternative_inputs("x", &[]), vec!["x"]);
        let history = vec!["first result".to_string(), "second result".to_string()];
        assert_eq!(
            engine.alternative_inputs("x", &history),
            vec!["x", "x seco", "x firs"]
        );
    }

    #[tokio::test]
    async fn test_reason_recovery_uses_history_prompt() {
        let llm = Arc::new(MockLlmClient::scripted(["recovered answer"]));
        let b = backends(llm.clone());
        let step = Step::new(ActionKind::Reason, Parameters::new().with("prompt", "why"), false);
        let err = BackendError::Model(LlmError::EmptyResponse);
        let history = vec!["earlier".to_string()];
        let result = RecoveryEngine::default()
            .recover(&b, &step, &err, &history)
            .await
            .unwrap();
        assert_eq!(result, "recovered answer");
        let prompt = &llm.prompts()[0];
        assert!(prompt.contains("why"));
        assert!(prompt.contains("earlier"));
    }

    #[tokio::test]
    async fn test_retrieval_recovery_finds_results() {
        let b = backends(Arc::new(MockLlmClient::new()));
        let step = Step::new(
            ActionKind::RetrievalSearch,
            Parameters::new().with("query", "nothing matches here"),
            true,
        );
        let err = BackendError::Retrieval(crate::retrieval::RetrievalError::Backend("down".into()));
        let history = vec!["tokio".to_string()];
        let result = RecoveryEngine::default()
            .recover(&b, &step, &err, &history)
            .await
            .unwrap();
        assert!(result.contains("tokio async runtime"));
    }

    #[tokio::test]
    async fn test_tool_recovery_exhausted() {
        let b = backends(Arc::new(MockLlmClient::new()));
        let step = Step::new(
            ActionKind::ToolCall,
            Parameters::new().with("tool_name", "missing").with("input", "x"),
            true,
        );
        let err = BackendError::Tool(ToolError::NotFound("missing".into()));
        let history = vec!["h1".to_string(), "h2".to_string()];
        match RecoveryEngine::default().recover(&b, &step, &err, &history).await {
            Err(RecoveryError::ToolAlternativesExhausted { tool, attempts, .. }) => {
                assert_eq!(tool, "missing");
                assert_eq!(attempts, 3);
            }
            other => panic!("expected exhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_default_recovery_model_failure_is_error() {
        let b = backends(Arc::new(MockLlmClient::scripted_results(vec![Err(
            LlmError::Request("down".into()),
        )])));
        let step = Step::new(
            ActionKind::ToolCall,
            Parameters::new().with("tool_name", "echo").with("input", "x"),
            true,
        );
        let err = BackendError::Model(LlmError::EmptyResponse);
        let result = RecoveryEngine::default().recover(&b, &step, &err, &[]).await;
        assert!(matches!(result, Err(RecoveryError::Model(_))));
    }
}

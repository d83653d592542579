//! Mock LLM 客户端（用于测试与离线运行，无需 API）
//!
//! 两种模式：
//! - 默认：提示词中有 `Query: ` 行时回一个单步 reason 计划（continue=false），否则回显为答案
//! - 脚本：按顺序弹出预置响应，用尽后返回 ScriptExhausted
//!
//! 所有收到的提示词都会被记录，便于测试断言调用次数与内容。

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError};
use crate::planner::prompts::QUERY_LINE_PREFIX;

#[derive(Debug, Default)]
pub struct MockLlmClient {
    script: Option<Mutex<VecDeque<Result<String, LlmError>>>>,
    prompts: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 按顺序返回给定响应
    pub fn scripted<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::scripted_results(responses.into_iter().map(|s| Ok(s.into())))
    }

    /// 按顺序返回给定结果（可混入错误）
    pub fn scripted_results<I>(results: I) -> Self
    where
        I: IntoIterator<Item = Result<String, LlmError>>,
    {
        Self {
            script: Some(Mutex::new(results.into_iter().collect())),
            ..Self::default()
        }
    }

    /// 每次生成前等待（超时测试用）
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// 已收到的提示词
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().map(|p| p.len()).unwrap_or(0)
    }

    fn default_response(prompt: &str) -> String {
        let query = prompt
            .lines()
            .find_map(|line| line.strip_prefix(QUERY_LINE_PREFIX))
            .map(str::trim);
        match query {
            Some(query) => serde_json::json!({
                "thought": format!("Answer the query directly: {query}"),
                "steps": [
                    {"action": "reason", "parameters": {"prompt": query}, "continue": false}
                ]
            })
            .to_string(),
            None => format!("Mock answer: {}", prompt.trim()),
        }
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.script {
            Some(script) => script
                .lock()
                .map_err(|e| LlmError::Request(e.to_string()))?
                .pop_front()
                .unwrap_or(Err(LlmError::ScriptExhausted)),
            None => Ok(Self::default_response(prompt)),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::parse_plan;

    #[tokio::test]
    async fn test_default_mode_plans_from_query_line() {
        let client = MockLlmClient::new();
        let raw = client.generate("Iteration: 1\nQuery: what is rust\n").await.unwrap();
        let plan = parse_plan(&raw).unwrap();
        assert!(plan.thought.contains("what is rust"));
        assert!(!plan.steps[0].should_continue);

        let answer = client.generate("what is rust").await.unwrap();
        assert_eq!(answer, "Mock answer: what is rust");
        assert_eq!(client.call_count(), 2);
    }

    #[tokio::test]
    async fn test_scripted_mode_pops_in_order() {
        let client = MockLlmClient::scripted_results(vec![
            Ok("first".to_string()),
            Err(LlmError::Request("boom".into())),
        ]);
        assert_eq!(client.generate("a").await.unwrap(), "first");
        assert_eq!(client.generate("b").await, Err(LlmError::Request("boom".into())));
        assert_eq!(client.generate("c").await, Err(LlmError::ScriptExhausted));
        assert_eq!(client.prompts(), vec!["a", "b", "c"]);
    }
}

//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / execute），由 ToolRegistry 按名注册与查找；
//! 同名重复注册是错误。ToolExecutor 在调用时加超时与审计日志。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// 工具调用失败
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("tool '{0}' not found")]
    NotFound(String),
    #[error("tool '{name}' failed: {reason}")]
    Execution { name: String, reason: String },
    #[error("tool '{name}' timed out after {secs}s")]
    Timeout { name: String, secs: u64 },
    #[error("tool '{0}' is already registered")]
    AlreadyRegistered(String),
}

/// 工具 trait：名称、描述（供模型理解）、参数 schema、异步执行（输入为字符串）
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// 输入格式说明，默认任意字符串
    fn parameters_schema(&self) -> Value {
        serde_json::json!({ "type": "string" })
    }

    async fn execute(&self, input: &str) -> Result<String, String>;
}

/// 对外展示的工具信息
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) -> Result<(), ToolError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(ToolError::AlreadyRegistered(name));
        }
        self.tools.insert(name, Arc::new(tool));
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub async fn execute(&self, name: &str, input: &str) -> Result<String, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        tool.execute(input).await.map_err(|reason| ToolError::Execution {
            name: name.to_string(),
            reason,
        })
    }

    /// 工具名（排序，保证提示词稳定）
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn tool_infos(&self) -> Vec<ToolInfo> {
        let mut infos: Vec<ToolInfo> = self
            .tools
            .values()
            .map(|tool| ToolInfo {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters_schema(),
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }
}

//! 工具执行器
//!
//! 持有 ToolRegistry 与单次调用超时；超时返回 ToolError::Timeout。每次调用输出一行 JSON 审计日志。

use std::time::{Duration, Instant};

use tokio::time::timeout;

use crate::tools::{ToolError, ToolInfo, ToolRegistry};

const INPUT_PREVIEW_CHARS: usize = 200;

pub struct ToolExecutor {
    registry: ToolRegistry,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self::with_timeout(registry, Duration::from_secs(timeout_secs))
    }

    pub fn with_timeout(registry: ToolRegistry, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    pub async fn execute(&self, tool_name: &str, input: &str) -> Result<String, ToolError> {
        let start = Instant::now();
        let result = timeout(self.timeout, self.registry.execute(tool_name, input)).await;

        let outcome = match &result {
            Ok(Ok(_)) => "ok",
            Ok(Err(ToolError::NotFound(_))) => "not_found",
            Ok(Err(_)) => "error",
            Err(_) => "timeout",
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": outcome == "ok",
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "input_preview": input_preview(input),
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        match result {
            Ok(inner) => inner,
            Err(_) => Err(ToolError::Timeout {
                name: tool_name.to_string(),
                secs: self.timeout.as_secs(),
            }),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.registry.contains(name)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }

    pub fn tool_infos(&self) -> Vec<ToolInfo> {
        self.registry.tool_infos()
    }
}

fn input_preview(input: &str) -> String {
    if input.chars().count() > INPUT_PREVIEW_CHARS {
        format!("{}...", input.chars().take(INPUT_PREVIEW_CHARS).collect::<String>())
    } else {
        input.to_string()
    }
}

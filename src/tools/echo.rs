//! Echo 工具（测试用）

use async_trait::async_trait;

use crate::tools::Tool;

/// 回显输入；输入为 `{"text": "..."}` 时回显 text 字段
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo the input text back (for testing)."
    }

    async fn execute(&self, input: &str) -> Result<String, String> {
        let text = serde_json::from_str::<serde_json::Value>(input)
            .ok()
            .and_then(|v| v.get("text").and_then(|t| t.as_str()).map(String::from));
        Ok(text.unwrap_or_else(|| input.to_string()))
    }
}

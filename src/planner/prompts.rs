//! 提示词构建：Think / 重试 / 恢复
//!
//! 重试提示把 schemars 生成的计划 JSON Schema 拼进去，配合上一轮失败原因要求模型严格按格式输出。

use std::collections::HashMap;

use schemars::{schema_for, JsonSchema};

use crate::planner::ActionKind;

/// 提示词中查询所在行的前缀（Mock 客户端据此回显查询）
pub const QUERY_LINE_PREFIX: &str = "Query: ";

/// 计划输出格式（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct PlanFormat {
    /// 对问题的分析，需提及查询中的关键词
    thought: String,
    /// 按顺序执行的步骤
    steps: Vec<StepFormat>,
}

#[allow(dead_code)]
#[derive(JsonSchema)]
struct StepFormat {
    action: ActionKind,
    /// tool_call: tool_name, input；retrieval_search: query, top_k；reason: prompt
    parameters: HashMap<String, serde_json::Value>,
    /// false 表示该步骤的结果即最终答案
    #[serde(rename = "continue")]
    should_continue: bool,
}

/// 计划格式的 JSON Schema 字符串
pub fn plan_schema_json() -> String {
    let schema = schema_for!(PlanFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

const PLAN_FORMAT_EXAMPLE: &str = r#"{
  "thought": "your analysis of the query",
  "steps": [
    {
      "action": "tool_call | retrieval_search | reason",
      "parameters": { "name": "value" },
      "continue": true
    }
  ]
}"#;

fn tool_list(tools: &[String]) -> String {
    if tools.is_empty() {
        "(none)".to_string()
    } else {
        tools.join(", ")
    }
}

/// 第一次思考的提示词
pub fn think_prompt(query: &str, iteration: usize, tools: &[String]) -> String {
    format!(
        "You are an autonomous task agent. Analyze the query and produce an execution plan.\n\n\
         Iteration: {iteration}\n\
         {QUERY_LINE_PREFIX}{query}\n\n\
         Available tools: {tools}\n\n\
         Respond with a JSON plan in this format:\n\n{PLAN_FORMAT_EXAMPLE}\n\n\
         Actions:\n\
         - tool_call: call a tool, parameters: tool_name, input\n\
         - retrieval_search: search the knowledge base, parameters: query, top_k\n\
         - reason: answer with the model directly, parameters: prompt\n\n\
         Set \"continue\" to false on the step whose result is the final answer.\n\
         Return only the JSON plan, nothing else.",
        tools = tool_list(tools),
    )
}

/// 上一次计划被拒绝后的重试提示词
pub fn retry_prompt(
    query: &str,
    iteration: usize,
    attempt: usize,
    tools: &[String],
    previous_error: &str,
) -> String {
    format!(
        "Your previous execution plan was rejected: {previous_error}\n\n\
         Analyze the query again and produce a corrected plan.\n\n\
         Iteration: {iteration}\n\
         Attempt: {attempt}\n\
         {QUERY_LINE_PREFIX}{query}\n\n\
         Available tools: {tools}\n\n\
         The plan must validate against this JSON Schema:\n\n{schema}\n\n\
         Requirements:\n\
         1. Output exactly one valid JSON object, no markdown and no commentary.\n\
         2. The thought must be detailed and mention the key words of the query.\n\
         3. Every step must carry all parameters its action requires.\n\
         4. Only use tools from the list above.",
        tools = tool_list(tools),
        schema = plan_schema_json(),
    )
}

/// 推理步骤失败后的恢复提示词：原始问题 + 全部执行历史
pub fn reason_recovery_prompt(original_prompt: &str, history: &[String]) -> String {
    format!(
        "The previous reasoning attempt failed. Reconsider using the execution history below.\n\n\
         Execution history: {}\n\n\
         Original question: {original_prompt}\n\n\
         Give your best-effort answer.",
        history_line(history),
    )
}

/// 默认恢复提示词：错误信息 + 执行历史
pub fn default_recovery_prompt(error: &str, history: &[String]) -> String {
    format!(
        "An error occurred during execution: {error}\n\n\
         Execution history: {}\n\n\
         Based on the information available, give a reasonable answer or solution.",
        history_line(history),
    )
}

fn history_line(history: &[String]) -> String {
    if history.is_empty() {
        "(empty)".to_string()
    } else {
        history.join("; ")
    }
}

//! 计划解析：宽松提取 + 严格校验
//!
//! 先尝试把整段模型输出直接解码为计划 JSON；失败时查找围栏代码块（优先 ```json，其次任意 ```）
//! 并解码其内部。解码成功后做结构校验：thought 非空、至少一个步骤、动作已知、必需参数齐全。

use serde::Deserialize;

use crate::core::AgentError;
use crate::planner::{ActionKind, Parameters, Plan, Step};

const FENCE: &str = "```";
const JSON_FENCE: &str = "```json";

/// 模型输出的原始形态（字段均可缺省，缺省值留给校验阶段报错）
#[derive(Debug, Deserialize)]
struct RawPlan {
    #[serde(default)]
    thought: String,
    #[serde(default)]
    steps: Vec<RawStep>,
}

#[derive(Debug, Deserialize)]
struct RawStep {
    #[serde(default)]
    action: String,
    #[serde(default)]
    parameters: Option<Parameters>,
    #[serde(default, rename = "continue", alias = "should_continue")]
    should_continue: bool,
}

/// 解析模型输出为已校验的 Plan
pub fn parse_plan(raw_text: &str) -> Result<Plan, AgentError> {
    let raw = decode(raw_text)?;
    validate(raw)
}

fn decode(raw_text: &str) -> Result<RawPlan, AgentError> {
    let direct_err = match serde_json::from_str::<RawPlan>(raw_text.trim()) {
        Ok(plan) => return Ok(plan),
        Err(e) => e,
    };

    let block = extract_fenced_block(raw_text).ok_or_else(|| {
        AgentError::Extraction(format!(
            "response is not a plan and contains no fenced block ({direct_err})"
        ))
    })?;

    serde_json::from_str::<RawPlan>(block.trim())
        .map_err(|e| AgentError::Extraction(format!("fenced block is not a valid plan: {e}")))
}

/// 提取围栏代码块内部文本：优先 ```json，其次第一个任意 ```（跳过语言标记行）；
/// 未找到结束围栏时取到文本末尾
pub fn extract_fenced_block(text: &str) -> Option<&str> {
    let start = match find_ignore_ascii_case(text, JSON_FENCE) {
        Some(idx) => idx + JSON_FENCE.len(),
        None => {
            let idx = text.find(FENCE)? + FENCE.len();
            // ```yaml / ```text 等语言标记占据首行
            match text[idx..].find('\n') {
                Some(nl) if !text[idx..idx + nl].trim_start().starts_with('{') => idx + nl + 1,
                _ => idx,
            }
        }
    };

    let rest = &text[start..];
    let end = rest.find(FENCE).unwrap_or(rest.len());
    let block = &rest[..end];
    if block.trim().is_empty() {
        None
    } else {
        Some(block)
    }
}

fn find_ignore_ascii_case(haystack: &str, needle: &str) -> Option<usize> {
    let needle = needle.as_bytes();
    haystack
        .as_bytes()
        .windows(needle.len())
        .position(|w| w.eq_ignore_ascii_case(needle))
}

fn validate(raw: RawPlan) -> Result<Plan, AgentError> {
    if raw.thought.trim().is_empty() {
        return Err(AgentError::validation("plan is missing a thought"));
    }
    if raw.steps.is_empty() {
        return Err(AgentError::validation("plan must contain at least one step"));
    }

    let mut steps = Vec::with_capacity(raw.steps.len());
    for (i, raw_step) in raw.steps.into_iter().enumerate() {
        let n = i + 1;
        if raw_step.action.trim().is_empty() {
            return Err(AgentError::step_validation(n, "missing action"));
        }
        let action = ActionKind::from_wire(&raw_step.action).ok_or_else(|| {
            AgentError::UnknownAction {
                step: n,
                action: raw_step.action.clone(),
            }
        })?;
        let parameters = raw_step.parameters.unwrap_or_default();
        if let Some(missing) = action
            .required_params()
            .iter()
            .find(|key| !parameters.contains(key))
        {
            return Err(AgentError::step_validation(
                n,
                format!("{action} step is missing required parameter '{missing}'"),
            ));
        }
        steps.push(Step::new(action, parameters, raw_step.should_continue));
    }

    Ok(Plan {
        thought: raw.thought,
        steps,
    })
}

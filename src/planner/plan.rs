//! 执行计划数据模型：Plan / Step / ActionKind 与带类型的参数值
//!
//! 计划由模型输出解析而来，校验通过后只读；参数表使用 ParamValue（字符串/数字/布尔/数组/对象），
//! 取值通过带类型的访问器完成，类型不符时显式返回错误而不是静默转换。

use std::collections::BTreeMap;
use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// 步骤动作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// 调用已注册工具，参数：tool_name, input
    ToolCall,
    /// 检索后端语义搜索，参数：query（可选 top_k）
    RetrievalSearch,
    /// 直接交给模型推理，参数：prompt
    Reason,
}

impl ActionKind {
    /// 计划 JSON 中 action 字段的取值（含历史别名）
    pub fn from_wire(action: &str) -> Option<Self> {
        match action.trim() {
            "tool_call" | "search_tool" => Some(Self::ToolCall),
            "retrieval_search" | "rag_search" => Some(Self::RetrievalSearch),
            "reason" => Some(Self::Reason),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ToolCall => "tool_call",
            Self::RetrievalSearch => "retrieval_search",
            Self::Reason => "reason",
        }
    }

    /// 该动作必须携带的参数名
    pub fn required_params(&self) -> &'static [&'static str] {
        match self {
            Self::ToolCall => &["tool_name", "input"],
            Self::RetrievalSearch => &["query"],
            Self::Reason => &["prompt"],
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JSON 风格的参数值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<ParamValue>),
    Object(BTreeMap<String, ParamValue>),
}

impl ParamValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<f64> for ParamValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<bool> for ParamValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// 参数取值失败
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParamError {
    #[error("missing parameter '{0}'")]
    Missing(String),
    #[error("parameter '{key}' must be {expected}, got {actual}")]
    TypeMismatch {
        key: String,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("parameter '{0}' must not be empty")]
    Empty(String),
}

/// 步骤参数表
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Parameters(BTreeMap<String, ParamValue>);

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.0.get(key)
    }

    /// 取字符串参数；缺失或类型不符均返回错误
    pub fn str(&self, key: &str) -> Result<&str, ParamError> {
        let value = self
            .0
            .get(key)
            .ok_or_else(|| ParamError::Missing(key.to_string()))?;
        value.as_str().ok_or_else(|| ParamError::TypeMismatch {
            key: key.to_string(),
            expected: "string",
            actual: value.type_name(),
        })
    }

    /// 取非空字符串参数（去除首尾空白后判断）
    pub fn non_empty_str(&self, key: &str) -> Result<&str, ParamError> {
        let s = self.str(key)?;
        if s.trim().is_empty() {
            return Err(ParamError::Empty(key.to_string()));
        }
        Ok(s)
    }

    /// 取可选数字参数：不存在为 Ok(None)，存在但非数字为错误
    pub fn opt_f64(&self, key: &str) -> Result<Option<f64>, ParamError> {
        match self.0.get(key) {
            None | Some(ParamValue::Null) => Ok(None),
            Some(v) => v.as_f64().map(Some).ok_or_else(|| ParamError::TypeMismatch {
                key: key.to_string(),
                expected: "number",
                actual: v.type_name(),
            }),
        }
    }
}

/// 计划中的单个步骤
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Step {
    pub action: ActionKind,
    pub parameters: Parameters,
    /// 执行后读取一次：true 表示继续下一步/下一轮
    #[serde(rename = "continue")]
    pub should_continue: bool,
}

impl Step {
    pub fn new(action: ActionKind, parameters: Parameters, should_continue: bool) -> Self {
        Self {
            action,
            parameters,
            should_continue,
        }
    }
}

/// 已校验的执行计划：thought 非空，至少一个步骤
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Plan {
    pub thought: String,
    pub steps: Vec<Step>,
}

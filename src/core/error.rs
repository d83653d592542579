//! 运行错误分类与恢复失败原因
//!
//! AgentError 对应对外可见的错误类型（kind() 给出分类名）；BackendError 汇总三类外部后端的失败，
//! 执行阶段的 BackendError 交给 RecoveryEngine 处理，只有恢复失败才会向调用方传播。

use std::time::Duration;

use thiserror::Error;

use crate::llm::LlmError;
use crate::planner::ParamError;
use crate::retrieval::RetrievalError;
use crate::tools::ToolError;

/// 一次运行可能返回的错误（步骤编号均从 1 开始）
#[derive(Error, Debug)]
pub enum AgentError {
    /// 模型输出中找不到可解码的结构
    #[error("extraction error: {0}")]
    Extraction(String),

    /// 结构已解码但语义不完整或与查询无关
    #[error("validation error: {}", validation_message(.step, .reason))]
    Validation { step: Option<usize>, reason: String },

    #[error("unknown action '{action}' at step {step}")]
    UnknownAction { step: usize, action: String },

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("step {step} failed: {original}; recovery failed: {recovery}")]
    RecoveryFailed {
        step: usize,
        original: BackendError,
        #[source]
        recovery: RecoveryError,
    },

    #[error("iteration budget exceeded: no final answer after {0} iterations")]
    IterationBudgetExceeded(usize),

    #[error("run timed out after {0:?}")]
    Timeout(Duration),
}

fn validation_message(step: &Option<usize>, reason: &str) -> String {
    match step {
        Some(n) => format!("step {n}: {reason}"),
        None => reason.to_string(),
    }
}

impl AgentError {
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            step: None,
            reason: reason.into(),
        }
    }

    pub fn step_validation(step: usize, reason: impl Into<String>) -> Self {
        Self::Validation {
            step: Some(step),
            reason: reason.into(),
        }
    }

    /// 错误分类名
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Extraction(_) => "ExtractionError",
            Self::Validation { .. } => "ValidationError",
            Self::UnknownAction { .. } => "UnknownActionError",
            Self::Backend(_) => "BackendError",
            Self::RecoveryFailed { .. } => "RecoveryFailedError",
            Self::IterationBudgetExceeded(_) => "IterationBudgetExceededError",
            Self::Timeout(_) => "TimeoutError",
        }
    }

    /// Think 阶段可通过重新提示重试的错误（计划被拒绝）
    pub fn is_plan_rejection(&self) -> bool {
        matches!(
            self,
            Self::Extraction(_) | Self::Validation { .. } | Self::UnknownAction { .. }
        )
    }
}

/// 外部后端调用失败
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("model generation failed: {0}")]
    Model(#[from] LlmError),

    #[error("tool call failed: {0}")]
    Tool(#[from] ToolError),

    #[error("retrieval failed: {0}")]
    Retrieval(#[from] RetrievalError),

    #[error("{0} backend not configured")]
    NotConfigured(&'static str),
}

/// 恢复策略自身失败的原因
#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error("all {attempts} alternative inputs failed for tool '{tool}' (last: {last})")]
    ToolAlternativesExhausted {
        tool: String,
        attempts: usize,
        last: String,
    },

    #[error("all {attempts} alternative queries failed or returned no results")]
    QueryAlternativesExhausted { attempts: usize },

    #[error("recovery generation failed: {0}")]
    Model(#[from] LlmError),

    #[error("{0} backend not configured, cannot recover")]
    NotConfigured(&'static str),

    #[error("invalid step parameters: {0}")]
    Params(#[from] ParamError),
}

//! 运行状态：对外事件使用的阶段枚举与单次运行内的迭代状态

use std::fmt;

use serde::{Deserialize, Serialize};

/// 引擎阶段（事件 status 字段）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Thinking,
    Planning,
    Executing,
    Completed,
    Error,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Thinking => "thinking",
            Self::Planning => "planning",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    /// Completed / Error 为终态，每次运行恰好出现一次
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单次 execute 内的迭代状态，随调用结束销毁
#[derive(Debug, Clone)]
pub struct IterationState {
    pub iteration_count: usize,
    /// 本轮提示词中的查询（首轮为目标，之后为上一轮结果）；相关性门限以此为准
    pub current_query: String,
    /// 每个完成步骤的结果，跨迭代累积
    pub execution_history: Vec<String>,
}

impl IterationState {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            current_query: goal.into(),
            iteration_count: 0,
            execution_history: Vec::new(),
        }
    }

    /// 进入下一轮，返回轮次（从 1 开始）
    pub fn begin_iteration(&mut self) -> usize {
        self.iteration_count += 1;
        self.iteration_count
    }
}

/// Execute 阶段的结果
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub result: String,
    pub should_continue: bool,
}

//! 计划层：数据模型、解析校验、相关性门限、提示词

pub mod parser;
pub mod plan;
pub mod prompts;
pub mod relevance;

pub use parser::{extract_fenced_block, parse_plan};
pub use plan::{ActionKind, ParamError, ParamValue, Parameters, Plan, Step};
pub use relevance::RelevanceGate;

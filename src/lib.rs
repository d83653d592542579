//! aigent - Rust 自主任务执行引擎
//!
//! 模块划分：
//! - **planner**: 计划数据模型、解析校验、提示词、相关性门限
//! - **core**: Plan-Execute 引擎、错误分类、错误恢复、运行状态、构建器
//! - **broker**: 事件代理（单任务 actor）、订阅与事件流编码
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock）及模型注册表
//! - **tools**: 工具注册表与执行器（超时 + 审计日志），内置 echo、calculator
//! - **retrieval**: 检索抽象与内存实现（中英文混合分词）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **observability**: 日志初始化

pub mod broker;
pub mod config;
pub mod core;
pub mod llm;
pub mod observability;
pub mod planner;
pub mod retrieval;
pub mod tools;

pub use crate::core::{AgentError, Backends, Engine, EngineConfig};

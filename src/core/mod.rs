//! 核心编排层：错误分类、运行状态、错误恢复、Plan-Execute 引擎与构建器

pub mod builder;
pub mod engine;
pub mod error;
pub mod recovery;
pub mod state;

pub use builder::{create_engine_builder, EngineBuilder, EngineComponents};
pub use engine::{Backends, Engine, EngineConfig};
pub use error::{AgentError, BackendError, RecoveryError};
pub use recovery::{RecoveryConfig, RecoveryEngine, RecoveryStrategy};
pub use state::{AgentStatus, IterationState, StepOutcome};

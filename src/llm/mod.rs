//! LLM 层：客户端抽象、OpenAI 兼容实现、Mock 与模型注册表

pub mod mock;
pub mod openai;
pub mod registry;
pub mod traits;

pub use mock::MockLlmClient;
pub use openai::OpenAiClient;
pub use registry::{ModelFactory, ModelRegistry, ModelSpec, RegistryError};
pub use traits::{LlmClient, LlmError};

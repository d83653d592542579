//! 工具层：Tool trait、注册表、带超时与审计的执行器、内置工具

pub mod calculator;
pub mod echo;
pub mod executor;
pub mod registry;

pub use calculator::CalculatorTool;
pub use echo::EchoTool;
pub use executor::ToolExecutor;
pub use registry::{Tool, ToolError, ToolInfo, ToolRegistry};

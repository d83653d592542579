//! 事件代理：把引擎的阶段事件扇出给所有订阅者
//!
//! - event：AgentEvent 与 SseFrame
//! - sse：事件流文本编码 / 解码
//! - hub：EventBroker 后台任务与 Subscription

pub mod event;
pub mod hub;
pub mod sse;

pub use event::{AgentEvent, SseFrame, AGENT_EVENT_NAME};
pub use hub::{BrokerConfig, BrokerError, EventBroker, Frame, Subscription};

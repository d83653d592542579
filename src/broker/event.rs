//! 事件与推送帧
//!
//! AgentEvent 是引擎每次阶段切换产出的记录；SseFrame 是它在事件流上的文本帧形态
//! （id / event / data / retry），data 为事件的单行 JSON。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::AgentStatus;

/// 引擎事件在流上的 event 名
pub const AGENT_EVENT_NAME: &str = "agent";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub status: AgentStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl AgentEvent {
    pub fn new(id: impl Into<String>, status: AgentStatus, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            timestamp: Utc::now(),
            status,
            message: message.into(),
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// 一帧事件流记录
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SseFrame {
    pub id: Option<String>,
    pub event: Option<String>,
    pub data: String,
    pub retry: Option<u64>,
}

impl SseFrame {
    pub fn new(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self
    }

    pub fn with_retry(mut self, retry_ms: Option<u64>) -> Self {
        self.retry = retry_ms;
        self
    }

    /// 引擎事件帧：id 为 broker 序号，data 为事件 JSON
    pub fn from_event(seq: u64, event: &AgentEvent, retry_ms: Option<u64>) -> serde_json::Result<Self> {
        Ok(Self::new(serde_json::to_string(event)?)
            .with_id(seq.to_string())
            .with_event(AGENT_EVENT_NAME)
            .with_retry(retry_ms))
    }

    /// data 按 JSON 解析
    pub fn json(&self) -> serde_json::Result<Value> {
        serde_json::from_str(&self.data)
    }

    /// data 按 AgentEvent 解析
    pub fn agent_event(&self) -> serde_json::Result<AgentEvent> {
        serde_json::from_str(&self.data)
    }
}

//! 事件代理：单一协调任务持有订阅者集合
//!
//! 所有操作（注册 / 注销 / 广播 / 定向发送 / 查询 / 关闭）都作为消息进入同一个有界队列，
//! 由后台任务按 FIFO 顺序处理；查询通过 oneshot 应答，不另设锁。
//! 每个订阅者有独立的有界出站队列，队列满时该事件只对该订阅者丢弃，发布方从不阻塞。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::Stream;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::broker::{sse, AgentEvent, SseFrame};
use crate::core::AgentStatus;

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// 每个订阅者出站队列容量
    pub client_buffer: usize,
    /// 代理输入队列容量
    pub queue_capacity: usize,
    /// 订阅最长存活时间
    pub subscription_ttl: Duration,
    /// 事件帧的 retry 字段（毫秒）
    pub retry_ms: Option<u64>,
    /// 文本流空闲时插入保活注释的间隔
    pub keep_alive: Option<Duration>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            client_buffer: 100,
            queue_capacity: 1000,
            subscription_ttl: Duration::from_secs(30 * 60),
            retry_ms: Some(5000),
            keep_alive: Some(Duration::from_secs(15)),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BrokerError {
    #[error("event broker is shut down")]
    Closed,
    #[error("client id must not be empty")]
    InvalidClientId,
}

/// 编码后的一帧文本
pub type Frame = Arc<str>;

enum Command {
    Register {
        client_id: String,
        token: u64,
        tx: mpsc::Sender<Frame>,
        ack: oneshot::Sender<()>,
    },
    Unregister {
        client_id: String,
        /// None 表示无条件注销
        token: Option<u64>,
    },
    Publish(AgentEvent),
    SendTo {
        client_id: String,
        event: AgentEvent,
        ack: oneshot::Sender<bool>,
    },
    Count(oneshot::Sender<usize>),
    ClientIds(oneshot::Sender<Vec<String>>),
    Shutdown(oneshot::Sender<()>),
}

struct Client {
    token: u64,
    tx: mpsc::Sender<Frame>,
}

/// 代理句柄，可廉价克隆；后台任务在 spawn 时启动
#[derive(Clone)]
pub struct EventBroker {
    tx: mpsc::Sender<Command>,
    config: BrokerConfig,
    next_token: Arc<AtomicU64>,
}

impl EventBroker {
    /// 启动后台任务（需在 tokio 运行时内调用）
    pub fn spawn(config: BrokerConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        tokio::spawn(run(rx, config.retry_ms));
        Self {
            tx,
            config,
            next_token: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// 订阅事件流；同名订阅会替换旧订阅（旧流随之结束）
    pub async fn subscribe(&self, client_id: impl Into<String>) -> Result<Subscription, BrokerError> {
        self.subscribe_with_ttl(client_id, self.config.subscription_ttl).await
    }

    pub async fn subscribe_with_ttl(
        &self,
        client_id: impl Into<String>,
        ttl: Duration,
    ) -> Result<Subscription, BrokerError> {
        let client_id = client_id.into();
        if client_id.trim().is_empty() {
            return Err(BrokerError::InvalidClientId);
        }
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (client_tx, client_rx) = mpsc::channel(self.config.client_buffer.max(1));
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(Command::Register {
                client_id: client_id.clone(),
                token,
                tx: client_tx,
                ack: ack_tx,
            })
            .await
            .map_err(|_| BrokerError::Closed)?;
        ack_rx.await.map_err(|_| BrokerError::Closed)?;

        let deadline = Instant::now() + ttl;
        let cancel = CancellationToken::new();
        tokio::spawn(expire(
            self.tx.clone(),
            client_id.clone(),
            token,
            deadline,
            cancel.clone(),
        ));

        Ok(Subscription {
            client_id,
            token,
            rx: client_rx,
            deadline,
            cancel,
            broker_tx: self.tx.clone(),
            unregistered: false,
        })
    }

    /// 无条件注销某个订阅者
    pub async fn unsubscribe(&self, client_id: &str) {
        let _ = self
            .tx
            .send(Command::Unregister {
                client_id: client_id.to_string(),
                token: None,
            })
            .await;
    }

    /// 以生成的 id 发布事件；返回是否进入代理队列
    pub fn publish(&self, status: AgentStatus, message: impl Into<String>, payload: Option<Value>) -> bool {
        let mut event = AgentEvent::new(format!("evt_{}", uuid::Uuid::new_v4().simple()), status, message);
        event.payload = payload;
        self.publish_event(event)
    }

    /// 发布现成事件；代理队列满或已关闭时丢弃，从不阻塞
    pub fn publish_event(&self, event: AgentEvent) -> bool {
        match self.tx.try_send(Command::Publish(event)) {
            Ok(()) => true,
            Err(TrySendError::Full(Command::Publish(event))) => {
                tracing::warn!(event_id = %event.id, "broker queue full, event dropped");
                false
            }
            Err(_) => {
                tracing::debug!("broker closed, event dropped");
                false
            }
        }
    }

    /// 只发给一个订阅者；不存在或其队列已满时返回 false
    pub async fn send_to(&self, client_id: &str, event: AgentEvent) -> bool {
        let (ack, rx) = oneshot::channel();
        let cmd = Command::SendTo {
            client_id: client_id.to_string(),
            event,
            ack,
        };
        if self.tx.send(cmd).await.is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// 当前订阅者数量（已关闭时为 0）
    pub async fn client_count(&self) -> usize {
        let (ack, rx) = oneshot::channel();
        if self.tx.send(Command::Count(ack)).await.is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// 当前订阅者 id（排序）
    pub async fn client_ids(&self) -> Vec<String> {
        let (ack, rx) = oneshot::channel();
        if self.tx.send(Command::ClientIds(ack)).await.is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// 断开全部订阅者并停止接受新订阅；可重复调用
    pub async fn shutdown(&self) {
        let (ack, rx) = oneshot::channel();
        if self.tx.send(Command::Shutdown(ack)).await.is_ok() {
            let _ = rx.await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// 订阅的到期计时：不依赖订阅者读取，到期或取消后由代理侧注销
///
/// 注销带注册令牌，同名新订阅不受影响；重复注销无副作用。
async fn expire(
    tx: mpsc::Sender<Command>,
    client_id: String,
    token: u64,
    deadline: Instant,
    cancel: CancellationToken,
) {
    tokio::select! {
        _ = tokio::time::sleep_until(deadline) => {
            tracing::debug!(client_id = %client_id, "subscription ttl expired");
        }
        _ = cancel.cancelled() => {}
        _ = tx.closed() => return,
    }
    let _ = tx
        .send(Command::Unregister {
            client_id,
            token: Some(token),
        })
        .await;
}

async fn run(mut rx: mpsc::Receiver<Command>, retry_ms: Option<u64>) {
    let mut clients: HashMap<String, Client> = HashMap::new();
    let mut seq: u64 = 0;

    while let Some(cmd) = rx.recv().await {
        match cmd {
            Command::Register {
                client_id,
                token,
                tx,
                ack,
            } => {
                let connected = connected_frame(&client_id);
                let _ = tx.try_send(connected);
                if clients.insert(client_id.clone(), Client { token, tx }).is_some() {
                    tracing::info!(client_id = %client_id, "subscription replaced");
                } else {
                    tracing::info!(client_id = %client_id, total = clients.len(), "client subscribed");
                }
                let _ = ack.send(());
            }
            Command::Unregister { client_id, token } => {
                let matches = clients
                    .get(&client_id)
                    .is_some_and(|c| token.map_or(true, |t| t == c.token));
                if matches {
                    clients.remove(&client_id);
                    tracing::info!(client_id = %client_id, total = clients.len(), "client unsubscribed");
                }
            }
            Command::Publish(event) => {
                seq += 1;
                let Some(frame) = event_frame(seq, &event, retry_ms) else {
                    continue;
                };
                let mut gone = Vec::new();
                for (id, client) in &clients {
                    match client.tx.try_send(Arc::clone(&frame)) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            tracing::warn!(client_id = %id, event_id = %event.id, "client queue full, event dropped");
                        }
                        Err(TrySendError::Closed(_)) => gone.push(id.clone()),
                    }
                }
                for id in gone {
                    clients.remove(&id);
                    tracing::debug!(client_id = %id, "removed disconnected client");
                }
            }
            Command::SendTo {
                client_id,
                event,
                ack,
            } => {
                let delivered = match clients.get(&client_id) {
                    Some(client) => {
                        seq += 1;
                        event_frame(seq, &event, retry_ms)
                            .is_some_and(|frame| client.tx.try_send(frame).is_ok())
                    }
                    None => false,
                };
                let _ = ack.send(delivered);
            }
            Command::Count(ack) => {
                let _ = ack.send(clients.len());
            }
            Command::ClientIds(ack) => {
                let mut ids: Vec<String> = clients.keys().cloned().collect();
                ids.sort();
                let _ = ack.send(ids);
            }
            Command::Shutdown(ack) => {
                tracing::info!(clients = clients.len(), "event broker shutting down");
                // 先关闭输入队列，应答之后的发送一律失败
                rx.close();
                clients.clear();
                let _ = ack.send(());
                break;
            }
        }
    }
}

fn event_frame(seq: u64, event: &AgentEvent, retry_ms: Option<u64>) -> Option<Frame> {
    match SseFrame::from_event(seq, event, retry_ms) {
        Ok(frame) => Some(Arc::from(sse::encode(&frame))),
        Err(e) => {
            tracing::error!(event_id = %event.id, error = %e, "failed to serialize event");
            None
        }
    }
}

fn connected_frame(client_id: &str) -> Frame {
    let data = serde_json::json!({
        "clientId": client_id,
        "timestamp": chrono::Utc::now().timestamp(),
        "message": "connected to event stream",
    });
    let frame = SseFrame::new(data.to_string())
        .with_id("connect")
        .with_event("connected");
    Arc::from(sse::encode(&frame))
}

/// 一个订阅者的事件流
///
/// TTL 到期、取消令牌触发或被 drop 时自动注销（到期与取消不需要订阅者正在读取）；
/// 注销带注册令牌，不会误删同名的新订阅。
pub struct Subscription {
    client_id: String,
    token: u64,
    rx: mpsc::Receiver<Frame>,
    deadline: Instant,
    cancel: CancellationToken,
    broker_tx: mpsc::Sender<Command>,
    unregistered: bool,
}

impl Subscription {
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// 对端断开时由调用方触发
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// 下一帧编码后的文本；流结束（TTL、取消、被替换、代理关闭）时返回 None
    pub async fn recv(&mut self) -> Option<Frame> {
        if self.unregistered {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                self.unregister();
                None
            }
            _ = tokio::time::sleep_until(self.deadline) => {
                self.unregister();
                None
            }
            frame = self.rx.recv() => {
                if frame.is_none() {
                    self.unregistered = true;
                }
                frame
            }
        }
    }

    /// 下一帧（已解码）
    pub async fn recv_frame(&mut self) -> Option<SseFrame> {
        let text = self.recv().await?;
        sse::decode(&text).into_iter().next()
    }

    /// 转为文本流（HTTP body 用）；给定间隔时，每隔一段时间插入一条保活注释
    pub fn into_stream(self, keep_alive: Option<Duration>) -> impl Stream<Item = Frame> + Send {
        let ticker = keep_alive.map(|period| {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });
        let comment: Frame = Arc::from(sse::KEEP_ALIVE);
        futures_util::stream::unfold((self, ticker), move |(mut sub, mut ticker)| {
            let comment = Arc::clone(&comment);
            async move {
                let next = match ticker.as_mut() {
                    Some(ticker) => tokio::select! {
                        frame = sub.recv() => frame,
                        _ = ticker.tick() => Some(comment),
                    },
                    None => sub.recv().await,
                };
                next.map(|frame| (frame, (sub, ticker)))
            }
        })
    }

    fn unregister(&mut self) {
        if self.unregistered {
            return;
        }
        self.unregistered = true;
        self.rx.close();
        // 同时结束到期计时任务
        self.cancel.cancel();
        let cmd = Command::Unregister {
            client_id: self.client_id.clone(),
            token: Some(self.token),
        };
        if let Err(TrySendError::Full(cmd)) = self.broker_tx.try_send(cmd) {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                let tx = self.broker_tx.clone();
                handle.spawn(async move {
                    let _ = tx.send(cmd).await;
                });
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unregister();
    }
}

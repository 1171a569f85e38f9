use std::collections::HashMap;

use async_trait::async_trait;
use metrics::gauge;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use feedline_domain::{EventSink, UserEvent};
use feedline_errors::{FeedError, FeedResult};

pub type ConnectionId = Uuid;

/// 注册表持有的连接写端
///
/// 写入只是放进该连接的发送缓冲，实际网络写由会话自己的写任务完成。
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    sender: mpsc::Sender<String>,
}

impl ConnectionHandle {
    pub fn new(sender: mpsc::Sender<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

/// 一次投递的结果，用户离线时全部为0
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
}

enum RegistryCommand {
    Register {
        user_id: i64,
        handle: ConnectionHandle,
    },
    Unregister {
        user_id: i64,
        connection_id: ConnectionId,
    },
    Deliver {
        user_id: i64,
        message: String,
        reply: oneshot::Sender<DeliveryReport>,
    },
    ConnectionCount {
        user_id: i64,
        reply: oneshot::Sender<usize>,
    },
    OnlineUsers {
        reply: oneshot::Sender<Vec<i64>>,
    },
}

/// 用户ID到长连接的映射，只由actor任务修改
pub struct ConnectionRegistry {
    connections: HashMap<i64, Vec<ConnectionHandle>>,
    commands: mpsc::Receiver<RegistryCommand>,
}

impl ConnectionRegistry {
    /// 启动注册表actor，收到停止信号或所有句柄被释放后退出
    pub fn spawn(buffer: usize, shutdown: watch::Receiver<bool>) -> (RegistryHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let registry = Self {
            connections: HashMap::new(),
            commands: rx,
        };
        let handle = tokio::spawn(registry.run(shutdown));
        (RegistryHandle { commands: tx }, handle)
    }

    async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("连接注册表已启动");
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
                _ = shutdown.changed() => break,
            }
        }
        let remaining: usize = self.connections.values().map(Vec::len).sum();
        self.connections.clear();
        gauge!("feedline_gateway_connections").set(0.0);
        info!("连接注册表已停止, 释放 {} 个连接", remaining);
    }

    fn handle(&mut self, command: RegistryCommand) {
        match command {
            RegistryCommand::Register { user_id, handle } => {
                debug!(user_id, connection = %handle.id, "注册连接");
                self.connections.entry(user_id).or_default().push(handle);
                self.report_size();
            }
            RegistryCommand::Unregister {
                user_id,
                connection_id,
            } => {
                if let Some(handles) = self.connections.get_mut(&user_id) {
                    handles.retain(|h| h.id != connection_id);
                    if handles.is_empty() {
                        self.connections.remove(&user_id);
                    }
                }
                debug!(user_id, connection = %connection_id, "注销连接");
                self.report_size();
            }
            RegistryCommand::Deliver {
                user_id,
                message,
                reply,
            } => {
                let _ = reply.send(self.deliver(user_id, &message));
            }
            RegistryCommand::ConnectionCount { user_id, reply } => {
                let _ = reply.send(self.connections.get(&user_id).map_or(0, Vec::len));
            }
            RegistryCommand::OnlineUsers { reply } => {
                let mut users: Vec<i64> = self.connections.keys().copied().collect();
                users.sort_unstable();
                let _ = reply.send(users);
            }
        }
    }

    fn deliver(&self, user_id: i64, message: &str) -> DeliveryReport {
        let Some(handles) = self.connections.get(&user_id) else {
            debug!(user_id, "用户不在线, 跳过投递");
            return DeliveryReport::default();
        };

        let mut report = DeliveryReport {
            attempted: handles.len(),
            ..Default::default()
        };
        for handle in handles {
            // 不在actor内等待慢连接；失败的连接由它自己的读循环负责注销
            match handle.sender.try_send(message.to_string()) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(user_id, connection = %handle.id, "写入连接失败, 跳过: {}", e);
                    report.failed += 1;
                }
            }
        }
        report
    }

    fn report_size(&self) {
        let total: usize = self.connections.values().map(Vec::len).sum();
        gauge!("feedline_gateway_connections").set(total as f64);
    }
}

/// 与注册表actor通信的句柄
#[derive(Debug, Clone)]
pub struct RegistryHandle {
    commands: mpsc::Sender<RegistryCommand>,
}

impl std::fmt::Debug for RegistryCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryCommand::Register { user_id, .. } => write!(f, "Register({user_id})"),
            RegistryCommand::Unregister { user_id, .. } => write!(f, "Unregister({user_id})"),
            RegistryCommand::Deliver { user_id, .. } => write!(f, "Deliver({user_id})"),
            RegistryCommand::ConnectionCount { user_id, .. } => write!(f, "ConnectionCount({user_id})"),
            RegistryCommand::OnlineUsers { .. } => f.write_str("OnlineUsers"),
        }
    }
}

impl RegistryHandle {
    async fn send(&self, command: RegistryCommand) -> FeedResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| FeedError::Shutdown("连接注册表已停止".to_string()))
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> RegistryCommand,
    ) -> FeedResult<T> {
        let (reply, response) = oneshot::channel();
        self.send(build(reply)).await?;
        response
            .await
            .map_err(|_| FeedError::Shutdown("连接注册表已停止".to_string()))
    }

    pub async fn register(&self, user_id: i64, handle: ConnectionHandle) -> FeedResult<()> {
        self.send(RegistryCommand::Register { user_id, handle }).await
    }

    pub async fn unregister(&self, user_id: i64, connection_id: ConnectionId) -> FeedResult<()> {
        self.send(RegistryCommand::Unregister {
            user_id,
            connection_id,
        })
        .await
    }

    /// 投递给用户的全部在线连接，用户离线不是错误
    pub async fn deliver(&self, user_id: i64, message: impl Into<String>) -> FeedResult<DeliveryReport> {
        let message = message.into();
        self.request(|reply| RegistryCommand::Deliver {
            user_id,
            message,
            reply,
        })
        .await
    }

    pub async fn connection_count(&self, user_id: i64) -> FeedResult<usize> {
        self.request(|reply| RegistryCommand::ConnectionCount { user_id, reply })
            .await
    }

    pub async fn online_users(&self) -> FeedResult<Vec<i64>> {
        self.request(|reply| RegistryCommand::OnlineUsers { reply }).await
    }
}

#[async_trait]
impl EventSink for RegistryHandle {
    async fn deliver(&self, event: UserEvent) -> FeedResult<()> {
        let report = RegistryHandle::deliver(self, event.user_id, event.message).await?;
        if report.attempted > 0 {
            debug!(
                user_id = event.user_id,
                event_type = event.event_type,
                delivered = report.delivered,
                failed = report.failed,
                "事件已投递"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spawn_registry() -> (RegistryHandle, watch::Sender<bool>, JoinHandle<()>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (handle, join) = ConnectionRegistry::spawn(16, shutdown_rx);
        (handle, shutdown_tx, join)
    }

    #[tokio::test]
    async fn test_offline_delivery_is_noop() {
        let (registry, _shutdown, _join) = spawn_registry();
        let report = registry.deliver(42, "hello").await.unwrap();
        assert_eq!(report, DeliveryReport::default());
        assert!(registry.online_users().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_multi_device_receives_same_message() {
        let (registry, _shutdown, _join) = spawn_registry();
        let (phone_tx, mut phone_rx) = mpsc::channel(4);
        let (laptop_tx, mut laptop_rx) = mpsc::channel(4);
        registry.register(7, ConnectionHandle::new(phone_tx)).await.unwrap();
        registry.register(7, ConnectionHandle::new(laptop_tx)).await.unwrap();

        let report = registry.deliver(7, "ping").await.unwrap();
        assert_eq!(report.attempted, 2);
        assert_eq!(report.delivered, 2);
        assert_eq!(phone_rx.recv().await.unwrap(), "ping");
        assert_eq!(laptop_rx.recv().await.unwrap(), "ping");
    }

    #[tokio::test]
    async fn test_failed_write_skips_but_keeps_connection() {
        let (registry, _shutdown, _join) = spawn_registry();
        let (dead_tx, dead_rx) = mpsc::channel(1);
        drop(dead_rx);
        let (live_tx, mut live_rx) = mpsc::channel(4);
        registry.register(3, ConnectionHandle::new(dead_tx)).await.unwrap();
        registry.register(3, ConnectionHandle::new(live_tx)).await.unwrap();

        let report = registry.deliver(3, "msg").await.unwrap();
        assert_eq!(report, DeliveryReport { attempted: 2, delivered: 1, failed: 1 });
        assert_eq!(live_rx.recv().await.unwrap(), "msg");

        // 只有会话自己注销时才移除连接
        assert_eq!(registry.connection_count(3).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_unregister_removes_only_that_connection() {
        let (registry, _shutdown, _join) = spawn_registry();
        let (a_tx, _a_rx) = mpsc::channel(4);
        let (b_tx, _b_rx) = mpsc::channel(4);
        let a = ConnectionHandle::new(a_tx);
        let a_id = a.id();
        registry.register(1, a).await.unwrap();
        registry.register(1, ConnectionHandle::new(b_tx)).await.unwrap();
        registry.register(2, ConnectionHandle::new(mpsc::channel(1).0)).await.unwrap();

        registry.unregister(1, a_id).await.unwrap();
        assert_eq!(registry.connection_count(1).await.unwrap(), 1);
        assert_eq!(registry.online_users().await.unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_shutdown_stops_actor() {
        let (registry, shutdown, join) = spawn_registry();
        shutdown.send(true).unwrap();
        join.await.unwrap();
        assert!(matches!(
            registry.deliver(1, "late").await.unwrap_err(),
            FeedError::Shutdown(_)
        ));
    }

    #[tokio::test]
    async fn test_event_sink_delivers_serialized_event() {
        let (registry, _shutdown, _join) = spawn_registry();
        let (tx, mut rx) = mpsc::channel(4);
        registry.register(5, ConnectionHandle::new(tx)).await.unwrap();

        let sink: &dyn EventSink = &registry;
        sink.deliver(UserEvent {
            user_id: 5,
            event_type: "post",
            message: r#"{"type":"post"}"#.to_string(),
        })
        .await
        .unwrap();
        sink.deliver(UserEvent {
            user_id: 6,
            event_type: "post",
            message: "offline".to_string(),
        })
        .await
        .unwrap();

        assert_eq!(rx.recv().await.unwrap(), r#"{"type":"post"}"#);
    }
}

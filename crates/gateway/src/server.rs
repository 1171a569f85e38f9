use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use feedline_config::GatewayConfig;
use feedline_errors::{FeedError, FeedResult};

use crate::connection::{ConnectionEvent, ConnectionStateMachine};
use crate::registry::{ConnectionHandle, RegistryHandle};

#[derive(Clone)]
struct GatewayState {
    registry: RegistryHandle,
    outbound_buffer: usize,
    idle_timeout: Duration,
    shutdown: watch::Receiver<bool>,
}

/// websocket推送网关
pub struct GatewayServer {
    config: GatewayConfig,
    registry: RegistryHandle,
}

impl GatewayServer {
    pub fn new(config: GatewayConfig, registry: RegistryHandle) -> Self {
        Self { config, registry }
    }

    /// 创建网关路由
    pub fn router(&self, shutdown: watch::Receiver<bool>) -> Router {
        let state = GatewayState {
            registry: self.registry.clone(),
            outbound_buffer: self.config.outbound_buffer.max(1),
            idle_timeout: Duration::from_secs(self.config.idle_timeout_seconds.max(1)),
            shutdown,
        };

        Router::new()
            .route("/health", get(health_check))
            .route("/ws/{user_id}", get(websocket_upgrade))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// 绑定配置中的监听地址
    pub async fn bind(&self) -> FeedResult<TcpListener> {
        let addr = self
            .config
            .socket_addr()
            .map_err(|e| FeedError::config_error(e.to_string()))?;
        TcpListener::bind(addr)
            .await
            .map_err(|e| FeedError::Network(format!("绑定网关地址 {addr} 失败: {e}")))
    }

    pub async fn serve(&self, shutdown: watch::Receiver<bool>) -> FeedResult<()> {
        let listener = self.bind().await?;
        self.serve_with_listener(listener, shutdown).await
    }

    /// 在已绑定的监听器上运行，收到停止信号后优雅退出
    pub async fn serve_with_listener(
        &self,
        listener: TcpListener,
        shutdown: watch::Receiver<bool>,
    ) -> FeedResult<()> {
        let local: Option<SocketAddr> = listener.local_addr().ok();
        info!("推送网关监听于 {:?}", local);

        let app = self.router(shutdown.clone());
        axum::serve(listener, app)
            .with_graceful_shutdown(wait_for_shutdown(shutdown))
            .await
            .map_err(|e| FeedError::Network(format!("推送网关运行失败: {e}")))?;

        info!("推送网关已停止");
        Ok(())
    }
}

async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            break;
        }
    }
}

async fn health_check(State(state): State<GatewayState>) -> Response {
    match state.registry.online_users().await {
        Ok(users) => Json(json!({
            "status": "ok",
            "online_users": users.len(),
        }))
        .into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "unavailable",
                "error": e.user_message(),
            })),
        )
            .into_response(),
    }
}

async fn websocket_upgrade(
    ws: WebSocketUpgrade,
    Path(user_id): Path<i64>,
    State(state): State<GatewayState>,
) -> Response {
    ws.on_upgrade(move |socket| run_session(socket, user_id, state))
}

async fn run_session(socket: WebSocket, user_id: i64, state: GatewayState) {
    let mut machine = ConnectionStateMachine::new();
    let (mut writer, mut reader) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(state.outbound_buffer);

    let handle = ConnectionHandle::new(outbound_tx);
    let connection_id = handle.id();
    if let Err(e) = state.registry.register(user_id, handle).await {
        warn!(user_id, "注册连接失败: {}", e);
        let _ = writer.send(Message::Close(None)).await;
        return;
    }
    if let Err(e) = machine.apply(ConnectionEvent::Registered) {
        warn!(user_id, "{}", e);
    }
    info!(user_id, connection = %connection_id, "连接已注册");

    let mut write_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if let Err(e) = writer.send(Message::Text(message.into())).await {
                debug!(user_id, "写入websocket失败: {}", e);
                break;
            }
        }
        let _ = writer.close().await;
    });

    let mut shutdown = state.shutdown.clone();
    loop {
        if *shutdown.borrow_and_update() {
            break;
        }

        let frame = tokio::select! {
            frame = tokio::time::timeout(state.idle_timeout, reader.next()) => frame,
            _ = shutdown.changed() => break,
        };

        let event = match frame {
            Err(_) => ConnectionEvent::IdleTimeout,
            Ok(None) | Ok(Some(Ok(Message::Close(_)))) => break,
            Ok(Some(Err(e))) => {
                debug!(user_id, "读取websocket失败: {}", e);
                break;
            }
            Ok(Some(Ok(Message::Text(text)))) => {
                debug!(user_id, "收到客户端消息: {}", text.as_str());
                ConnectionEvent::Activity
            }
            Ok(Some(Ok(_))) => ConnectionEvent::Activity,
        };

        match machine.apply(event) {
            Ok(next) => debug!(user_id, connection = %connection_id, "连接状态: {}", next),
            Err(e) => warn!(user_id, "{}", e),
        }
    }

    if let Err(e) = state.registry.unregister(user_id, connection_id).await {
        debug!(user_id, "注销连接失败: {}", e);
    }
    let _ = machine.apply(ConnectionEvent::Closed);
    // 注销后发送端已被释放，写任务会自行结束
    if tokio::time::timeout(Duration::from_secs(1), &mut write_task)
        .await
        .is_err()
    {
        write_task.abort();
    }
    info!(user_id, connection = %connection_id, "连接已关闭, 状态 {}", machine.state());
}

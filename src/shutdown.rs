use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tracing::{debug, info};

/// 优雅关闭管理器
///
/// 所有长时间运行的循环都持有同一个 `watch` 接收端，值变为 `true` 即开始退出。
#[derive(Clone)]
pub struct ShutdownManager {
    shutdown_tx: Arc<watch::Sender<bool>>,
    triggered: Arc<Mutex<bool>>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shutdown_tx: Arc::new(shutdown_tx),
            triggered: Arc::new(Mutex::new(false)),
        }
    }

    /// 订阅关闭信号，关闭之后订阅会立即看到 `true`
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// 触发关闭，重复调用无效果
    pub async fn shutdown(&self) {
        let mut triggered = self.triggered.lock().await;
        if *triggered {
            debug!("关闭管理器已经触发过关闭");
            return;
        }
        *triggered = true;

        debug!("发送关闭信号给 {} 个订阅者", self.shutdown_tx.receiver_count());
        self.shutdown_tx.send_replace(true);
        info!("关闭信号已发送");
    }

    pub async fn is_shutdown(&self) -> bool {
        *self.triggered.lock().await
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

/// 等待接收端看到关闭信号；发送端被释放也视为关闭
pub async fn wait_for(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_shutdown_manager_basic() {
        let manager = ShutdownManager::new();
        assert!(!manager.is_shutdown().await);

        let rx = manager.subscribe();
        manager.shutdown().await;

        assert!(timeout(Duration::from_millis(100), wait_for(rx)).await.is_ok());
        assert!(manager.is_shutdown().await);
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let manager = ShutdownManager::new();
        let receivers = vec![manager.subscribe(), manager.subscribe(), manager.subscribe()];

        manager.shutdown().await;

        for rx in receivers {
            assert!(timeout(Duration::from_millis(100), wait_for(rx)).await.is_ok());
        }
    }

    #[tokio::test]
    async fn test_subscribe_after_shutdown() {
        let manager = ShutdownManager::new();
        manager.shutdown().await;

        let rx = manager.subscribe();
        assert!(*rx.borrow());
        assert!(timeout(Duration::from_millis(100), wait_for(rx)).await.is_ok());
    }

    #[tokio::test]
    async fn test_double_shutdown() {
        let manager = ShutdownManager::new();
        manager.shutdown().await;
        manager.shutdown().await;
        assert!(manager.is_shutdown().await);
    }

    #[tokio::test]
    async fn test_waiter_blocks_until_shutdown() {
        let manager = ShutdownManager::new();
        let rx = manager.subscribe();
        let waiter = tokio::spawn(wait_for(rx));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        manager.shutdown().await;
        assert!(timeout(Duration::from_millis(100), waiter).await.is_ok());
    }
}

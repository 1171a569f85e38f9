use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::interval;
use tracing::{error, info, warn};

use feedline_domain::TaskBroker;
use feedline_errors::FeedResult;

/// 一轮清理的结果
#[derive(Debug, Clone, Default)]
pub struct CleanupReport {
    pub reclaimed: HashMap<String, u64>,
    pub duration: Duration,
}

impl CleanupReport {
    pub fn total(&self) -> u64 {
        self.reclaimed.values().sum()
    }
}

/// 孤儿任务清理服务
///
/// 周期性地把心跳过期消费者的未确认任务放回就绪队列。
pub struct QueueCleaner {
    broker: Arc<dyn TaskBroker>,
    queues: Vec<String>,
    period: Duration,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    cleanup_handle: Option<tokio::task::JoinHandle<()>>,
}

impl QueueCleaner {
    pub fn new(broker: Arc<dyn TaskBroker>, queues: Vec<String>, period: Duration) -> Self {
        Self {
            broker,
            queues,
            period,
            shutdown_tx: None,
            cleanup_handle: None,
        }
    }

    pub async fn start(&mut self) -> FeedResult<()> {
        if self.cleanup_handle.is_some() {
            return Ok(());
        }

        info!("启动队列清理服务, 周期: {:?}, 队列: {:?}", self.period, self.queues);

        let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel();
        self.shutdown_tx = Some(shutdown_tx);

        let broker = self.broker.clone();
        let queues = self.queues.clone();
        let period = self.period;

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            // 第一次tick立即完成，启动时先回收一次上次进程遗留的任务
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let report = Self::perform_cleanup(&broker, &queues).await;
                        if report.total() > 0 {
                            info!("本轮清理回收 {} 个任务, 耗时 {:?}", report.total(), report.duration);
                        }
                    }
                    _ = &mut shutdown_rx => {
                        info!("队列清理服务收到停止信号");
                        break;
                    }
                }
            }
        });

        self.cleanup_handle = Some(handle);
        Ok(())
    }

    pub async fn stop(&mut self) -> FeedResult<()> {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }

        if let Some(handle) = self.cleanup_handle.take() {
            if let Err(e) = handle.await {
                warn!("等待队列清理服务停止时出错: {}", e);
            }
        }

        info!("队列清理服务已停止");
        Ok(())
    }

    /// 立即执行一轮清理
    pub async fn cleanup_once(&self) -> CleanupReport {
        Self::perform_cleanup(&self.broker, &self.queues).await
    }

    async fn perform_cleanup(broker: &Arc<dyn TaskBroker>, queues: &[String]) -> CleanupReport {
        let started = Instant::now();
        let mut report = CleanupReport::default();

        for queue in queues {
            match broker.reclaim_orphans(queue).await {
                Ok(count) => {
                    report.reclaimed.insert(queue.clone(), count);
                }
                Err(e) => error!("回收队列 {} 的孤儿任务失败: {}", queue, e),
            }
        }

        report.duration = started.elapsed();
        report
    }
}

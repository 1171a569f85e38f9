use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::consumer_name;
use crate::metrics::QueueMetrics;
use feedline_domain::{ConsumerId, DeliveryReceipt, FetchedTask, QueueStats, TaskBroker};
use feedline_errors::{FeedError, FeedResult};

#[derive(Debug, Clone)]
struct StoredTask {
    id: String,
    payload: Vec<u8>,
}

#[derive(Debug)]
struct ConsumerState {
    unacked: Vec<StoredTask>,
    last_heartbeat: Instant,
}

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<StoredTask>,
    rejected: VecDeque<StoredTask>,
    consumers: HashMap<String, ConsumerState>,
}

impl QueueState {
    fn take_unacked(&mut self, receipt: &DeliveryReceipt) -> FeedResult<StoredTask> {
        let consumer = self
            .consumers
            .get_mut(&receipt.consumer.name)
            .ok_or_else(|| FeedError::not_found(format!("消费者 {} 未注册", receipt.consumer)))?;
        let position = consumer
            .unacked
            .iter()
            .position(|task| task.id == receipt.delivery_id)
            .ok_or_else(|| {
                FeedError::not_found(format!(
                    "投递 {} 不在消费者 {} 的未确认列表中",
                    receipt.delivery_id, receipt.consumer
                ))
            })?;
        Ok(consumer.unacked.remove(position))
    }

    fn release(&mut self, consumer: &str) -> u64 {
        match self.consumers.remove(consumer) {
            Some(state) => {
                let returned = state.unacked.len() as u64;
                self.ready.extend(state.unacked);
                returned
            }
            None => 0,
        }
    }
}

/// 进程内任务队列，语义与Redis实现一致
///
/// 时间使用 `tokio::time::Instant`，测试中可以暂停并推进时钟来模拟心跳过期。
#[derive(Debug)]
pub struct InMemoryTaskBroker {
    queues: Mutex<HashMap<String, QueueState>>,
    heartbeat_ttl: Duration,
    metrics: QueueMetrics,
}

impl Default for InMemoryTaskBroker {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

impl InMemoryTaskBroker {
    pub fn new(heartbeat_ttl: Duration) -> Self {
        info!("创建内存任务队列, 心跳过期时间: {:?}", heartbeat_ttl);
        Self {
            queues: Mutex::new(HashMap::new()),
            heartbeat_ttl,
            metrics: QueueMetrics::default(),
        }
    }

    pub fn metrics(&self) -> &QueueMetrics {
        &self.metrics
    }
}

#[async_trait]
impl TaskBroker for InMemoryTaskBroker {
    async fn publish(&self, queue: &str, payload: &[u8]) -> FeedResult<()> {
        let mut queues = self.queues.lock().await;
        queues.entry(queue.to_string()).or_default().ready.push_back(StoredTask {
            id: Uuid::new_v4().to_string(),
            payload: payload.to_vec(),
        });
        self.metrics.record_published(queue);
        debug!("任务已发布到内存队列: {}", queue);
        Ok(())
    }

    async fn register_consumer(&self, queue: &str, tag: &str) -> FeedResult<ConsumerId> {
        let name = consumer_name(tag);
        let mut queues = self.queues.lock().await;
        queues.entry(queue.to_string()).or_default().consumers.insert(
            name.clone(),
            ConsumerState {
                unacked: Vec::new(),
                last_heartbeat: Instant::now(),
            },
        );
        Ok(ConsumerId::new(queue, name))
    }

    async fn heartbeat(&self, consumer: &ConsumerId) -> FeedResult<()> {
        let mut queues = self.queues.lock().await;
        let queue = queues.entry(consumer.queue.clone()).or_default();
        match queue.consumers.get_mut(&consumer.name) {
            Some(state) => state.last_heartbeat = Instant::now(),
            None => {
                // 已被清理器回收的消费者仍在运行，重新加入消费者集合
                warn!("消费者 {} 已被回收，重新注册", consumer);
                queue.consumers.insert(
                    consumer.name.clone(),
                    ConsumerState {
                        unacked: Vec::new(),
                        last_heartbeat: Instant::now(),
                    },
                );
            }
        }
        Ok(())
    }

    async fn fetch(&self, consumer: &ConsumerId, limit: usize) -> FeedResult<Vec<FetchedTask>> {
        let mut queues = self.queues.lock().await;
        let queue = queues.entry(consumer.queue.clone()).or_default();
        if !queue.consumers.contains_key(&consumer.name) {
            return Err(FeedError::not_found(format!("消费者 {consumer} 未注册")));
        }

        let count = limit.min(queue.ready.len());
        let taken: Vec<StoredTask> = queue.ready.drain(..count).collect();
        if let Some(state) = queue.consumers.get_mut(&consumer.name) {
            state.unacked.extend(taken.iter().cloned());
        }

        if !taken.is_empty() {
            self.metrics.record_delivered(&consumer.queue, taken.len() as u64);
        }

        Ok(taken
            .into_iter()
            .map(|task| FetchedTask {
                receipt: DeliveryReceipt {
                    consumer: consumer.clone(),
                    delivery_id: task.id,
                    raw: Vec::new(),
                },
                payload: task.payload,
            })
            .collect())
    }

    async fn ack(&self, receipt: &DeliveryReceipt) -> FeedResult<()> {
        let mut queues = self.queues.lock().await;
        let queue = queues
            .get_mut(&receipt.consumer.queue)
            .ok_or_else(|| FeedError::UnknownQueue(receipt.consumer.queue.clone()))?;
        queue.take_unacked(receipt)?;
        self.metrics.record_acked(&receipt.consumer.queue);
        Ok(())
    }

    async fn reject(&self, receipt: &DeliveryReceipt) -> FeedResult<()> {
        let mut queues = self.queues.lock().await;
        let queue = queues
            .get_mut(&receipt.consumer.queue)
            .ok_or_else(|| FeedError::UnknownQueue(receipt.consumer.queue.clone()))?;
        let task = queue.take_unacked(receipt)?;
        queue.rejected.push_back(task);
        self.metrics.record_rejected(&receipt.consumer.queue);
        Ok(())
    }

    async fn requeue(&self, receipt: &DeliveryReceipt) -> FeedResult<()> {
        let mut queues = self.queues.lock().await;
        let queue = queues
            .get_mut(&receipt.consumer.queue)
            .ok_or_else(|| FeedError::UnknownQueue(receipt.consumer.queue.clone()))?;
        let task = queue.take_unacked(receipt)?;
        queue.ready.push_back(task);
        self.metrics.record_requeued(&receipt.consumer.queue);
        Ok(())
    }

    async fn unregister_consumer(&self, consumer: &ConsumerId) -> FeedResult<()> {
        let mut queues = self.queues.lock().await;
        if let Some(queue) = queues.get_mut(&consumer.queue) {
            let returned = queue.release(&consumer.name);
            info!("消费者 {} 已注销，{} 个未确认任务放回就绪队列", consumer, returned);
        }
        Ok(())
    }

    async fn reclaim_orphans(&self, queue_name: &str) -> FeedResult<u64> {
        let mut queues = self.queues.lock().await;
        let Some(queue) = queues.get_mut(queue_name) else {
            return Ok(0);
        };

        let now = Instant::now();
        let expired: Vec<String> = queue
            .consumers
            .iter()
            .filter(|(_, state)| now.duration_since(state.last_heartbeat) > self.heartbeat_ttl)
            .map(|(name, _)| name.clone())
            .collect();

        let mut reclaimed = 0;
        for name in expired {
            let returned = queue.release(&name);
            warn!("消费者 {}::{} 心跳已过期，回收 {} 个未确认任务", queue_name, name, returned);
            reclaimed += returned;
        }

        if reclaimed > 0 {
            self.metrics.record_reclaimed(queue_name, reclaimed);
        }
        Ok(reclaimed)
    }

    async fn return_rejected(&self, queue_name: &str, max: u64) -> FeedResult<u64> {
        let mut queues = self.queues.lock().await;
        let Some(queue) = queues.get_mut(queue_name) else {
            return Ok(0);
        };
        let count = (max as usize).min(queue.rejected.len());
        let returned: Vec<StoredTask> = queue.rejected.drain(..count).collect();
        queue.ready.extend(returned);
        Ok(count as u64)
    }

    async fn stats(&self, queue_name: &str) -> FeedResult<QueueStats> {
        let queues = self.queues.lock().await;
        Ok(queues
            .get(queue_name)
            .map(|queue| QueueStats {
                ready: queue.ready.len() as u64,
                rejected: queue.rejected.len() as u64,
                unacked: queue.consumers.values().map(|c| c.unacked.len() as u64).sum(),
                consumers: queue.consumers.len() as u64,
            })
            .unwrap_or_default())
    }
}

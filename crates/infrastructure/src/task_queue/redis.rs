use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, Script};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{consumer_name, decode_record, encode_record};
use crate::metrics::QueueMetrics;
use feedline_config::TaskQueueConfig;
use feedline_domain::{ConsumerId, DeliveryReceipt, FetchedTask, QueueStats, TaskBroker};
use feedline_errors::{FeedError, FeedResult};

/// 从一个列表原子地移动记录到另一个列表
const MOVE_RECORD_SCRIPT: &str = r#"
local removed = redis.call('LREM', KEYS[1], 1, ARGV[1])
if removed > 0 then
    redis.call('LPUSH', KEYS[2], ARGV[1])
end
return removed
"#;

/// 基于Redis列表的任务队列
///
/// 每个队列使用以下键：
/// - `{tag}::{queue}::ready` 就绪任务，LPUSH入队，从右端取出
/// - `{tag}::{queue}::rejected` 被拒绝的任务
/// - `{tag}::{queue}::consumers` 已注册消费者集合
/// - `{tag}::{queue}::{consumer}::unacked` 消费者已取出未结算的任务
/// - `{tag}::{queue}::{consumer}::heartbeat` 带过期时间的心跳
pub struct RedisTaskBroker {
    connections: Vec<ConnectionManager>,
    next: AtomicUsize,
    tag: String,
    heartbeat_ttl: Duration,
    move_script: Script,
    metrics: QueueMetrics,
}

impl RedisTaskBroker {
    pub async fn new(config: &TaskQueueConfig) -> FeedResult<Self> {
        let url = config.redis_connection_url();
        let client = Client::open(url.as_str())
            .map_err(|e| FeedError::task_queue(format!("创建Redis客户端失败: {e}")))?;

        let mut connections = Vec::with_capacity(config.pool_size as usize);
        for _ in 0..config.pool_size.max(1) {
            let manager = ConnectionManager::new(client.clone())
                .await
                .map_err(|e| FeedError::task_queue(format!("连接Redis失败: {e}")))?;
            connections.push(manager);
        }

        info!("任务队列已连接到Redis: {}, 连接数: {}", url, connections.len());

        Ok(Self {
            connections,
            next: AtomicUsize::new(0),
            tag: config.tag.clone(),
            heartbeat_ttl: config.heartbeat_ttl(),
            move_script: Script::new(MOVE_RECORD_SCRIPT),
            metrics: QueueMetrics::default(),
        })
    }

    pub fn metrics(&self) -> &QueueMetrics {
        &self.metrics
    }

    fn connection(&self) -> ConnectionManager {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.connections.len();
        self.connections[index].clone()
    }

    fn ready_key(&self, queue: &str) -> String {
        format!("{}::{}::ready", self.tag, queue)
    }

    fn rejected_key(&self, queue: &str) -> String {
        format!("{}::{}::rejected", self.tag, queue)
    }

    fn consumers_key(&self, queue: &str) -> String {
        format!("{}::{}::consumers", self.tag, queue)
    }

    fn unacked_key(&self, queue: &str, consumer: &str) -> String {
        format!("{}::{}::{}::unacked", self.tag, queue, consumer)
    }

    fn heartbeat_key(&self, queue: &str, consumer: &str) -> String {
        format!("{}::{}::{}::heartbeat", self.tag, queue, consumer)
    }

    async fn move_record(&self, from: &str, to: &str, raw: &[u8]) -> FeedResult<bool> {
        let mut conn = self.connection();
        let removed: i64 = self
            .move_script
            .key(from)
            .key(to)
            .arg(raw)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| FeedError::task_queue(format!("移动队列记录失败: {e}")))?;
        Ok(removed > 0)
    }

    /// 把一个列表中的全部记录移回就绪队列
    async fn drain_into_ready(&self, from: &str, ready: &str, max: Option<u64>) -> FeedResult<u64> {
        let mut conn = self.connection();
        let mut moved = 0u64;
        loop {
            if let Some(max) = max {
                if moved >= max {
                    break;
                }
            }
            let record: Option<Vec<u8>> = redis::cmd("LMOVE")
                .arg(from)
                .arg(ready)
                .arg("RIGHT")
                .arg("LEFT")
                .query_async(&mut conn)
                .await
                .map_err(|e| FeedError::task_queue(format!("回收队列记录失败: {e}")))?;
            if record.is_none() {
                break;
            }
            moved += 1;
        }
        Ok(moved)
    }

    async fn release_consumer(&self, queue: &str, consumer: &str) -> FeedResult<u64> {
        let returned = self
            .drain_into_ready(&self.unacked_key(queue, consumer), &self.ready_key(queue), None)
            .await?;

        let mut conn = self.connection();
        redis::pipe()
            .atomic()
            .cmd("SREM")
            .arg(self.consumers_key(queue))
            .arg(consumer)
            .ignore()
            .cmd("DEL")
            .arg(self.heartbeat_key(queue, consumer))
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| FeedError::task_queue(format!("注销消费者 {consumer} 失败: {e}")))?;

        Ok(returned)
    }

    fn owner_of<'a>(&self, receipt: &'a DeliveryReceipt) -> (&'a str, &'a str) {
        (&receipt.consumer.queue, &receipt.consumer.name)
    }
}

#[async_trait]
impl TaskBroker for RedisTaskBroker {
    async fn publish(&self, queue: &str, payload: &[u8]) -> FeedResult<()> {
        let record = encode_record(&Uuid::new_v4().to_string(), payload);
        let mut conn = self.connection();
        redis::cmd("LPUSH")
            .arg(self.ready_key(queue))
            .arg(record)
            .query_async::<i64>(&mut conn)
            .await
            .map_err(|e| FeedError::task_queue(format!("发布任务到队列 {queue} 失败: {e}")))?;

        self.metrics.record_published(queue);
        debug!("任务已发布到队列: {}", queue);
        Ok(())
    }

    async fn register_consumer(&self, queue: &str, tag: &str) -> FeedResult<ConsumerId> {
        let name = consumer_name(tag);
        let mut conn = self.connection();
        redis::pipe()
            .atomic()
            .cmd("SADD")
            .arg(self.consumers_key(queue))
            .arg(&name)
            .ignore()
            .cmd("SET")
            .arg(self.heartbeat_key(queue, &name))
            .arg(1)
            .arg("EX")
            .arg(self.heartbeat_ttl.as_secs().max(1))
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| FeedError::task_queue(format!("注册消费者失败: {e}")))?;

        info!("消费者 {} 已注册到队列 {}", name, queue);
        Ok(ConsumerId::new(queue, name))
    }

    async fn heartbeat(&self, consumer: &ConsumerId) -> FeedResult<()> {
        let mut conn = self.connection();
        let (added,): (i64,) = redis::pipe()
            .atomic()
            .cmd("SADD")
            .arg(self.consumers_key(&consumer.queue))
            .arg(&consumer.name)
            .cmd("SET")
            .arg(self.heartbeat_key(&consumer.queue, &consumer.name))
            .arg(1)
            .arg("EX")
            .arg(self.heartbeat_ttl.as_secs().max(1))
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| FeedError::task_queue(format!("刷新消费者 {consumer} 心跳失败: {e}")))?;

        if added > 0 {
            // 已被清理器回收的消费者仍在运行
            warn!("消费者 {} 已被回收，重新注册", consumer);
        }
        Ok(())
    }

    async fn fetch(&self, consumer: &ConsumerId, limit: usize) -> FeedResult<Vec<FetchedTask>> {
        let ready = self.ready_key(&consumer.queue);
        let unacked = self.unacked_key(&consumer.queue, &consumer.name);
        let mut conn = self.connection();
        let mut tasks = Vec::new();

        while tasks.len() < limit {
            let record: Option<Vec<u8>> = redis::cmd("LMOVE")
                .arg(&ready)
                .arg(&unacked)
                .arg("RIGHT")
                .arg("LEFT")
                .query_async(&mut conn)
                .await
                .map_err(|e| FeedError::task_queue(format!("从队列 {} 取任务失败: {e}", consumer.queue)))?;

            let Some(raw) = record else { break };
            let (delivery_id, payload) = match decode_record(&raw) {
                Ok(decoded) => decoded,
                Err(e) => {
                    // 无法识别的记录直接移入拒绝列表
                    warn!("队列 {} 中存在无法解析的记录: {}", consumer.queue, e);
                    self.move_record(&unacked, &self.rejected_key(&consumer.queue), &raw)
                        .await?;
                    continue;
                }
            };

            tasks.push(FetchedTask {
                receipt: DeliveryReceipt {
                    consumer: consumer.clone(),
                    delivery_id,
                    raw,
                },
                payload,
            });
        }

        if !tasks.is_empty() {
            self.metrics.record_delivered(&consumer.queue, tasks.len() as u64);
        }
        Ok(tasks)
    }

    async fn ack(&self, receipt: &DeliveryReceipt) -> FeedResult<()> {
        let (queue, consumer) = self.owner_of(receipt);
        let mut conn = self.connection();
        let removed: i64 = redis::cmd("LREM")
            .arg(self.unacked_key(queue, consumer))
            .arg(1)
            .arg(&receipt.raw)
            .query_async(&mut conn)
            .await
            .map_err(|e| FeedError::task_queue(format!("确认任务 {} 失败: {e}", receipt.delivery_id)))?;

        if removed == 0 {
            return Err(FeedError::not_found(format!(
                "投递 {} 不在消费者 {} 的未确认列表中",
                receipt.delivery_id, receipt.consumer
            )));
        }
        self.metrics.record_acked(queue);
        Ok(())
    }

    async fn reject(&self, receipt: &DeliveryReceipt) -> FeedResult<()> {
        let (queue, consumer) = self.owner_of(receipt);
        let moved = self
            .move_record(
                &self.unacked_key(queue, consumer),
                &self.rejected_key(queue),
                &receipt.raw,
            )
            .await?;
        if !moved {
            return Err(FeedError::not_found(format!(
                "投递 {} 不在消费者 {} 的未确认列表中",
                receipt.delivery_id, receipt.consumer
            )));
        }
        self.metrics.record_rejected(queue);
        Ok(())
    }

    async fn requeue(&self, receipt: &DeliveryReceipt) -> FeedResult<()> {
        let (queue, consumer) = self.owner_of(receipt);
        let moved = self
            .move_record(
                &self.unacked_key(queue, consumer),
                &self.ready_key(queue),
                &receipt.raw,
            )
            .await?;
        if !moved {
            return Err(FeedError::not_found(format!(
                "投递 {} 不在消费者 {} 的未确认列表中",
                receipt.delivery_id, receipt.consumer
            )));
        }
        self.metrics.record_requeued(queue);
        Ok(())
    }

    async fn unregister_consumer(&self, consumer: &ConsumerId) -> FeedResult<()> {
        let returned = self.release_consumer(&consumer.queue, &consumer.name).await?;
        info!("消费者 {} 已注销，{} 个未确认任务放回就绪队列", consumer, returned);
        Ok(())
    }

    async fn reclaim_orphans(&self, queue: &str) -> FeedResult<u64> {
        let mut conn = self.connection();
        let consumers: Vec<String> = redis::cmd("SMEMBERS")
            .arg(self.consumers_key(queue))
            .query_async(&mut conn)
            .await
            .map_err(|e| FeedError::task_queue(format!("读取队列 {queue} 消费者列表失败: {e}")))?;

        let mut reclaimed = 0u64;
        for consumer in consumers {
            let alive: bool = redis::cmd("EXISTS")
                .arg(self.heartbeat_key(queue, &consumer))
                .query_async(&mut conn)
                .await
                .map_err(|e| FeedError::task_queue(format!("读取消费者心跳失败: {e}")))?;
            if alive {
                continue;
            }

            let returned = self.release_consumer(queue, &consumer).await?;
            warn!("消费者 {}::{} 心跳已过期，回收 {} 个未确认任务", queue, consumer, returned);
            reclaimed += returned;
        }

        if reclaimed > 0 {
            self.metrics.record_reclaimed(queue, reclaimed);
        }
        Ok(reclaimed)
    }

    async fn return_rejected(&self, queue: &str, max: u64) -> FeedResult<u64> {
        let returned = self
            .drain_into_ready(&self.rejected_key(queue), &self.ready_key(queue), Some(max))
            .await?;
        info!("队列 {} 中 {} 个被拒绝任务已放回就绪队列", queue, returned);
        Ok(returned)
    }

    async fn stats(&self, queue: &str) -> FeedResult<QueueStats> {
        let mut conn = self.connection();
        let (ready, rejected, consumers): (u64, u64, Vec<String>) = redis::pipe()
            .cmd("LLEN")
            .arg(self.ready_key(queue))
            .cmd("LLEN")
            .arg(self.rejected_key(queue))
            .cmd("SMEMBERS")
            .arg(self.consumers_key(queue))
            .query_async(&mut conn)
            .await
            .map_err(|e| FeedError::task_queue(format!("读取队列 {queue} 状态失败: {e}")))?;

        let mut unacked = 0u64;
        for consumer in &consumers {
            let len: u64 = redis::cmd("LLEN")
                .arg(self.unacked_key(queue, consumer))
                .query_async(&mut conn)
                .await
                .map_err(|e| FeedError::task_queue(format!("读取未确认任务数失败: {e}")))?;
            unacked += len;
        }

        Ok(QueueStats {
            ready,
            rejected,
            unacked,
            consumers: consumers.len() as u64,
        })
    }
}

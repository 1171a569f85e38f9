use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::events::{Event, UserEvent};
use feedline_errors::FeedResult;

/// 队列上的一个已注册消费者
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConsumerId {
    pub queue: String,
    pub name: String,
}

impl ConsumerId {
    pub fn new(queue: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.queue, self.name)
    }
}

/// 投递回执，结算一次投递所需的全部信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub consumer: ConsumerId,
    pub delivery_id: String,
    /// 后端存储的原始记录，Redis实现用它从未确认列表中移除
    pub raw: Vec<u8>,
}

/// 从后端取出但尚未绑定broker的任务
#[derive(Debug, Clone)]
pub struct FetchedTask {
    pub receipt: DeliveryReceipt,
    pub payload: Vec<u8>,
}

/// 队列状态快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub ready: u64,
    pub rejected: u64,
    pub unacked: u64,
    pub consumers: u64,
}

/// 持久化任务队列
///
/// 至少一次投递：被取出的任务进入消费者的未确认集合，直到ack、reject或requeue；
/// 消费者心跳过期后，清理任务把它未确认的任务放回就绪队列。
#[async_trait]
pub trait TaskBroker: Send + Sync {
    /// 追加任务到队列尾部
    async fn publish(&self, queue: &str, payload: &[u8]) -> FeedResult<()>;

    /// 注册消费者，返回的标识在该队列内唯一
    async fn register_consumer(&self, queue: &str, tag: &str) -> FeedResult<ConsumerId>;

    /// 刷新消费者心跳
    async fn heartbeat(&self, consumer: &ConsumerId) -> FeedResult<()>;

    /// 最多取出 `limit` 个任务，队列为空时返回空列表
    async fn fetch(&self, consumer: &ConsumerId, limit: usize) -> FeedResult<Vec<FetchedTask>>;

    /// 确认处理完成，任务被永久移除
    async fn ack(&self, receipt: &DeliveryReceipt) -> FeedResult<()>;

    /// 拒绝任务，移入拒绝列表
    async fn reject(&self, receipt: &DeliveryReceipt) -> FeedResult<()>;

    /// 放回就绪队列等待重试
    async fn requeue(&self, receipt: &DeliveryReceipt) -> FeedResult<()>;

    /// 注销消费者，其未确认任务放回就绪队列
    async fn unregister_consumer(&self, consumer: &ConsumerId) -> FeedResult<()>;

    /// 回收心跳过期消费者的未确认任务，返回回收数量
    async fn reclaim_orphans(&self, queue: &str) -> FeedResult<u64>;

    /// 将至多 `max` 个被拒绝的任务放回就绪队列
    async fn return_rejected(&self, queue: &str, max: u64) -> FeedResult<u64>;

    async fn stats(&self, queue: &str) -> FeedResult<QueueStats>;
}

/// 一次投递，必须恰好结算一次
pub struct Delivery {
    receipt: DeliveryReceipt,
    payload: Vec<u8>,
    broker: Arc<dyn TaskBroker>,
}

impl Delivery {
    pub fn new(task: FetchedTask, broker: Arc<dyn TaskBroker>) -> Self {
        Self {
            receipt: task.receipt,
            payload: task.payload,
            broker,
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn id(&self) -> &str {
        &self.receipt.delivery_id
    }

    pub fn receipt(&self) -> &DeliveryReceipt {
        &self.receipt
    }

    pub async fn ack(self) -> FeedResult<DeliveryOutcome> {
        self.broker.ack(&self.receipt).await?;
        Ok(DeliveryOutcome::Acked)
    }

    pub async fn reject(self) -> FeedResult<DeliveryOutcome> {
        self.broker.reject(&self.receipt).await?;
        Ok(DeliveryOutcome::Rejected)
    }

    pub async fn requeue(self) -> FeedResult<DeliveryOutcome> {
        self.broker.requeue(&self.receipt).await?;
        Ok(DeliveryOutcome::Requeued)
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("receipt", &self.receipt)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Acked,
    Rejected,
    Requeued,
}

/// 队列消费者的业务处理器
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    fn name(&self) -> &str;

    /// 处理并结算一次投递
    async fn handle(&self, delivery: Delivery) -> FeedResult<DeliveryOutcome>;
}

/// 事件总线的生产端
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// 发布事件到目标用户所在分片
    async fn publish_event(&self, user_id: i64, routing_shard: &str, event: &Event) -> FeedResult<()>;
}

/// 事件总线消费端的投递目标，通常是长连接注册表
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn deliver(&self, event: UserEvent) -> FeedResult<()>;
}

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use feedline_domain::{Event, EventPublisher, EventSink, OutboundEnvelope};
use feedline_errors::FeedResult;

/// 进程内事件总线
///
/// 每个分片最多一个订阅者；发往无人订阅分片的事件被丢弃，与没有绑定队列的交换机行为一致。
#[derive(Default)]
pub struct InMemoryEventBus {
    subscribers: RwLock<HashMap<String, Arc<dyn EventSink>>>,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(&self, routing_shard: impl Into<String>, sink: Arc<dyn EventSink>) {
        self.subscribers.write().await.insert(routing_shard.into(), sink);
    }

    pub async fn unsubscribe(&self, routing_shard: &str) {
        self.subscribers.write().await.remove(routing_shard);
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventBus {
    async fn publish_event(&self, user_id: i64, routing_shard: &str, event: &Event) -> FeedResult<()> {
        let sink = self.subscribers.read().await.get(routing_shard).cloned();
        let Some(sink) = sink else {
            debug!("分片 {} 没有订阅者, 丢弃事件 {}", routing_shard, event.event_type());
            return Ok(());
        };

        // 经过与线上相同的编码，保证两种实现的投递内容一致
        let bytes = OutboundEnvelope::new(user_id, routing_shard, event.clone()).to_bytes()?;
        let user_event = OutboundEnvelope::from_bytes(&bytes)?.into_user_event()?;
        sink.deliver(user_event).await
    }
}

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::{
    message::Delivery as AmqpDelivery,
    options::*,
    types::{AMQPValue, FieldTable, LongString, ShortString},
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
};
use tokio::sync::{watch, Mutex};
use metrics::counter;
use tracing::{debug, error, info, warn};

use feedline_config::EventBusConfig;
use feedline_domain::{Event, EventPublisher, EventSink, OutboundEnvelope};
use feedline_errors::{FeedError, FeedResult};

async fn declare_exchange(channel: &Channel, exchange: &str) -> FeedResult<()> {
    channel
        .exchange_declare(
            exchange,
            ExchangeKind::Direct,
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| FeedError::event_bus(format!("声明交换机 {exchange} 失败: {e}")))?;
    debug!("交换机 {} 声明成功", exchange);
    Ok(())
}

struct PublisherLink {
    connection: Connection,
    channel: Channel,
}

impl PublisherLink {
    async fn open(amqp_url: &str, exchange: &str) -> FeedResult<Self> {
        let connection = Connection::connect(amqp_url, ConnectionProperties::default())
            .await
            .map_err(|e| FeedError::event_bus(format!("连接RabbitMQ失败: {e}")))?;
        let channel = open_channel(&connection, exchange).await?;
        Ok(Self { connection, channel })
    }
}

async fn open_channel(connection: &Connection, exchange: &str) -> FeedResult<Channel> {
    let channel = connection
        .create_channel()
        .await
        .map_err(|e| FeedError::event_bus(format!("创建通道失败: {e}")))?;
    declare_exchange(&channel, exchange).await?;
    Ok(channel)
}

/// RabbitMQ事件发布端
///
/// 事件发往direct交换机，路由键为目标用户所在分片。
/// 每次发布前检查通道状态：通道关闭时在原连接上重建通道，连接断开时重新连接。
pub struct RabbitMqEventPublisher {
    amqp_url: String,
    exchange: String,
    link: Mutex<PublisherLink>,
}

impl RabbitMqEventPublisher {
    pub async fn new(config: &EventBusConfig) -> FeedResult<Self> {
        let link = PublisherLink::open(&config.amqp_url, &config.exchange).await?;
        info!("事件发布端已连接到RabbitMQ, 交换机: {}", config.exchange);

        Ok(Self {
            amqp_url: config.amqp_url.clone(),
            exchange: config.exchange.clone(),
            link: Mutex::new(link),
        })
    }

    pub async fn is_connected(&self) -> bool {
        let link = self.link.lock().await;
        link.connection.status().connected() && link.channel.status().connected()
    }

    /// 关闭当前连接，之后的发布会重新建立连接
    pub async fn close(&self) -> FeedResult<()> {
        let link = self.link.lock().await;
        link.connection
            .close(200, "正常关闭")
            .await
            .map_err(|e| FeedError::event_bus(format!("关闭连接失败: {e}")))?;
        info!("事件发布端连接已关闭");
        Ok(())
    }

    async fn ensure_open(&self, link: &mut PublisherLink) -> FeedResult<()> {
        if !link.connection.status().connected() {
            warn!("事件发布端连接已断开，重新连接RabbitMQ");
            *link = PublisherLink::open(&self.amqp_url, &self.exchange).await?;
            counter!("feedline_event_bus_reconnects_total", "scope" => "connection").increment(1);
        } else if !link.channel.status().connected() {
            warn!("事件发布端通道已关闭，重新创建通道");
            link.channel = open_channel(&link.connection, &self.exchange).await?;
            counter!("feedline_event_bus_reconnects_total", "scope" => "channel").increment(1);
        }
        Ok(())
    }

    fn headers(user_id: i64, event: &Event) -> FieldTable {
        let mut headers = FieldTable::default();
        headers.insert(
            ShortString::from("type"),
            AMQPValue::LongString(LongString::from(event.event_type())),
        );
        headers.insert(ShortString::from("user_id"), AMQPValue::LongLongInt(user_id));
        headers
    }
}

#[async_trait]
impl EventPublisher for RabbitMqEventPublisher {
    async fn publish_event(&self, user_id: i64, routing_shard: &str, event: &Event) -> FeedResult<()> {
        let body = OutboundEnvelope::new(user_id, routing_shard, event.clone()).to_bytes()?;
        let properties = BasicProperties::default()
            .with_content_type(ShortString::from("application/json"))
            .with_headers(Self::headers(user_id, event))
            .with_delivery_mode(2);

        let mut link = self.link.lock().await;
        self.ensure_open(&mut link).await?;

        let confirm = link
            .channel
            .basic_publish(
                &self.exchange,
                routing_shard,
                BasicPublishOptions::default(),
                &body,
                properties,
            )
            .await
            .map_err(|e| FeedError::event_bus(format!("发布事件到分片 {routing_shard} 失败: {e}")))?;

        confirm
            .await
            .map_err(|e| FeedError::event_bus(format!("事件发布确认失败: {e}")))?;

        debug!("事件 {} 已发布给用户 {}, 分片 {}", event.event_type(), user_id, routing_shard);
        Ok(())
    }
}

/// RabbitMQ事件消费端
///
/// 声明本实例的分区队列并绑定到自己的路由键，逐条转交给 [`EventSink`]，
/// 处理后手动确认。连接断开时按配置的间隔重连。
pub struct RabbitMqEventConsumer {
    config: EventBusConfig,
    sink: Arc<dyn EventSink>,
}

impl RabbitMqEventConsumer {
    pub fn new(config: EventBusConfig, sink: Arc<dyn EventSink>) -> Self {
        Self { config, sink }
    }

    /// 持续消费直到收到停止信号
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "事件消费端启动, 队列: {}, 路由键: {}",
            self.config.partition_queue(),
            self.config.routing_key
        );

        while !*shutdown.borrow() {
            match self.consume(&mut shutdown).await {
                Ok(()) => break,
                Err(e) => {
                    error!("事件消费中断: {}, {:?} 后重连", e, self.config.reconnect_delay());
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.reconnect_delay()) => {}
                        _ = shutdown.changed() => {}
                    }
                }
            }
        }

        info!("事件消费端已停止");
    }

    async fn consume(&self, shutdown: &mut watch::Receiver<bool>) -> FeedResult<()> {
        let connection = Connection::connect(&self.config.amqp_url, ConnectionProperties::default())
            .await
            .map_err(|e| FeedError::event_bus(format!("连接RabbitMQ失败: {e}")))?;
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| FeedError::event_bus(format!("创建通道失败: {e}")))?;

        declare_exchange(&channel, &self.config.exchange).await?;

        let queue_name = self.config.partition_queue();
        channel
            .queue_declare(
                &queue_name,
                QueueDeclareOptions {
                    durable: true,
                    exclusive: false,
                    auto_delete: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| FeedError::event_bus(format!("声明队列 {queue_name} 失败: {e}")))?;

        channel
            .queue_bind(
                &queue_name,
                &self.config.exchange,
                &self.config.routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| FeedError::event_bus(format!("绑定队列 {queue_name} 失败: {e}")))?;

        channel
            .basic_qos(self.config.prefetch_count, BasicQosOptions::default())
            .await
            .map_err(|e| FeedError::event_bus(format!("设置预取数量失败: {e}")))?;

        let mut consumer = channel
            .basic_consume(
                &queue_name,
                &format!("{}-consumer", queue_name),
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| FeedError::event_bus(format!("创建消费者失败: {e}")))?;

        info!("开始消费事件队列: {}", queue_name);

        loop {
            tokio::select! {
                next = consumer.next() => match next {
                    Some(Ok(delivery)) => self.dispatch(delivery).await,
                    Some(Err(e)) => return Err(FeedError::event_bus(format!("接收事件失败: {e}"))),
                    None => return Err(FeedError::event_bus("事件消费流已关闭")),
                },
                _ = shutdown.changed() => {
                    if let Err(e) = connection.close(200, "正常关闭").await {
                        warn!("关闭事件消费连接失败: {}", e);
                    }
                    return Ok(());
                }
            }
        }
    }

    async fn dispatch(&self, delivery: AmqpDelivery) {
        let event = OutboundEnvelope::from_bytes(&delivery.data).and_then(|e| e.into_user_event());
        let event = match event {
            Ok(event) => event,
            Err(e) => {
                warn!("丢弃无法解析的事件: {}", e);
                if let Err(e) = delivery
                    .acker
                    .nack(BasicNackOptions {
                        requeue: false,
                        ..Default::default()
                    })
                    .await
                {
                    error!("拒绝事件失败: {}", e);
                }
                return;
            }
        };

        let user_id = event.user_id;
        if let Err(e) = self.sink.deliver(event).await {
            // 投递目标不可用时放回队列，由其他消费者或重连后重试
            warn!("事件投递给用户 {} 失败: {}", user_id, e);
            if let Err(e) = delivery
                .acker
                .nack(BasicNackOptions {
                    requeue: true,
                    ..Default::default()
                })
                .await
            {
                error!("事件放回队列失败: {}", e);
            }
            return;
        }

        if let Err(e) = delivery.acker.ack(BasicAckOptions::default()).await {
            error!("确认事件失败: {}", e);
        }
    }
}

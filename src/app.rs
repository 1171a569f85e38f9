use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{error, info, warn};

use feedline_config::{
    AppConfig, EventBusBackend, FeedCacheBackend, StorageBackend, TaskQueueBackend,
};
use feedline_domain::{EventPublisher, EventSink, FeedCache, SocialStorage, TaskBroker};
use feedline_fanout::{FeedService, QueueService};
use feedline_gateway::{ConnectionRegistry, GatewayServer};
use feedline_infrastructure::{
    InMemoryEventBus, InMemoryFeedCache, InMemorySocialStorage, InMemoryTaskBroker,
    PostgresSocialStorage, RabbitMqEventConsumer, RabbitMqEventPublisher, RedisFeedCache,
    RedisTaskBroker,
};

use crate::shutdown::wait_for;

/// 应用运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    /// 任务队列消费者：动态扇出与缓存重建
    Queue,
    /// 推送网关及其事件总线消费者
    Gateway,
    All,
}

impl std::str::FromStr for AppMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "queue" => Ok(AppMode::Queue),
            "gateway" => Ok(AppMode::Gateway),
            "all" => Ok(AppMode::All),
            _ => Err(anyhow::anyhow!("不支持的运行模式: {s}")),
        }
    }
}

/// 主应用程序
pub struct Application {
    config: AppConfig,
    mode: AppMode,
    storage: Arc<dyn SocialStorage>,
    broker: Arc<dyn TaskBroker>,
    cache: Arc<dyn FeedCache>,
    /// 事件总线为 in_memory 时队列与网关共享同一个实例
    local_bus: Option<Arc<InMemoryEventBus>>,
}

impl Application {
    pub async fn new(config: AppConfig, mode: AppMode) -> Result<Self> {
        info!("初始化应用程序，模式: {:?}", mode);

        let storage = create_storage(&config).await?;
        let broker = create_task_broker(&config).await?;
        let cache = create_feed_cache(&config).await?;
        let local_bus = match config.event_bus.backend {
            EventBusBackend::InMemory => {
                if mode != AppMode::All {
                    warn!("进程内事件总线只能在 all 模式下连通队列与网关");
                }
                Some(Arc::new(InMemoryEventBus::new()))
            }
            EventBusBackend::Rabbitmq => None,
        };

        Ok(Self {
            config,
            mode,
            storage,
            broker,
            cache,
            local_bus,
        })
    }

    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        info!("启动应用程序，模式: {:?}", self.mode);

        match self.mode {
            AppMode::Queue => self.run_queue(shutdown).await,
            AppMode::Gateway => self.run_gateway(shutdown).await,
            AppMode::All => {
                // 任意一半失败时停止另一半
                let (stop_tx, stop_rx) = watch::channel(false);
                let queue = async {
                    let result = self.run_queue(stop_rx.clone()).await;
                    if result.is_err() {
                        let _ = stop_tx.send(true);
                    }
                    result
                };
                let gateway = async {
                    let result = self.run_gateway(stop_rx.clone()).await;
                    if result.is_err() {
                        let _ = stop_tx.send(true);
                    }
                    result
                };

                let halves = async { tokio::join!(queue, gateway) };
                tokio::pin!(halves);
                let (queue, gateway) = tokio::select! {
                    results = &mut halves => results,
                    _ = wait_for(shutdown) => {
                        let _ = stop_tx.send(true);
                        halves.await
                    }
                };

                if let Err(e) = &queue {
                    error!("任务队列服务运行失败: {e:#}");
                }
                if let Err(e) = &gateway {
                    error!("推送网关运行失败: {e:#}");
                }
                queue.and(gateway)
            }
        }
    }

    async fn run_queue(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        info!("启动任务队列服务");

        let publisher = self.event_publisher().await?;
        let feeds = FeedService::new(
            self.broker.clone(),
            self.storage.clone(),
            self.cache.clone(),
            self.config.feed.posts_limit,
        );
        let mut service = QueueService::new(&self.config.task_queue, feeds, publisher);
        service.start().await.context("启动任务队列服务失败")?;

        wait_for(shutdown).await;
        info!("任务队列服务收到关闭信号");

        service.shutdown().await.context("停止任务队列服务失败")?;
        Ok(())
    }

    async fn run_gateway(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        info!("启动推送网关: {}", self.config.gateway.bind_address);

        let (registry, registry_task) =
            ConnectionRegistry::spawn(self.config.gateway.command_buffer, shutdown.clone());
        let server = GatewayServer::new(self.config.gateway.clone(), registry.clone());
        // 绑定失败时注册表随最后一个句柄释放而退出
        let listener = server.bind().await.context("启动推送网关失败")?;

        let sink: Arc<dyn EventSink> = Arc::new(registry);
        let shard = self.config.event_bus.routing_key.clone();

        let consumer_task = match &self.local_bus {
            Some(bus) => {
                bus.subscribe(shard.clone(), sink).await;
                None
            }
            None => {
                let consumer = RabbitMqEventConsumer::new(self.config.event_bus.clone(), sink);
                let shutdown = shutdown.clone();
                Some(tokio::spawn(async move { consumer.run(shutdown).await }))
            }
        };
        info!(shard = %shard, "事件总线消费者已就绪");

        let served = server.serve_with_listener(listener, shutdown).await;
        drop(server);

        if let Some(bus) = &self.local_bus {
            bus.unsubscribe(&shard).await;
        }
        if let Some(task) = consumer_task {
            if served.is_err() {
                // 网关已停止服务，消费者不会再收到停止信号
                task.abort();
            }
            match task.await {
                Err(e) if !e.is_cancelled() => error!("事件总线消费者异常退出: {e}"),
                _ => {}
            }
        }
        if let Err(e) = registry_task.await {
            error!("连接注册表异常退出: {e}");
        }

        served.context("推送网关运行失败")?;
        info!("推送网关已停止");
        Ok(())
    }

    async fn event_publisher(&self) -> Result<Arc<dyn EventPublisher>> {
        match &self.local_bus {
            Some(bus) => Ok(bus.clone()),
            None => {
                let publisher = RabbitMqEventPublisher::new(&self.config.event_bus)
                    .await
                    .context("连接事件总线失败")?;
                Ok(Arc::new(publisher))
            }
        }
    }
}

async fn create_storage(config: &AppConfig) -> Result<Arc<dyn SocialStorage>> {
    match config.storage.backend {
        StorageBackend::Postgres => {
            info!("连接数据库");
            let storage = PostgresSocialStorage::connect(&config.storage)
                .await
                .context("连接数据库失败")?;
            storage.ensure_schema().await.context("初始化数据库表失败")?;
            Ok(Arc::new(storage))
        }
        StorageBackend::InMemory => Ok(Arc::new(InMemorySocialStorage::new())),
    }
}

async fn create_task_broker(config: &AppConfig) -> Result<Arc<dyn TaskBroker>> {
    match config.task_queue.backend {
        TaskQueueBackend::Redis => {
            let broker = RedisTaskBroker::new(&config.task_queue)
                .await
                .context("连接任务队列失败")?;
            Ok(Arc::new(broker))
        }
        TaskQueueBackend::InMemory => Ok(Arc::new(InMemoryTaskBroker::new(
            config.task_queue.heartbeat_ttl(),
        ))),
    }
}

async fn create_feed_cache(config: &AppConfig) -> Result<Arc<dyn FeedCache>> {
    match config.feed.cache_backend {
        FeedCacheBackend::Redis => {
            let cache = RedisFeedCache::new(&config.feed)
                .await
                .context("连接动态缓存失败")?;
            Ok(Arc::new(cache))
        }
        FeedCacheBackend::InMemory => Ok(Arc::new(InMemoryFeedCache::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mode() {
        assert_eq!("queue".parse::<AppMode>().unwrap(), AppMode::Queue);
        assert_eq!("gateway".parse::<AppMode>().unwrap(), AppMode::Gateway);
        assert_eq!("all".parse::<AppMode>().unwrap(), AppMode::All);
        assert!("dispatcher".parse::<AppMode>().is_err());
    }

    #[tokio::test]
    async fn test_in_memory_all_mode_runs_and_stops() {
        let mut config = AppConfig::default();
        config.task_queue.backend = TaskQueueBackend::InMemory;
        config.event_bus.backend = EventBusBackend::InMemory;
        config.feed.cache_backend = FeedCacheBackend::InMemory;
        config.storage.backend = StorageBackend::InMemory;
        config.gateway.bind_address = "127.0.0.1:0".to_string();

        let app = Application::new(config, AppMode::All).await.unwrap();
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { app.run(rx).await });

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        tx.send(true).unwrap();

        let result = tokio::time::timeout(std::time::Duration::from_secs(10), handle)
            .await
            .expect("应用未在超时内停止")
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_all_mode_stops_when_gateway_fails_to_bind() {
        let occupied = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = AppConfig::default();
        config.task_queue.backend = TaskQueueBackend::InMemory;
        config.event_bus.backend = EventBusBackend::InMemory;
        config.feed.cache_backend = FeedCacheBackend::InMemory;
        config.storage.backend = StorageBackend::InMemory;
        config.gateway.bind_address = occupied.local_addr().unwrap().to_string();

        let app = Application::new(config, AppMode::All).await.unwrap();
        let (_tx, rx) = watch::channel(false);

        let result = tokio::time::timeout(std::time::Duration::from_secs(10), app.run(rx))
            .await
            .expect("网关启动失败后应用仍在运行");
        assert!(result.is_err());
    }
}

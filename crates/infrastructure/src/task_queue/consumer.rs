use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::histogram;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};

use feedline_config::TaskQueueConfig;
use feedline_domain::{ConsumerId, Delivery, DeliveryHandler, DeliveryOutcome, FetchedTask, TaskBroker};
use feedline_errors::{FeedError, FeedResult};

/// 消费者池配置
#[derive(Debug, Clone)]
pub struct ConsumerPoolConfig {
    pub consumers: usize,
    pub prefetch_limit: usize,
    pub poll_interval: Duration,
    pub heartbeat_interval: Duration,
    pub report_batch_size: u64,
}

impl Default for ConsumerPoolConfig {
    fn default() -> Self {
        Self::from(&TaskQueueConfig::default())
    }
}

impl From<&TaskQueueConfig> for ConsumerPoolConfig {
    fn from(config: &TaskQueueConfig) -> Self {
        Self {
            consumers: config.consumers_per_queue,
            prefetch_limit: config.prefetch_limit,
            poll_interval: config.poll_interval(),
            heartbeat_interval: config.heartbeat_interval(),
            report_batch_size: config.report_batch_size,
        }
    }
}

/// 按批次输出消费速率
struct ThroughputReporter {
    queue: String,
    batch_size: u64,
    count: u64,
    started: Instant,
}

impl ThroughputReporter {
    fn new(queue: &str, batch_size: u64) -> Self {
        Self {
            queue: queue.to_string(),
            batch_size: batch_size.max(1),
            count: 0,
            started: Instant::now(),
        }
    }

    fn record(&mut self) {
        self.count += 1;
        if self.count % self.batch_size != 0 {
            return;
        }
        let elapsed = self.started.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            info!(
                queue = %self.queue,
                "consumed {} {:.0} r/s",
                self.count,
                self.batch_size as f64 / elapsed
            );
        }
        self.started = Instant::now();
    }
}

/// 单个队列上的一组消费者
///
/// 每个消费者拥有独立的注册身份和未确认集合，循环执行：
/// 预取至多 `prefetch_limit` 个任务，逐个交给处理器；队列为空时等待 `poll_interval`。
/// 停止时当前任务处理完成，其余已预取任务放回就绪队列，然后注销消费者。
/// 每个消费者的心跳持续到它的消费循环退出为止。
pub struct ConsumerPool {
    queue: String,
    broker: Arc<dyn TaskBroker>,
    handler: Arc<dyn DeliveryHandler>,
    config: ConsumerPoolConfig,
    shutdown_tx: Option<watch::Sender<bool>>,
    handles: Vec<JoinHandle<()>>,
    consumers: Vec<ConsumerId>,
}

impl ConsumerPool {
    pub fn new(
        queue: impl Into<String>,
        broker: Arc<dyn TaskBroker>,
        handler: Arc<dyn DeliveryHandler>,
        config: ConsumerPoolConfig,
    ) -> Self {
        Self {
            queue: queue.into(),
            broker,
            handler,
            config,
            shutdown_tx: None,
            handles: Vec::new(),
            consumers: Vec::new(),
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn consumers(&self) -> &[ConsumerId] {
        &self.consumers
    }

    pub fn is_running(&self) -> bool {
        self.shutdown_tx.is_some()
    }

    /// 注册消费者并启动消费循环
    pub async fn start(&mut self) -> FeedResult<()> {
        if self.is_running() {
            warn!("队列 {} 的消费者池已在运行", self.queue);
            return Ok(());
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let host = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "localhost".to_string());

        for index in 0..self.config.consumers {
            let tag = format!("{}-{}-{}", self.queue, host, index);
            let consumer = self.broker.register_consumer(&self.queue, &tag).await?;

            let worker = Worker {
                consumer: consumer.clone(),
                broker: self.broker.clone(),
                handler: self.handler.clone(),
                config: self.config.clone(),
                shutdown: shutdown_rx.clone(),
                detached: false,
            };
            let span = info_span!("consumer", queue = %self.queue, consumer = %consumer.name);
            self.handles.push(tokio::spawn(worker.run().instrument(span)));
            self.consumers.push(consumer);
        }

        self.shutdown_tx = Some(shutdown_tx);
        info!(
            "队列 {} 启动 {} 个消费者，处理器: {}",
            self.queue,
            self.config.consumers,
            self.handler.name()
        );
        Ok(())
    }

    /// 停止所有消费者并等待其退出
    pub async fn stop(&mut self) -> FeedResult<()> {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(true);
        }

        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                warn!("等待队列 {} 的消费者退出时出错: {}", self.queue, e);
            }
        }

        self.consumers.clear();
        info!("队列 {} 的消费者池已停止", self.queue);
        Ok(())
    }
}

async fn heartbeat_loop(
    broker: Arc<dyn TaskBroker>,
    consumer: ConsumerId,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = broker.heartbeat(&consumer).await {
                    warn!("消费者 {} 心跳失败: {}", consumer, e);
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}

struct Worker {
    consumer: ConsumerId,
    broker: Arc<dyn TaskBroker>,
    handler: Arc<dyn DeliveryHandler>,
    config: ConsumerPoolConfig,
    shutdown: watch::Receiver<bool>,
    /// 停止信号的发送端已被释放
    detached: bool,
}

impl Worker {
    fn stopping(&self) -> bool {
        self.detached || *self.shutdown.borrow()
    }

    async fn idle(&mut self) {
        tokio::select! {
            _ = tokio::time::sleep(self.config.poll_interval) => {}
            changed = self.shutdown.changed() => {
                if changed.is_err() {
                    self.detached = true;
                }
            }
        }
    }

    async fn run(mut self) {
        let (heartbeat_stop, heartbeat_rx) = watch::channel(false);
        let heartbeat = tokio::spawn(heartbeat_loop(
            self.broker.clone(),
            self.consumer.clone(),
            self.config.heartbeat_interval,
            heartbeat_rx,
        ));

        let mut reporter = ThroughputReporter::new(&self.consumer.queue, self.config.report_batch_size);

        while !self.stopping() {
            let tasks = match self
                .broker
                .fetch(&self.consumer, self.config.prefetch_limit)
                .await
            {
                Ok(tasks) => tasks,
                Err(FeedError::NotFound(_)) => {
                    warn!("消费者 {} 已被回收，立即重新注册", self.consumer);
                    if let Err(e) = self.broker.heartbeat(&self.consumer).await {
                        error!("消费者 {} 重新注册失败: {}", self.consumer, e);
                        self.idle().await;
                    }
                    continue;
                }
                Err(e) => {
                    error!("消费者 {} 取任务失败: {}", self.consumer, e);
                    self.idle().await;
                    continue;
                }
            };

            if tasks.is_empty() {
                self.idle().await;
                continue;
            }

            let mut pending = tasks.into_iter();
            while let Some(task) = pending.next() {
                if self.stopping() {
                    self.return_prefetched(std::iter::once(task).chain(pending.by_ref()))
                        .await;
                    break;
                }
                self.process(task).await;
                reporter.record();
            }
        }

        let _ = heartbeat_stop.send(true);
        if let Err(e) = heartbeat.await {
            warn!("等待消费者 {} 的心跳任务退出时出错: {}", self.consumer, e);
        }

        if let Err(e) = self.broker.unregister_consumer(&self.consumer).await {
            error!("注销消费者 {} 失败: {}", self.consumer, e);
        }
        debug!("消费者 {} 已退出", self.consumer);
    }

    async fn process(&self, task: FetchedTask) {
        let delivery = Delivery::new(task, self.broker.clone());
        let delivery_id = delivery.id().to_string();
        let started = Instant::now();

        let span = info_span!("delivery", id = %delivery_id);
        match self.handler.handle(delivery).instrument(span).await {
            Ok(DeliveryOutcome::Acked) => debug!("任务 {} 已确认", delivery_id),
            Ok(outcome) => info!("任务 {} 结算为 {:?}", delivery_id, outcome),
            Err(e) => error!("处理器 {} 处理任务 {} 失败: {}", self.handler.name(), delivery_id, e),
        }

        histogram!("feedline_task_queue_handle_duration_ms", "queue" => self.consumer.queue.clone())
            .record(started.elapsed().as_secs_f64() * 1000.0);
    }

    async fn return_prefetched(&self, tasks: impl Iterator<Item = FetchedTask>) {
        let mut returned = 0;
        for task in tasks {
            match self.broker.requeue(&task.receipt).await {
                Ok(()) => returned += 1,
                Err(e) => warn!("放回预取任务 {} 失败: {}", task.receipt.delivery_id, e),
            }
        }
        if returned > 0 {
            info!("消费者 {} 停止，{} 个预取任务已放回队列", self.consumer, returned);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task_queue::InMemoryTaskBroker;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        handled: AtomicUsize,
    }

    #[async_trait]
    impl DeliveryHandler for CountingHandler {
        fn name(&self) -> &str {
            "counting"
        }

        async fn handle(&self, delivery: Delivery) -> FeedResult<DeliveryOutcome> {
            self.handled.fetch_add(1, Ordering::SeqCst);
            if delivery.payload() == b"bad" {
                return delivery.reject().await;
            }
            delivery.ack().await
        }
    }

    struct SlowHandler {
        started: Arc<tokio::sync::Notify>,
        work: Duration,
        handled: AtomicUsize,
    }

    #[async_trait]
    impl DeliveryHandler for SlowHandler {
        fn name(&self) -> &str {
            "slow"
        }

        async fn handle(&self, delivery: Delivery) -> FeedResult<DeliveryOutcome> {
            self.started.notify_one();
            tokio::time::sleep(self.work).await;
            self.handled.fetch_add(1, Ordering::SeqCst);
            delivery.ack().await
        }
    }

    fn fast_config(consumers: usize) -> ConsumerPoolConfig {
        ConsumerPoolConfig {
            consumers,
            prefetch_limit: 10,
            poll_interval: Duration::from_millis(10),
            heartbeat_interval: Duration::from_millis(50),
            report_batch_size: 100,
        }
    }

    async fn wait_until_settled(broker: &InMemoryTaskBroker, queue: &str) {
        for _ in 0..200 {
            let stats = broker.stats(queue).await.unwrap();
            if stats.ready == 0 && stats.unacked == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("队列 {queue} 未在预期时间内处理完毕");
    }

    #[tokio::test]
    async fn test_pool_processes_every_task_once() {
        let broker = Arc::new(InMemoryTaskBroker::default());
        for i in 0..50 {
            let payload = if i == 7 { "bad".to_string() } else { format!("task-{i}") };
            broker.publish("post", payload.as_bytes()).await.unwrap();
        }

        let handler = Arc::new(CountingHandler { handled: AtomicUsize::new(0) });
        let mut pool = ConsumerPool::new("post", broker.clone(), handler.clone(), fast_config(3));
        pool.start().await.unwrap();
        assert_eq!(pool.consumers().len(), 3);

        wait_until_settled(&broker, "post").await;
        pool.stop().await.unwrap();

        assert_eq!(handler.handled.load(Ordering::SeqCst), 50);
        let stats = broker.stats("post").await.unwrap();
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.consumers, 0);
    }

    #[tokio::test]
    async fn test_stop_without_tasks_unregisters_consumers() {
        let broker = Arc::new(InMemoryTaskBroker::default());
        let handler = Arc::new(CountingHandler { handled: AtomicUsize::new(0) });
        let mut pool = ConsumerPool::new("feed", broker.clone(), handler, fast_config(2));

        pool.start().await.unwrap();
        assert_eq!(broker.stats("feed").await.unwrap().consumers, 2);

        pool.stop().await.unwrap();
        assert!(!pool.is_running());
        assert_eq!(broker.stats("feed").await.unwrap().consumers, 0);
    }

    #[tokio::test]
    async fn test_worker_rejoins_after_being_reclaimed() {
        let broker = Arc::new(InMemoryTaskBroker::default());
        let handler = Arc::new(CountingHandler { handled: AtomicUsize::new(0) });
        let mut pool = ConsumerPool::new("post", broker.clone(), handler.clone(), fast_config(1));
        pool.start().await.unwrap();

        // 清理器回收与注销对消费者集合的影响相同
        let consumer = pool.consumers()[0].clone();
        broker.unregister_consumer(&consumer).await.unwrap();
        assert_eq!(broker.stats("post").await.unwrap().consumers, 0);

        broker.publish("post", b"after-reclaim").await.unwrap();
        wait_until_settled(&broker, "post").await;

        assert_eq!(handler.handled.load(Ordering::SeqCst), 1);
        assert_eq!(broker.stats("post").await.unwrap().consumers, 1);
        pool.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_heartbeat_outlives_in_flight_task_during_stop() {
        let broker = Arc::new(InMemoryTaskBroker::new(Duration::from_millis(100)));
        broker.publish("feed", b"long").await.unwrap();

        let started = Arc::new(tokio::sync::Notify::new());
        let handler = Arc::new(SlowHandler {
            started: started.clone(),
            work: Duration::from_millis(400),
            handled: AtomicUsize::new(0),
        });
        let mut config = fast_config(1);
        config.heartbeat_interval = Duration::from_millis(20);
        let mut pool = ConsumerPool::new("feed", broker.clone(), handler.clone(), config);
        pool.start().await.unwrap();
        started.notified().await;

        let stopping = tokio::spawn(async move {
            pool.stop().await.unwrap();
            pool
        });

        // 停止期间任务仍在处理，心跳未过期，清理器不应回收
        while !stopping.is_finished() {
            assert_eq!(broker.reclaim_orphans("feed").await.unwrap(), 0);
            tokio::time::sleep(Duration::from_millis(30)).await;
        }
        stopping.await.unwrap();

        assert_eq!(handler.handled.load(Ordering::SeqCst), 1);
        let stats = broker.stats("feed").await.unwrap();
        assert_eq!(stats, feedline_domain::QueueStats { ready: 0, rejected: 0, unacked: 0, consumers: 0 });
    }
}

use std::sync::Arc;
use std::time::Duration;

use feedline_config::TaskQueueConfig;
use feedline_domain::{
    CachedFeed, Delivery, DeliveryHandler, DeliveryOutcome, Event, FeedCache, Post, TaskBroker,
    TaskPayload, FEED_QUEUE, POST_QUEUE,
};
use feedline_fanout::{FeedConsumer, FeedService, PostConsumer, QueueService};
use feedline_infrastructure::{InMemoryEventBus, InMemoryFeedCache, InMemoryTaskBroker};
use feedline_testing_utils::{
    CollectingEventSink, FlakySocialStorage, RecordingEventPublisher, SocialGraphBuilder, TestEnv,
};

struct Harness {
    broker: Arc<InMemoryTaskBroker>,
    storage: Arc<FlakySocialStorage>,
    cache: Arc<InMemoryFeedCache>,
    publisher: Arc<RecordingEventPublisher>,
    feeds: FeedService,
}

impl Harness {
    async fn new(builder: SocialGraphBuilder) -> Self {
        let broker = Arc::new(InMemoryTaskBroker::default());
        let storage = Arc::new(FlakySocialStorage::new(builder.build().await));
        let cache = Arc::new(InMemoryFeedCache::new());
        let publisher = Arc::new(RecordingEventPublisher::new());
        let feeds = FeedService::new(broker.clone(), storage.clone(), cache.clone(), 1000);
        Self {
            broker,
            storage,
            cache,
            publisher,
            feeds,
        }
    }

    fn post_consumer(&self) -> PostConsumer {
        PostConsumer::new(self.feeds.clone(), self.publisher.clone())
    }

    fn feed_consumer(&self) -> FeedConsumer {
        FeedConsumer::new(self.feeds.clone())
    }

    /// 取出队列中的下一个任务交给处理器
    async fn deliver_next(&self, queue: &str, handler: &dyn DeliveryHandler) -> DeliveryOutcome {
        let consumer = self.broker.register_consumer(queue, "test").await.unwrap();
        let task = self
            .broker
            .fetch(&consumer, 1)
            .await
            .unwrap()
            .pop()
            .expect("queue has a task");
        let outcome = handler
            .handle(Delivery::new(task, self.broker.clone()))
            .await
            .unwrap();
        self.broker.unregister_consumer(&consumer).await.unwrap();
        outcome
    }

    /// 取出 `feed` 队列中全部任务的用户ID
    async fn drain_refresh_targets(&self) -> Vec<i64> {
        let consumer = self.broker.register_consumer(FEED_QUEUE, "drain").await.unwrap();
        let mut targets = Vec::new();
        for task in self.broker.fetch(&consumer, 1000).await.unwrap() {
            match TaskPayload::decode(&task.payload).unwrap() {
                TaskPayload::FeedRefresh(refresh) => targets.push(refresh.user_id),
                other => panic!("unexpected task on feed queue: {other:?}"),
            }
            self.broker.ack(&task.receipt).await.unwrap();
        }
        targets.sort_unstable();
        targets
    }
}

fn author_with_followers(followers: &[i64]) -> SocialGraphBuilder {
    let mut builder = SocialGraphBuilder::new().user_on_shard(1, "Alice", "00000");
    for follower in followers {
        builder = builder
            .user_on_shard(*follower, &format!("user-{follower}"), &format!("{:05}", follower % 3))
            .follows(*follower, 1);
    }
    builder
}

#[tokio::test]
async fn test_every_follower_gets_a_refresh_task() {
    let followers: Vec<i64> = (10..30).collect();
    let harness = Harness::new(author_with_followers(&followers)).await;

    harness.feeds.publish_post(1, "hello", "world").await.unwrap();
    let outcome = harness.deliver_next(POST_QUEUE, &harness.post_consumer()).await;

    assert_eq!(outcome, DeliveryOutcome::Acked);
    assert_eq!(harness.drain_refresh_targets().await, followers);
    assert_eq!(harness.publisher.published().len(), followers.len());
}

#[tokio::test]
async fn test_notification_failure_is_isolated() {
    let harness = Harness::new(author_with_followers(&[2, 3, 4, 5])).await;
    harness.publisher.fail_for(3);
    harness.storage.fail_profile_for(4);

    harness.feeds.publish_post(1, "t", "m").await.unwrap();
    let outcome = harness.deliver_next(POST_QUEUE, &harness.post_consumer()).await;

    assert_eq!(outcome, DeliveryOutcome::Acked);
    assert_eq!(harness.drain_refresh_targets().await, vec![2, 3, 4, 5]);

    let notified: Vec<i64> = harness.publisher.published().iter().map(|e| e.user_id).collect();
    assert_eq!(notified.len(), 2);
    assert!(notified.contains(&2) && notified.contains(&5));

    let stats = harness.broker.stats(POST_QUEUE).await.unwrap();
    assert_eq!(stats.ready + stats.unacked + stats.rejected, 0);
}

#[tokio::test]
async fn test_scenario_followers_b_and_c_with_failing_profile() {
    let builder = SocialGraphBuilder::new()
        .user_on_shard(1, "A", "00000")
        .user_on_shard(2, "B", "00001")
        .user_on_shard(3, "C", "00002")
        .follows(2, 1)
        .follows(3, 1);
    let harness = Harness::new(builder).await;
    harness.storage.fail_profile_for(3);

    // 发布调用方不会看到扇出阶段的失败
    let post = harness.feeds.publish_post(1, "title", "body").await.unwrap();
    let report = harness
        .post_consumer()
        .fan_out(&feedline_domain::PostTask::new(post))
        .await
        .unwrap();

    assert_eq!(report.followers, 2);
    assert_eq!(report.refreshes_enqueued, 2);
    assert_eq!(report.notified, 1);
    assert_eq!(report.failed, vec![3]);

    let published = harness.publisher.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].user_id, 2);
    assert_eq!(published[0].routing_shard, "00001");
    match &published[0].event {
        Event::Post(notice) => {
            assert_eq!(notice.user_from, "A");
            assert_eq!(notice.title, "title");
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn test_author_name_falls_back_to_empty() {
    let harness = Harness::new(author_with_followers(&[2])).await;
    harness.storage.set_fail_display_name(true);

    harness.feeds.publish_post(1, "t", "m").await.unwrap();
    harness.deliver_next(POST_QUEUE, &harness.post_consumer()).await;

    match &harness.publisher.published()[0].event {
        Event::Post(notice) => assert_eq!(notice.user_from, ""),
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn test_follower_fetch_failure_requeues_whole_task() {
    let harness = Harness::new(author_with_followers(&[2, 3])).await;
    harness.storage.set_fail_followers(true);

    harness.feeds.publish_post(1, "t", "m").await.unwrap();
    let outcome = harness.deliver_next(POST_QUEUE, &harness.post_consumer()).await;

    assert_eq!(outcome, DeliveryOutcome::Requeued);
    assert_eq!(harness.broker.stats(POST_QUEUE).await.unwrap().ready, 1);
    assert!(harness.drain_refresh_targets().await.is_empty());
    assert!(harness.publisher.published().is_empty());
    assert_eq!(harness.storage.followers_calls(), 1);

    // 存储恢复后重新投递即可完成扇出
    harness.storage.set_fail_followers(false);
    let outcome = harness.deliver_next(POST_QUEUE, &harness.post_consumer()).await;
    assert_eq!(outcome, DeliveryOutcome::Acked);
    assert_eq!(harness.storage.followers_calls(), 2);
    assert_eq!(harness.drain_refresh_targets().await, vec![2, 3]);
}

#[tokio::test]
async fn test_missing_followers_requeue_instead_of_dead_letter() {
    let harness = Harness::new(author_with_followers(&[2])).await;
    harness.storage.set_missing_followers(true);

    harness.feeds.publish_post(1, "t", "m").await.unwrap();
    let outcome = harness.deliver_next(POST_QUEUE, &harness.post_consumer()).await;

    assert_eq!(outcome, DeliveryOutcome::Requeued);
    let stats = harness.broker.stats(POST_QUEUE).await.unwrap();
    assert_eq!(stats.ready, 1);
    assert_eq!(stats.rejected, 0);

    harness.storage.set_missing_followers(false);
    let outcome = harness.deliver_next(POST_QUEUE, &harness.post_consumer()).await;
    assert_eq!(outcome, DeliveryOutcome::Acked);
    assert_eq!(harness.drain_refresh_targets().await, vec![2]);
}

#[tokio::test]
async fn test_malformed_payload_is_rejected() {
    let harness = Harness::new(SocialGraphBuilder::new()).await;
    harness.broker.publish(POST_QUEUE, b"{not json").await.unwrap();
    harness
        .broker
        .publish(POST_QUEUE, &TaskPayload::feed_refresh(1).encode().unwrap())
        .await
        .unwrap();

    let consumer = harness.post_consumer();
    assert_eq!(harness.deliver_next(POST_QUEUE, &consumer).await, DeliveryOutcome::Rejected);
    assert_eq!(harness.deliver_next(POST_QUEUE, &consumer).await, DeliveryOutcome::Rejected);

    let stats = harness.broker.stats(POST_QUEUE).await.unwrap();
    assert_eq!(stats.rejected, 2);
    assert_eq!(stats.ready, 0);
}

#[tokio::test]
async fn test_refresh_is_idempotent() {
    let builder = SocialGraphBuilder::new()
        .user(1, "a")
        .user(2, "b")
        .user(3, "c")
        .follows(1, 2)
        .follows(1, 3)
        .post(Post::new(1, 2, "x", "from b"))
        .post(Post::new(2, 3, "y", "from c"));
    let harness = Harness::new(builder).await;

    for _ in 0..2 {
        harness.feeds.enqueue_feed_refresh(1).await.unwrap();
    }

    let consumer = harness.feed_consumer();
    assert_eq!(harness.deliver_next(FEED_QUEUE, &consumer).await, DeliveryOutcome::Acked);
    let first = harness.cache.load(1).await.unwrap().unwrap();
    assert_eq!(harness.deliver_next(FEED_QUEUE, &consumer).await, DeliveryOutcome::Acked);
    let second = harness.cache.load(1).await.unwrap().unwrap();

    assert_eq!(first, second);
    assert_eq!(CachedFeed::decode(&first).unwrap().len(), 2);
}

#[tokio::test]
async fn test_feed_refresh_failure_requeues() {
    let harness = Harness::new(SocialGraphBuilder::new().user(1, "a")).await;
    harness.storage.set_fail_recent_posts(true);
    harness.feeds.enqueue_feed_refresh(1).await.unwrap();

    let outcome = harness.deliver_next(FEED_QUEUE, &harness.feed_consumer()).await;
    assert_eq!(outcome, DeliveryOutcome::Requeued);
    assert!(harness.cache.load(1).await.unwrap().is_none());
}

#[tokio::test]
async fn test_friend_changes_schedule_refresh() {
    let harness = Harness::new(SocialGraphBuilder::new().user(1, "a").user(2, "b")).await;

    harness.feeds.add_friend(1, 2).await.unwrap();
    harness.feeds.remove_friend(1, 2).await.unwrap();

    assert_eq!(harness.drain_refresh_targets().await, vec![1, 1]);
}

#[tokio::test]
async fn test_read_feed_populates_cache_on_miss() {
    let builder = SocialGraphBuilder::new()
        .user(1, "a")
        .user(2, "b")
        .follows(1, 2)
        .post(Post::new(7, 2, "t", "m"));
    let harness = Harness::new(builder).await;

    assert!(harness.cache.load(1).await.unwrap().is_none());
    let feed = harness.feeds.read_feed(1).await.unwrap();
    assert_eq!(feed.posts[0].id, 7);
    assert!(harness.cache.load(1).await.unwrap().is_some());

    // 缓存命中时不再访问存储
    harness.storage.set_fail_recent_posts(true);
    assert_eq!(harness.feeds.read_feed(1).await.unwrap(), feed);
}

#[tokio::test]
async fn test_queue_service_runs_pipeline_end_to_end() {
    let harness = Harness::new(author_with_followers(&[2, 3, 4])).await;
    let config = TaskQueueConfig {
        consumers_per_queue: 2,
        poll_interval_ms: 10,
        ..Default::default()
    };
    let mut service = QueueService::new(&config, harness.feeds.clone(), harness.publisher.clone());
    service.start().await.unwrap();

    harness.feeds.publish_post(1, "t", "m").await.unwrap();

    let cache = harness.cache.clone();
    let refreshed = TestEnv::wait_for(
        || {
            let cache = cache.clone();
            async move {
                let mut done = 0;
                for user in [2, 3, 4] {
                    if cache.load(user).await.unwrap().is_some() {
                        done += 1;
                    }
                }
                done == 3
            }
        },
        Duration::from_secs(5),
    )
    .await;
    assert!(refreshed);

    service.shutdown().await.unwrap();
    for (queue, stats) in service.stats().await.unwrap() {
        assert_eq!(stats.consumers, 0, "queue {queue} still has consumers");
        assert_eq!(stats.unacked, 0);
    }
    assert_eq!(harness.publisher.published().len(), 3);
}

#[tokio::test]
async fn test_post_events_reach_only_the_followers_shard() {
    let harness = Harness::new(author_with_followers(&[2, 3, 4, 5])).await;
    let bus = Arc::new(InMemoryEventBus::new());
    let shard_zero = Arc::new(CollectingEventSink::new());
    let shard_two = Arc::new(CollectingEventSink::new());
    bus.subscribe("00000", shard_zero.clone()).await;
    bus.subscribe("00002", shard_two.clone()).await;

    let task = feedline_domain::PostTask::new(Post::new(1, 1, "t", "m"));
    let report = PostConsumer::new(harness.feeds.clone(), bus.clone())
        .fan_out(&task)
        .await
        .unwrap();

    // 分片 00001 没有订阅者, 事件被丢弃但不算失败
    assert_eq!(report.notified, 4);
    assert!(report.failed.is_empty());

    let zero: Vec<i64> = shard_zero.events().iter().map(|e| e.user_id).collect();
    let mut two: Vec<i64> = shard_two.events().iter().map(|e| e.user_id).collect();
    two.sort_unstable();
    assert_eq!(zero, vec![3]);
    assert_eq!(two, vec![2, 5]);
    assert!(shard_zero.events()[0].message.contains("\"type\":\"post\""));
}

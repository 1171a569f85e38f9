//! 端口的测试替身
//!
//! 所有替身都记录调用，并可以按用户或按操作注入失败。

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use feedline_domain::{
    ChatMessage, CounterService, Event, EventPublisher, EventSink, Post, SocialStorage,
    UserEvent, UserProfile,
};
use feedline_errors::{FeedError, FeedResult};
use feedline_infrastructure::InMemorySocialStorage;

/// 在 [`InMemorySocialStorage`] 之上注入故障的存储
#[derive(Default)]
pub struct FlakySocialStorage {
    inner: Arc<InMemorySocialStorage>,
    failing_profiles: Mutex<HashSet<i64>>,
    fail_followers: AtomicBool,
    missing_followers: AtomicBool,
    fail_display_name: AtomicBool,
    fail_save_message: AtomicBool,
    fail_recent_posts: AtomicBool,
    followers_calls: AtomicUsize,
}

impl FlakySocialStorage {
    pub fn new(inner: Arc<InMemorySocialStorage>) -> Self {
        Self {
            inner,
            ..Default::default()
        }
    }

    pub fn inner(&self) -> &Arc<InMemorySocialStorage> {
        &self.inner
    }

    pub fn fail_profile_for(&self, user_id: i64) {
        self.failing_profiles.lock().unwrap().insert(user_id);
    }

    pub fn set_fail_followers(&self, fail: bool) {
        self.fail_followers.store(fail, Ordering::SeqCst);
    }

    /// 关注者查询返回 `NotFound`，模拟作者资料尚未同步
    pub fn set_missing_followers(&self, missing: bool) {
        self.missing_followers.store(missing, Ordering::SeqCst);
    }

    pub fn set_fail_display_name(&self, fail: bool) {
        self.fail_display_name.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_save_message(&self, fail: bool) {
        self.fail_save_message.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_recent_posts(&self, fail: bool) {
        self.fail_recent_posts.store(fail, Ordering::SeqCst);
    }

    pub fn followers_calls(&self) -> usize {
        self.followers_calls.load(Ordering::SeqCst)
    }

    fn injected(operation: &str) -> FeedError {
        FeedError::storage(format!("注入的故障: {operation}"))
    }
}

#[async_trait]
impl SocialStorage for FlakySocialStorage {
    async fn followers(&self, user_id: i64) -> FeedResult<Vec<i64>> {
        self.followers_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_followers.load(Ordering::SeqCst) {
            return Err(Self::injected("followers"));
        }
        if self.missing_followers.load(Ordering::SeqCst) {
            return Err(FeedError::not_found(format!("用户 {user_id} 的关注者")));
        }
        self.inner.followers(user_id).await
    }

    async fn friend_ids(&self, user_id: i64) -> FeedResult<Vec<i64>> {
        self.inner.friend_ids(user_id).await
    }

    async fn recent_posts_by_authors(&self, authors: &[i64], limit: usize) -> FeedResult<Vec<Post>> {
        if self.fail_recent_posts.load(Ordering::SeqCst) {
            return Err(Self::injected("recent_posts_by_authors"));
        }
        self.inner.recent_posts_by_authors(authors, limit).await
    }

    async fn profile(&self, user_id: i64) -> FeedResult<UserProfile> {
        if self.failing_profiles.lock().unwrap().contains(&user_id) {
            return Err(Self::injected("profile"));
        }
        self.inner.profile(user_id).await
    }

    async fn display_name(&self, user_id: i64) -> FeedResult<String> {
        if self.fail_display_name.load(Ordering::SeqCst) {
            return Err(Self::injected("display_name"));
        }
        self.inner.display_name(user_id).await
    }

    async fn create_post(&self, user_id: i64, title: &str, message: &str) -> FeedResult<Post> {
        self.inner.create_post(user_id, title, message).await
    }

    async fn add_friend(&self, user_id: i64, friend_id: i64) -> FeedResult<()> {
        self.inner.add_friend(user_id, friend_id).await
    }

    async fn remove_friend(&self, user_id: i64, friend_id: i64) -> FeedResult<()> {
        self.inner.remove_friend(user_id, friend_id).await
    }

    async fn save_chat_message(
        &self,
        chat_id: i64,
        from_id: i64,
        sent_at: DateTime<Utc>,
        text: &str,
    ) -> FeedResult<ChatMessage> {
        if self.fail_save_message.load(Ordering::SeqCst) {
            return Err(Self::injected("save_chat_message"));
        }
        self.inner.save_chat_message(chat_id, from_id, sent_at, text).await
    }
}

/// 计数服务调用参数 (user_id, message_id, chat_id)
pub type CounterCall = (i64, i64, i64);

/// 记录调用的计数服务
#[derive(Debug, Default)]
pub struct MockCounterService {
    increments: Mutex<Vec<CounterCall>>,
    compensations: Mutex<Vec<CounterCall>>,
    fail_increment: AtomicBool,
    fail_compensate: AtomicBool,
}

impl MockCounterService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_increment() -> Self {
        let counter = Self::default();
        counter.set_fail_increment(true);
        counter
    }

    pub fn set_fail_increment(&self, fail: bool) {
        self.fail_increment.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_compensate(&self, fail: bool) {
        self.fail_compensate.store(fail, Ordering::SeqCst);
    }

    pub fn increments(&self) -> Vec<CounterCall> {
        self.increments.lock().unwrap().clone()
    }

    pub fn compensations(&self) -> Vec<CounterCall> {
        self.compensations.lock().unwrap().clone()
    }
}

#[async_trait]
impl CounterService for MockCounterService {
    async fn increment_unread(&self, user_id: i64, message_id: i64, chat_id: i64) -> FeedResult<()> {
        self.increments.lock().unwrap().push((user_id, message_id, chat_id));
        if self.fail_increment.load(Ordering::SeqCst) {
            return Err(FeedError::remote_call("计数服务不可用"));
        }
        Ok(())
    }

    async fn compensate_increment(&self, user_id: i64, message_id: i64, chat_id: i64) -> FeedResult<()> {
        self.compensations.lock().unwrap().push((user_id, message_id, chat_id));
        if self.fail_compensate.load(Ordering::SeqCst) {
            return Err(FeedError::remote_call("计数补偿失败"));
        }
        Ok(())
    }
}

/// 一条已发布的事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedEvent {
    pub user_id: i64,
    pub routing_shard: String,
    pub event: Event,
}

/// 记录事件的发布端，可以让指定用户的发布失败
#[derive(Debug, Default)]
pub struct RecordingEventPublisher {
    published: Mutex<Vec<PublishedEvent>>,
    failing_users: Mutex<HashSet<i64>>,
}

impl RecordingEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_for(&self, user_id: i64) {
        self.failing_users.lock().unwrap().insert(user_id);
    }

    pub fn published(&self) -> Vec<PublishedEvent> {
        self.published.lock().unwrap().clone()
    }

    pub fn published_to(&self, user_id: i64) -> Vec<PublishedEvent> {
        self.published()
            .into_iter()
            .filter(|e| e.user_id == user_id)
            .collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingEventPublisher {
    async fn publish_event(&self, user_id: i64, routing_shard: &str, event: &Event) -> FeedResult<()> {
        if self.failing_users.lock().unwrap().contains(&user_id) {
            return Err(FeedError::event_bus(format!("注入的故障: 发布给用户 {user_id}")));
        }
        self.published.lock().unwrap().push(PublishedEvent {
            user_id,
            routing_shard: routing_shard.to_string(),
            event: event.clone(),
        });
        Ok(())
    }
}

/// 收集投递的事件
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: Mutex<Vec<UserEvent>>,
}

impl CollectingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<UserEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn deliver(&self, event: UserEvent) -> FeedResult<()> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

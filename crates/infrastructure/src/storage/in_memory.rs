use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use feedline_domain::{ChatMessage, Post, SocialStorage, UserProfile};
use feedline_errors::{FeedError, FeedResult};

#[derive(Debug, Default)]
struct State {
    users: HashMap<i64, UserProfile>,
    /// (user_id, friend_id)
    friends: BTreeSet<(i64, i64)>,
    posts: Vec<Post>,
    messages: Vec<ChatMessage>,
    next_post_id: i64,
    next_message_id: i64,
}

/// 进程内存储，用于单机运行和测试
#[derive(Debug, Default)]
pub struct InMemorySocialStorage {
    state: RwLock<State>,
}

impl InMemorySocialStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_user(&self, profile: UserProfile) {
        self.state.write().await.users.insert(profile.user_id, profile);
    }

    /// 直接写入一条动态，保留其ID和时间戳
    pub async fn insert_post(&self, post: Post) {
        let mut state = self.state.write().await;
        state.next_post_id = state.next_post_id.max(post.id);
        state.posts.push(post);
    }

    pub async fn chat_messages(&self, chat_id: i64) -> Vec<ChatMessage> {
        self.state
            .read()
            .await
            .messages
            .iter()
            .filter(|m| m.chat_id == chat_id)
            .cloned()
            .collect()
    }

    fn require_user(state: &State, user_id: i64) -> FeedResult<&UserProfile> {
        state
            .users
            .get(&user_id)
            .ok_or_else(|| FeedError::not_found(format!("用户 {user_id} 不存在")))
    }
}

#[async_trait]
impl SocialStorage for InMemorySocialStorage {
    async fn followers(&self, user_id: i64) -> FeedResult<Vec<i64>> {
        let state = self.state.read().await;
        Ok(state
            .friends
            .iter()
            .filter(|(_, friend)| *friend == user_id)
            .map(|(user, _)| *user)
            .collect())
    }

    async fn friend_ids(&self, user_id: i64) -> FeedResult<Vec<i64>> {
        let state = self.state.read().await;
        Ok(state
            .friends
            .range((user_id, i64::MIN)..=(user_id, i64::MAX))
            .map(|(_, friend)| *friend)
            .collect())
    }

    async fn recent_posts_by_authors(&self, authors: &[i64], limit: usize) -> FeedResult<Vec<Post>> {
        let state = self.state.read().await;
        let mut posts: Vec<Post> = state
            .posts
            .iter()
            .filter(|p| !p.deleted && authors.contains(&p.user_id))
            .cloned()
            .collect();
        posts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        posts.truncate(limit);
        Ok(posts)
    }

    async fn profile(&self, user_id: i64) -> FeedResult<UserProfile> {
        let state = self.state.read().await;
        Self::require_user(&state, user_id).cloned()
    }

    async fn display_name(&self, user_id: i64) -> FeedResult<String> {
        let state = self.state.read().await;
        Ok(Self::require_user(&state, user_id)?.display_name.clone())
    }

    async fn create_post(&self, user_id: i64, title: &str, message: &str) -> FeedResult<Post> {
        let mut state = self.state.write().await;
        Self::require_user(&state, user_id)?;
        state.next_post_id += 1;
        let post = Post::new(state.next_post_id, user_id, title, message);
        state.posts.push(post.clone());
        Ok(post)
    }

    async fn add_friend(&self, user_id: i64, friend_id: i64) -> FeedResult<()> {
        let mut state = self.state.write().await;
        Self::require_user(&state, user_id)?;
        Self::require_user(&state, friend_id)?;
        state.friends.insert((user_id, friend_id));
        Ok(())
    }

    async fn remove_friend(&self, user_id: i64, friend_id: i64) -> FeedResult<()> {
        self.state.write().await.friends.remove(&(user_id, friend_id));
        Ok(())
    }

    async fn save_chat_message(
        &self,
        chat_id: i64,
        from_id: i64,
        sent_at: DateTime<Utc>,
        text: &str,
    ) -> FeedResult<ChatMessage> {
        let mut state = self.state.write().await;
        Self::require_user(&state, from_id)?;
        state.next_message_id += 1;
        let message = ChatMessage {
            id: state.next_message_id,
            chat_id,
            user_from: from_id,
            send_at: sent_at,
            message: text.to_string(),
        };
        state.messages.push(message.clone());
        Ok(message)
    }
}

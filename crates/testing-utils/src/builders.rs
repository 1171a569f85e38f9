//! 测试数据构建器

use std::sync::Arc;

use feedline_domain::{Post, SocialStorage, UserProfile};
use feedline_infrastructure::InMemorySocialStorage;

/// 构建带有用户、好友关系和动态的内存存储
///
/// ```ignore
/// let storage = SocialGraphBuilder::new()
///     .user(1, "alice")
///     .user(2, "bob")
///     .follows(2, 1)
///     .post(Post::new(1, 1, "hi", "first"))
///     .build()
///     .await;
/// ```
#[derive(Default)]
pub struct SocialGraphBuilder {
    users: Vec<UserProfile>,
    friendships: Vec<(i64, i64)>,
    posts: Vec<Post>,
}

impl SocialGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 默认分片 `00000`
    pub fn user(self, user_id: i64, name: &str) -> Self {
        self.user_on_shard(user_id, name, "00000")
    }

    pub fn user_on_shard(mut self, user_id: i64, name: &str, shard_id: &str) -> Self {
        self.users.push(UserProfile {
            user_id,
            display_name: name.to_string(),
            shard_id: shard_id.to_string(),
        });
        self
    }

    /// `follower` 把 `author` 加为好友
    pub fn follows(mut self, follower: i64, author: i64) -> Self {
        self.friendships.push((follower, author));
        self
    }

    pub fn post(mut self, post: Post) -> Self {
        self.posts.push(post);
        self
    }

    pub async fn build(self) -> Arc<InMemorySocialStorage> {
        let storage = Arc::new(InMemorySocialStorage::new());
        for user in self.users {
            storage.insert_user(user).await;
        }
        for (follower, author) in self.friendships {
            storage
                .add_friend(follower, author)
                .await
                .expect("friendship between registered users");
        }
        for post in self.posts {
            storage.insert_post(post).await;
        }
        storage
    }
}

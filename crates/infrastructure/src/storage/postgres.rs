use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::{debug, info};

use feedline_config::StorageConfig;
use feedline_domain::{ChatMessage, Post, SocialStorage, UserProfile};
use feedline_errors::{FeedError, FeedResult};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id BIGSERIAL PRIMARY KEY,
        name TEXT NOT NULL,
        shard_id TEXT NOT NULL DEFAULT '00000'
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS friends (
        user_id BIGINT NOT NULL REFERENCES users (id),
        friend_id BIGINT NOT NULL REFERENCES users (id),
        PRIMARY KEY (user_id, friend_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS posts (
        id BIGSERIAL PRIMARY KEY,
        user_id BIGINT NOT NULL REFERENCES users (id),
        title TEXT NOT NULL,
        message TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        deleted BOOLEAN NOT NULL DEFAULT FALSE
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_posts_user_created ON posts (user_id, created_at DESC)",
    r#"
    CREATE TABLE IF NOT EXISTS chat_messages (
        id BIGSERIAL PRIMARY KEY,
        chat_id BIGINT NOT NULL,
        user_from BIGINT NOT NULL REFERENCES users (id),
        send_at TIMESTAMPTZ NOT NULL,
        message TEXT NOT NULL
    )
    "#,
];

const POST_COLUMNS: &str = "id, user_id, title, message, created_at, updated_at, deleted";

/// PostgreSQL存储实现
pub struct PostgresSocialStorage {
    pool: PgPool,
}

impl PostgresSocialStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(config: &StorageConfig) -> FeedResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
            .connect(&config.database_url)
            .await?;
        info!("已连接到PostgreSQL, 最大连接数: {}", config.max_connections);
        Ok(Self::new(pool))
    }

    /// 创建缺失的表
    pub async fn ensure_schema(&self) -> FeedResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("数据库表结构已就绪");
        Ok(())
    }

    fn map_post(row: &PgRow) -> FeedResult<Post> {
        Ok(Post {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            title: row.try_get("title")?,
            message: row.try_get("message")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            deleted: row.try_get("deleted")?,
        })
    }

    async fn ids(&self, sql: &str, user_id: i64) -> FeedResult<Vec<i64>> {
        let rows = sqlx::query(sql).bind(user_id).fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| row.try_get::<i64, _>(0).map_err(FeedError::from))
            .collect()
    }
}

#[async_trait]
impl SocialStorage for PostgresSocialStorage {
    async fn followers(&self, user_id: i64) -> FeedResult<Vec<i64>> {
        self.ids(
            "SELECT user_id FROM friends WHERE friend_id = $1 ORDER BY user_id",
            user_id,
        )
        .await
    }

    async fn friend_ids(&self, user_id: i64) -> FeedResult<Vec<i64>> {
        self.ids(
            "SELECT friend_id FROM friends WHERE user_id = $1 ORDER BY friend_id",
            user_id,
        )
        .await
    }

    async fn recent_posts_by_authors(&self, authors: &[i64], limit: usize) -> FeedResult<Vec<Post>> {
        if authors.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {POST_COLUMNS} FROM posts WHERE user_id = ANY($1) AND NOT deleted \
             ORDER BY created_at DESC, id DESC LIMIT $2"
        );
        let rows = sqlx::query(&sql)
            .bind(authors)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::map_post).collect()
    }

    async fn profile(&self, user_id: i64) -> FeedResult<UserProfile> {
        let row = sqlx::query("SELECT id, name, shard_id FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| FeedError::not_found(format!("用户 {user_id} 不存在")))?;
        Ok(UserProfile {
            user_id: row.try_get("id")?,
            display_name: row.try_get("name")?,
            shard_id: row.try_get("shard_id")?,
        })
    }

    async fn display_name(&self, user_id: i64) -> FeedResult<String> {
        sqlx::query_scalar::<_, String>("SELECT name FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| FeedError::not_found(format!("用户 {user_id} 不存在")))
    }

    async fn create_post(&self, user_id: i64, title: &str, message: &str) -> FeedResult<Post> {
        let sql = format!(
            "INSERT INTO posts (user_id, title, message) VALUES ($1, $2, $3) RETURNING {POST_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(user_id)
            .bind(title)
            .bind(message)
            .fetch_one(&self.pool)
            .await?;
        Self::map_post(&row)
    }

    async fn add_friend(&self, user_id: i64, friend_id: i64) -> FeedResult<()> {
        sqlx::query(
            "INSERT INTO friends (user_id, friend_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(user_id)
        .bind(friend_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_friend(&self, user_id: i64, friend_id: i64) -> FeedResult<()> {
        sqlx::query("DELETE FROM friends WHERE user_id = $1 AND friend_id = $2")
            .bind(user_id)
            .bind(friend_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn save_chat_message(
        &self,
        chat_id: i64,
        from_id: i64,
        sent_at: DateTime<Utc>,
        text: &str,
    ) -> FeedResult<ChatMessage> {
        let row = sqlx::query(
            "INSERT INTO chat_messages (chat_id, user_from, send_at, message) \
             VALUES ($1, $2, $3, $4) RETURNING id",
        )
        .bind(chat_id)
        .bind(from_id)
        .bind(sent_at)
        .bind(text)
        .fetch_one(&self.pool)
        .await?;

        Ok(ChatMessage {
            id: row.try_get("id")?,
            chat_id,
            user_from: from_id,
            send_at: sent_at,
            message: text.to_string(),
        })
    }
}

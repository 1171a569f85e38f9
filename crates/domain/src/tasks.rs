use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entities::Post;
use feedline_errors::{FeedError, FeedResult};

/// 新动态扇出队列
pub const POST_QUEUE: &str = "post";
/// 动态缓存重建队列
pub const FEED_QUEUE: &str = "feed";

/// 新动态扇出任务
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostTask {
    pub post: Post,
    pub enqueued_at: DateTime<Utc>,
}

impl PostTask {
    pub fn new(post: Post) -> Self {
        Self {
            post,
            enqueued_at: Utc::now(),
        }
    }
}

/// 单个用户的动态缓存重建任务，重复执行结果相同
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedRefreshTask {
    pub user_id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Post,
    FeedRefresh,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Post => "post",
            TaskKind::FeedRefresh => "feed_refresh",
        }
    }

    fn parse(kind: &str) -> Option<Self> {
        match kind {
            "post" => Some(TaskKind::Post),
            "feed_refresh" => Some(TaskKind::FeedRefresh),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 队列载荷的线上格式：`{"kind": "...", "data": {...}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum TaskPayload {
    Post(PostTask),
    FeedRefresh(FeedRefreshTask),
}

#[derive(Deserialize)]
struct KindHeader {
    kind: String,
}

impl TaskPayload {
    pub fn post(post: Post) -> Self {
        TaskPayload::Post(PostTask::new(post))
    }

    pub fn feed_refresh(user_id: i64) -> Self {
        TaskPayload::FeedRefresh(FeedRefreshTask { user_id })
    }

    pub fn kind(&self) -> TaskKind {
        match self {
            TaskPayload::Post(_) => TaskKind::Post,
            TaskPayload::FeedRefresh(_) => TaskKind::FeedRefresh,
        }
    }

    pub fn encode(&self) -> FeedResult<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| FeedError::Serialization(format!("序列化任务载荷失败: {e}")))
    }

    pub fn decode(bytes: &[u8]) -> FeedResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| FeedError::malformed(format!("{e}")))
    }

    /// 只解析判别字段，不反序列化数据部分
    pub fn peek_kind(bytes: &[u8]) -> FeedResult<TaskKind> {
        let header: KindHeader =
            serde_json::from_slice(bytes).map_err(|e| FeedError::malformed(format!("{e}")))?;
        TaskKind::parse(&header.kind)
            .ok_or_else(|| FeedError::malformed(format!("未知的任务类型: {}", header.kind)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_format_is_tagged() {
        let bytes = TaskPayload::feed_refresh(42).encode().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value, json!({"kind": "feed_refresh", "data": {"user_id": 42}}));
    }

    #[test]
    fn test_peek_kind_without_full_decode() {
        // data部分不完整，但判别字段可读
        let bytes = br#"{"kind":"post","data":{"post":{"id":1}}}"#;
        assert_eq!(TaskPayload::peek_kind(bytes).unwrap(), TaskKind::Post);
        assert!(matches!(
            TaskPayload::decode(bytes),
            Err(FeedError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_unknown_kind_is_malformed() {
        let err = TaskPayload::peek_kind(br#"{"kind":"resize","data":{}}"#).unwrap_err();
        assert!(matches!(err, FeedError::MalformedPayload(_)));
        assert!(TaskPayload::peek_kind(b"not json").is_err());
    }

    #[test]
    fn test_post_task_decodes() {
        let payload = TaskPayload::post(Post::new(5, 9, "hello", "world"));
        let decoded = TaskPayload::decode(&payload.encode().unwrap()).unwrap();
        assert_eq!(decoded.kind(), TaskKind::Post);
        match decoded {
            TaskPayload::Post(task) => assert_eq!(task.post.user_id, 9),
            other => panic!("unexpected payload: {other:?}"),
        }
    }
}

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("存储错误: {0}")]
    Storage(String),
    #[error("缓存错误: {0}")]
    Cache(String),
    #[error("任务队列错误: {0}")]
    TaskQueue(String),
    #[error("事件总线错误: {0}")]
    EventBus(String),
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("无效的任务载荷: {0}")]
    MalformedPayload(String),
    #[error("未知队列: {0}")]
    UnknownQueue(String),
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("网络错误: {0}")]
    Network(String),
    #[error("远程调用失败: {0}")]
    RemoteCall(String),
    #[error("未找到: {0}")]
    NotFound(String),
    #[error("Saga '{saga}' 在步骤 '{step}' 失败: {source}")]
    SagaStepFailed {
        saga: String,
        step: String,
        #[source]
        source: Box<FeedError>,
    },
    #[error("组件已关闭: {0}")]
    Shutdown(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type FeedResult<T> = Result<T, FeedError>;

impl FeedError {
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        Self::Storage(msg.into())
    }
    pub fn cache<S: Into<String>>(msg: S) -> Self {
        Self::Cache(msg.into())
    }
    pub fn task_queue<S: Into<String>>(msg: S) -> Self {
        Self::TaskQueue(msg.into())
    }
    pub fn event_bus<S: Into<String>>(msg: S) -> Self {
        Self::EventBus(msg.into())
    }
    pub fn malformed<S: Into<String>>(msg: S) -> Self {
        Self::MalformedPayload(msg.into())
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }
    pub fn remote_call<S: Into<String>>(msg: S) -> Self {
        Self::RemoteCall(msg.into())
    }
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    /// 瞬时的基础设施错误，可通过重连或重新投递恢复
    pub fn is_retryable(&self) -> bool {
        match self {
            FeedError::Storage(_)
            | FeedError::Cache(_)
            | FeedError::TaskQueue(_)
            | FeedError::EventBus(_)
            | FeedError::Network(_)
            | FeedError::RemoteCall(_) => true,
            FeedError::SagaStepFailed { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FeedError::Configuration(_) | FeedError::Internal(_)
        )
    }

    /// 失败的Saga步骤名称
    pub fn failed_step(&self) -> Option<&str> {
        match self {
            FeedError::SagaStepFailed { step, .. } => Some(step.as_str()),
            _ => None,
        }
    }

    pub fn user_message(&self) -> &str {
        match self {
            FeedError::NotFound(_) => "请求的资源不存在",
            FeedError::MalformedPayload(_) => "请求数据格式有误",
            FeedError::SagaStepFailed { .. } => "消息发送失败，请稍后重试",
            FeedError::Shutdown(_) => "服务正在关闭，请稍后重试",
            _ => "系统繁忙，请稍后重试",
        }
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(err: serde_json::Error) -> Self {
        FeedError::Serialization(err.to_string())
    }
}

impl From<redis::RedisError> for FeedError {
    fn from(err: redis::RedisError) -> Self {
        FeedError::TaskQueue(format!("Redis: {err}"))
    }
}

impl From<lapin::Error> for FeedError {
    fn from(err: lapin::Error) -> Self {
        FeedError::EventBus(format!("RabbitMQ: {err}"))
    }
}

impl From<sqlx::Error> for FeedError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => FeedError::NotFound("记录不存在".to_string()),
            other => FeedError::Storage(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for FeedError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            FeedError::Network(err.to_string())
        } else {
            FeedError::RemoteCall(err.to_string())
        }
    }
}

impl From<anyhow::Error> for FeedError {
    fn from(err: anyhow::Error) -> Self {
        FeedError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(FeedError::task_queue("redis down").is_retryable());
        assert!(FeedError::cache("timeout").is_retryable());
        assert!(!FeedError::malformed("bad json").is_retryable());
        assert!(!FeedError::config_error("missing url").is_retryable());
    }

    #[test]
    fn test_saga_error_reports_step() {
        let err = FeedError::SagaStepFailed {
            saga: "new_message".to_string(),
            step: "increment_unread".to_string(),
            source: Box::new(FeedError::remote_call("counter unavailable")),
        };
        assert_eq!(err.failed_step(), Some("increment_unread"));
        assert!(err.is_retryable());
        let text = err.to_string();
        assert!(text.contains("increment_unread"));
        assert!(text.contains("counter unavailable"));
    }

    #[test]
    fn test_serde_error_conversion() {
        let err: FeedError = serde_json::from_str::<serde_json::Value>("{oops")
            .unwrap_err()
            .into();
        assert!(matches!(err, FeedError::Serialization(_)));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_user_message() {
        assert_eq!(FeedError::not_found("user 7").user_message(), "请求的资源不存在");
        assert_eq!(FeedError::Internal("x".into()).user_message(), "系统繁忙，请稍后重试");
    }
}

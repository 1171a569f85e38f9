use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use feedline_domain::CounterService;
use feedline_errors::{FeedError, FeedResult};

#[derive(Debug, Serialize)]
struct CounterRequest {
    user_id: i64,
    message_id: i64,
    chat_id: i64,
}

/// 远程未读计数服务的HTTP客户端
pub struct HttpCounterService {
    client: Client,
    base_url: String,
}

impl HttpCounterService {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> FeedResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FeedError::config_error(format!("创建HTTP客户端失败: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn call(&self, path: &str, request: &CounterRequest) -> FeedResult<()> {
        let url = format!("{}{}", self.base_url, path);
        self.client
            .post(&url)
            .json(request)
            .send()
            .await?
            .error_for_status()?;
        debug!("计数服务调用成功: {} {:?}", path, request);
        Ok(())
    }
}

#[async_trait]
impl CounterService for HttpCounterService {
    async fn increment_unread(&self, user_id: i64, message_id: i64, chat_id: i64) -> FeedResult<()> {
        self.call(
            "/counter/increment",
            &CounterRequest { user_id, message_id, chat_id },
        )
        .await
    }

    async fn compensate_increment(&self, user_id: i64, message_id: i64, chat_id: i64) -> FeedResult<()> {
        self.call(
            "/counter/compensate",
            &CounterRequest { user_id, message_id, chat_id },
        )
        .await
    }
}

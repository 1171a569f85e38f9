use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::validation::{require_positive, require_scheme, ConfigValidator};
use crate::ConfigResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// 未读计数服务地址，为空时使用进程内计数器
    pub counter_url: Option<String>,
    pub request_timeout_seconds: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            counter_url: None,
            request_timeout_seconds: 5,
        }
    }
}

impl ChatConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

impl ConfigValidator for ChatConfig {
    fn validate(&self) -> ConfigResult<()> {
        if let Some(url) = &self.counter_url {
            require_scheme("chat.counter_url", url, &["http", "https"])?;
        }
        require_positive("chat.request_timeout_seconds", self.request_timeout_seconds)
    }
}

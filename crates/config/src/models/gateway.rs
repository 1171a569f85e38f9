use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::validation::{require_positive, ConfigValidator};
use crate::{ConfigError, ConfigResult};

/// 推送网关配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub bind_address: String,
    /// 每个连接的待发送消息缓冲
    pub outbound_buffer: usize,
    pub command_buffer: usize,
    pub idle_timeout_seconds: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            outbound_buffer: 64,
            command_buffer: 1024,
            idle_timeout_seconds: 60,
        }
    }
}

impl GatewayConfig {
    pub fn socket_addr(&self) -> ConfigResult<SocketAddr> {
        self.bind_address
            .parse()
            .map_err(|e| ConfigError::Validation(format!("gateway.bind_address 无效: {e}")))
    }
}

impl ConfigValidator for GatewayConfig {
    fn validate(&self) -> ConfigResult<()> {
        self.socket_addr()?;
        require_positive("gateway.outbound_buffer", self.outbound_buffer as u64)?;
        require_positive("gateway.command_buffer", self.command_buffer as u64)?;
        require_positive("gateway.idle_timeout_seconds", self.idle_timeout_seconds)?;
        Ok(())
    }
}

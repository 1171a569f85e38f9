use serde::{Deserialize, Serialize};

use crate::validation::{require_positive, require_scheme, ConfigValidator};
use crate::ConfigResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Postgres,
    InMemory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub database_url: String,
    pub max_connections: u32,
    pub connection_timeout_seconds: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Postgres,
            database_url: "postgresql://localhost/feedline".to_string(),
            max_connections: 10,
            connection_timeout_seconds: 30,
        }
    }
}

impl ConfigValidator for StorageConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.backend == StorageBackend::Postgres {
            require_scheme(
                "storage.database_url",
                &self.database_url,
                &["postgres", "postgresql"],
            )?;
            require_positive("storage.max_connections", self.max_connections as u64)?;
        }
        Ok(())
    }
}

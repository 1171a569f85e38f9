use crate::{ConfigError, ConfigResult};

/// 配置段自检
pub trait ConfigValidator {
    fn validate(&self) -> ConfigResult<()>;
}

pub(crate) fn require_non_empty(field: &str, value: &str) -> ConfigResult<()> {
    if value.trim().is_empty() {
        return Err(ConfigError::Validation(format!("{field} 不能为空")));
    }
    Ok(())
}

pub(crate) fn require_positive(field: &str, value: u64) -> ConfigResult<()> {
    if value == 0 {
        return Err(ConfigError::Validation(format!("{field} 必须大于0")));
    }
    Ok(())
}

pub(crate) fn require_scheme(field: &str, value: &str, schemes: &[&str]) -> ConfigResult<()> {
    if !schemes.iter().any(|scheme| value.starts_with(&format!("{scheme}://"))) {
        return Err(ConfigError::Validation(format!(
            "{field} 必须以 {} 开头: {value}",
            schemes.join("/")
        )));
    }
    Ok(())
}

//! 统一错误模型
//! 启动阶段（配置、主机清单、参数）的错误类型
//!
//! 单个会话的错误见 [`crate::session::RunnerError`]，它们只影响对应主机，不会上升到这里。

use thiserror::Error;

/// 应用错误类型
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Host list error: {0}")]
    Inventory(String),

    #[error("No matching hosts found in host list {0}")]
    NoTargets(String),

    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),
}

impl AppError {
    /// 进程退出码
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::InvalidArgs(_) => 2,
            _ => 1,
        }
    }
}

/// 从 config::ConfigError 转换
impl From<config::ConfigError> for AppError {
    fn from(e: config::ConfigError) -> Self {
        AppError::Config(e.to_string())
    }
}

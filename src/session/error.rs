//! 会话错误

use thiserror::Error;

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// 构建/连接阶段失败：地址非法、拨号、认证、打开会话
    Construction,
    /// 执行阶段失败：远端命令失败或传输中断
    Execution,
    /// 被 kill 终止，不算作执行错误
    Killed,
}

/// 单个主机会话的错误
#[derive(Debug, Clone, Error)]
pub enum RunnerError {
    #[error("{address}: invalid target: {reason}")]
    InvalidTarget { address: String, reason: String },

    #[error("{address}: connect failed: {reason}")]
    Connect { address: String, reason: String },

    #[error("{address}: authentication failed: {reason}")]
    Authenticate { address: String, reason: String },

    #[error("{address}: failed to open session: {reason}")]
    SessionOpen { address: String, reason: String },

    #[error("{address}: failed to run command: {reason}")]
    Run { address: String, reason: String },

    #[error("{address}: process exited with status {status}")]
    ExitStatus { address: String, status: u32 },

    #[error("{address}: process exited with signal {signal}")]
    ExitSignal { address: String, signal: String },

    #[error("{address}: session already started")]
    AlreadyStarted { address: String },

    #[error("{address}: killed")]
    Killed { address: String },
}

impl RunnerError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            RunnerError::InvalidTarget { .. }
            | RunnerError::Connect { .. }
            | RunnerError::Authenticate { .. }
            | RunnerError::SessionOpen { .. } => ErrorCategory::Construction,
            RunnerError::Run { .. }
            | RunnerError::ExitStatus { .. }
            | RunnerError::ExitSignal { .. }
            | RunnerError::AlreadyStarted { .. } => ErrorCategory::Execution,
            RunnerError::Killed { .. } => ErrorCategory::Killed,
        }
    }

    pub fn is_killed(&self) -> bool {
        self.category() == ErrorCategory::Killed
    }

    /// 出错的主机地址
    pub fn address(&self) -> &str {
        match self {
            RunnerError::InvalidTarget { address, .. }
            | RunnerError::Connect { address, .. }
            | RunnerError::Authenticate { address, .. }
            | RunnerError::SessionOpen { address, .. }
            | RunnerError::Run { address, .. }
            | RunnerError::ExitStatus { address, .. }
            | RunnerError::ExitSignal { address, .. }
            | RunnerError::AlreadyStarted { address }
            | RunnerError::Killed { address } => address,
        }
    }
}

/// 会话结束时读取输出流返回的错误
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("stream ended")]
pub struct StreamEnded;

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> String {
        "10.0.0.1:22".to_string()
    }

    #[test]
    fn test_categories() {
        let reason = "x".to_string();
        assert_eq!(
            RunnerError::Connect { address: addr(), reason: reason.clone() }.category(),
            ErrorCategory::Construction
        );
        assert_eq!(
            RunnerError::Authenticate { address: addr(), reason: reason.clone() }.category(),
            ErrorCategory::Construction
        );
        assert_eq!(
            RunnerError::SessionOpen { address: addr(), reason: reason.clone() }.category(),
            ErrorCategory::Construction
        );
        assert_eq!(
            RunnerError::Run { address: addr(), reason }.category(),
            ErrorCategory::Execution
        );
        assert_eq!(
            RunnerError::ExitStatus { address: addr(), status: 2 }.category(),
            ErrorCategory::Execution
        );
        assert!(RunnerError::Killed { address: addr() }.is_killed());
    }

    #[test]
    fn test_messages_name_the_host() {
        let err = RunnerError::ExitStatus { address: addr(), status: 127 };
        assert_eq!(err.to_string(), "10.0.0.1:22: process exited with status 127");
        assert_eq!(err.address(), "10.0.0.1:22");
    }
}

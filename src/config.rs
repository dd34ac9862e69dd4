//! 配置系统
//! 默认值 → 当前目录下可选的 multicmd.toml → 以 MULTICMD_ 为前缀的环境变量

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::dispatch::DispatchOptions;
use crate::ssh::{HostKeyVerification, KnownHosts, SshSettings};

/// 可选配置文件名（不带扩展名）
pub const CONFIG_FILE: &str = "multicmd";

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别: trace, debug, info, warn, error
    pub level: String,
    /// 日志格式: json, pretty, compact
    pub format: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SshConfig {
    /// 拨号与握手超时（秒），0 表示不限制
    pub connect_timeout_secs: u64,
    /// 主机密钥验证策略
    pub host_key_verification: HostKeyVerification,
    /// 已知主机指纹文件
    #[serde(default)]
    pub known_hosts_file: Option<PathBuf>,
    /// kill 等待会话拆除的时长（毫秒）
    pub kill_grace_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// 单主机超时（秒），非正数表示不限制
    pub timeout_secs: i64,
    /// 并发会话上限，0 表示不限制
    pub max_parallel: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// 是否彩色输出
    pub color: bool,
    /// 是否对输出脱敏；按输出块逐块处理，跨越 1 KiB 块边界的敏感内容不会被遮盖
    pub redact: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub ssh: SshConfig,
    pub dispatch: DispatchConfig,
    pub output: OutputConfig,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    pub fn load() -> Result<Self, ConfigError> {
        let mut settings = Config::builder();

        // 添加默认配置
        settings = settings
            .set_default("logging.level", "warn")?
            .set_default("logging.format", "compact")?
            .set_default("ssh.connect_timeout_secs", 10)?
            .set_default("ssh.host_key_verification", "disabled")?
            .set_default("ssh.kill_grace_ms", 2000)?
            .set_default("dispatch.timeout_secs", -1)?
            .set_default("dispatch.max_parallel", 0)?
            .set_default("output.color", true)?
            .set_default("output.redact", false)?;

        settings = settings.add_source(File::with_name(CONFIG_FILE).required(false));

        // 从环境变量加载配置（前缀为 MULTICMD_）
        settings = settings.add_source(
            Environment::with_prefix("MULTICMD")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = settings.build()?.try_deserialize()?;

        // 验证配置
        config.validate()?;

        Ok(config)
    }

    /// 验证配置合法性
    fn validate(&self) -> Result<(), ConfigError> {
        // 验证日志级别
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ConfigError::Message(format!(
                    "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                    self.logging.level
                )))
            }
        }

        // 验证日志格式
        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" | "compact" => {}
            _ => {
                return Err(ConfigError::Message(format!(
                    "Invalid log format: {}. Must be one of: json, pretty, compact",
                    self.logging.format
                )))
            }
        }

        if self.ssh.kill_grace_ms == 0 {
            return Err(ConfigError::Message("ssh.kill_grace_ms must be > 0".to_string()));
        }

        if self.ssh.host_key_verification == HostKeyVerification::Strict
            && self.ssh.known_hosts_file.is_none()
        {
            return Err(ConfigError::Message(
                "strict host key verification requires ssh.known_hosts_file".to_string(),
            ));
        }

        Ok(())
    }

    /// SSH 连接参数；配置了指纹文件时读取它
    pub fn ssh_settings(&self) -> Result<SshSettings, crate::error::AppError> {
        let known_hosts = match &self.ssh.known_hosts_file {
            Some(path) => KnownHosts::load(path)?,
            None => KnownHosts::default(),
        };

        Ok(SshSettings {
            connect_timeout: (self.ssh.connect_timeout_secs > 0)
                .then(|| Duration::from_secs(self.ssh.connect_timeout_secs)),
            host_key_verification: self.ssh.host_key_verification,
            known_hosts: Arc::new(known_hosts),
        })
    }

    /// 分发参数
    pub fn dispatch_options(&self) -> DispatchOptions {
        DispatchOptions::default()
            .with_timeout_secs(self.dispatch.timeout_secs)
            .with_max_parallel(self.dispatch.max_parallel)
            .with_kill_grace(Duration::from_millis(self.ssh.kill_grace_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "MULTICMD_LOGGING__LEVEL",
        "MULTICMD_LOGGING__FORMAT",
        "MULTICMD_SSH__HOST_KEY_VERIFICATION",
        "MULTICMD_SSH__KILL_GRACE_MS",
        "MULTICMD_DISPATCH__TIMEOUT_SECS",
        "MULTICMD_DISPATCH__MAX_PARALLEL",
    ];

    fn clear_env() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_config_defaults() {
        clear_env();

        let config = AppConfig::load().unwrap();
        assert_eq!(config.logging.level, "warn");
        assert_eq!(config.ssh.connect_timeout_secs, 10);
        assert_eq!(config.ssh.host_key_verification, HostKeyVerification::Disabled);
        assert_eq!(config.dispatch.timeout_secs, -1);
        assert!(config.output.color);

        let options = config.dispatch_options();
        assert_eq!(options.timeout, None);
        assert_eq!(options.max_parallel, 0);
        assert_eq!(options.kill_grace, Duration::from_millis(2000));
    }

    #[test]
    #[serial]
    fn test_config_from_env() {
        clear_env();
        std::env::set_var("MULTICMD_DISPATCH__TIMEOUT_SECS", "30");
        std::env::set_var("MULTICMD_DISPATCH__MAX_PARALLEL", "4");
        std::env::set_var("MULTICMD_SSH__HOST_KEY_VERIFICATION", "accept");

        let config = AppConfig::load().unwrap();
        let options = config.dispatch_options();
        assert_eq!(options.timeout, Some(Duration::from_secs(30)));
        assert_eq!(options.max_parallel, 4);
        assert_eq!(config.ssh.host_key_verification, HostKeyVerification::Accept);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_config_validation_invalid_log_level() {
        clear_env();
        std::env::set_var("MULTICMD_LOGGING__LEVEL", "loud");

        assert!(AppConfig::load().is_err());

        clear_env();
    }

    #[test]
    #[serial]
    fn test_config_validation_strict_needs_known_hosts() {
        clear_env();
        std::env::set_var("MULTICMD_SSH__HOST_KEY_VERIFICATION", "strict");

        assert!(AppConfig::load().is_err());

        clear_env();
    }

    #[test]
    #[serial]
    fn test_config_validation_zero_kill_grace() {
        clear_env();
        std::env::set_var("MULTICMD_SSH__KILL_GRACE_MS", "0");

        assert!(AppConfig::load().is_err());

        clear_env();
    }
}

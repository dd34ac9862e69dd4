//! 日志与追踪系统
//! 初始化结构化日志；日志写到 stderr，stdout 只留给各主机的输出

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LoggingConfig;

/// 初始化日志与追踪系统
///
/// `RUST_LOG` 优先于配置中的级别。`verbose` 至少打开 debug 级别。
pub fn init_telemetry(config: &LoggingConfig, verbose: bool) {
    let level = if verbose && !matches!(config.level.as_str(), "trace" | "debug") {
        "debug"
    } else {
        config.level.as_str()
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // 根据配置选择日志格式
    let log_layer = match config.format.to_lowercase().as_str() {
        "json" => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(false)
            .boxed(),
        "pretty" => tracing_subscriber::fmt::layer()
            .pretty()
            .with_writer(std::io::stderr)
            .with_target(false)
            .boxed(),
        _ => tracing_subscriber::fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(false)
            .boxed(),
    };

    // 重复初始化（例如测试中）时保留已有的 subscriber
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(log_layer)
        .try_init();

    tracing::debug!(
        version = env!("CARGO_PKG_VERSION"),
        level = %level,
        format = %config.format,
        "Telemetry initialized"
    );
}

/// 初始化指标收集器
pub fn init_metrics() {
    // 未安装导出器时 metrics 宏为空操作
    tracing::debug!("Metrics initialized");
}

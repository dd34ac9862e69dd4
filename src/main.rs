//! multicmd 主入口

use std::sync::Arc;

use clap::Parser;
use multicmd::{
    cli::Args,
    concurrency::CancellationController,
    config::AppConfig,
    error::AppError,
    fanout::FanOut,
    inventory,
    output::{default_sanitizer, OutputSink, TerminalSink},
    ssh::SshConnector,
    telemetry,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 加载 .env 文件（开发环境）
    dotenv::dotenv().ok();

    let args = Args::parse();

    let command = match args.command_line() {
        Ok(command) => command,
        Err(e) => exit_with(e),
    };

    // 1. 加载配置
    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => exit_with(e.into()),
    };

    // 2. 初始化日志与指标
    telemetry::init_telemetry(&config.logging, args.verbose);
    telemetry::init_metrics();

    tracing::debug!(version = env!("CARGO_PKG_VERSION"), "multicmd starting");

    // 3. 读取主机清单
    let hosts_file = inventory::resolve_hosts_file(args.hosts_file.as_deref());
    let targets = match inventory::load(&hosts_file, &args.tag_filter()) {
        Ok(targets) => targets,
        Err(e) => exit_with(e),
    };

    // 4. 构建 SSH 传输与输出
    let settings = match config.ssh_settings() {
        Ok(settings) => settings,
        Err(e) => exit_with(e),
    };
    let connector = Arc::new(SshConnector::new(settings));

    let mut sink = TerminalSink::new(config.output.color && !args.no_color);
    if config.output.redact {
        sink = sink.with_sanitizer(default_sanitizer());
    }
    let sink: Arc<dyn OutputSink> = Arc::new(sink);

    let mut options = config.dispatch_options();
    if let Some(secs) = args.timeout {
        options = options.with_timeout_secs(secs);
    }
    if let Some(max_parallel) = args.max_parallel {
        options = options.with_max_parallel(max_parallel);
    }

    // 5. 信号监听
    let controller = CancellationController::new(sink.clone());
    let listener = controller.spawn_signal_listener();

    // 6. 执行
    let fanout = FanOut::new(connector, sink, options);
    let outcome = fanout.run(targets, &command, controller.token()).await;
    listener.abort();

    tracing::debug!(outcome = ?outcome, "multicmd finished");
    std::process::exit(outcome.exit_code());
}

fn exit_with(error: AppError) -> ! {
    eprintln!("{}", error);
    std::process::exit(error.exit_code());
}

//! 中断控制
//! 把操作者的中断信号转换为显式的取消令牌，分发器和聚合器只依赖令牌，测试中无需真实信号

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::output::{OutputLine, OutputSink};

/// 中断控制器
#[derive(Clone)]
pub struct CancellationController {
    token: CancellationToken,
    triggered: Arc<AtomicBool>,
    sink: Arc<dyn OutputSink>,
}

impl CancellationController {
    pub fn new(sink: Arc<dyn OutputSink>) -> Self {
        Self {
            token: CancellationToken::new(),
            triggered: Arc::new(AtomicBool::new(false)),
            sink,
        }
    }

    /// 传给分发器和聚合器的令牌
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// 触发全局中断；重复调用只生效一次
    pub fn abort(&self) {
        if self.triggered.swap(true, Ordering::SeqCst) {
            return;
        }
        // 先取消再打印，之后的输出都会看到令牌已取消
        self.token.cancel();
        self.sink.emit(OutputLine::abort());
    }

    /// 监听 SIGINT / SIGTERM / SIGQUIT（非 Unix 平台只有 Ctrl+C），收到后触发中断
    pub fn spawn_signal_listener(&self) -> tokio::task::JoinHandle<()> {
        let controller = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = controller.token.cancelled() => return,
                received = wait_for_signal() => {
                    if let Err(e) = received {
                        warn!(error = %e, "Failed to install signal handler");
                        return;
                    }
                }
            }
            info!("Termination signal received");
            controller.abort();
        })
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<()> {
    use signal::unix::{signal as unix_signal, SignalKind};

    let mut interrupt = unix_signal(SignalKind::interrupt())?;
    let mut terminate = unix_signal(SignalKind::terminate())?;
    let mut quit = unix_signal(SignalKind::quit())?;

    tokio::select! {
        _ = interrupt.recv() => {},
        _ = terminate.recv() => {},
        _ = quit.recv() => {},
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<()> {
    signal::ctrl_c().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<OutputLine>>);

    impl OutputSink for Recorder {
        fn emit(&self, line: OutputLine) {
            self.0.lock().unwrap().push(line);
        }
    }

    #[tokio::test]
    async fn test_abort_cancels_token_once() {
        let recorder = Arc::new(Recorder::default());
        let controller = CancellationController::new(recorder.clone());
        let token = controller.token();

        assert!(!controller.is_aborted());
        controller.abort();
        controller.abort();

        assert!(token.is_cancelled());
        assert_eq!(recorder.0.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_listener_exits_when_aborted_elsewhere() {
        let controller = CancellationController::new(Arc::new(Recorder::default()));
        let listener = controller.spawn_signal_listener();
        controller.abort();
        tokio::time::timeout(std::time::Duration::from_secs(1), listener)
            .await
            .expect("listener should stop")
            .unwrap();
    }
}

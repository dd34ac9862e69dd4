//! 会话执行器
//! 管理单个目标主机上一次远程命令的完整生命周期：连接、认证、执行、输出缓冲与强制终止

pub mod error;
pub mod stream;
pub mod transport;

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use tokio::sync::{watch, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::models::TargetDescriptor;
use crate::ssh::AuthMethod;

pub use error::{ErrorCategory, RunnerError, StreamEnded};
pub use stream::{OutputStream, StreamKind, READ_CHUNK_SIZE};
pub use transport::{Connection, Connector, RemoteSession, SessionEvent};

/// kill 等待会话拆除的默认时长
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(2);

/// 会话阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// 已创建，尚未连接
    Constructed,
    /// 正在拨号或认证
    Connecting,
    /// 命令已下发
    Running,
    /// 已结束（完成、失败或被 kill）
    Terminated,
}

/// 正常结束的会话摘要
#[derive(Debug, Clone)]
pub struct ExecutionSummary {
    pub exit_status: u32,
    pub duration_secs: f64,
}

/// 单个目标主机的会话执行器
///
/// `execute` 只允许调用一次；`kill` 可以在任意时刻、从任意任务调用任意多次。
/// 输出通过 `read_stdout` / `read_stderr` 以非阻塞的定长块读取。
pub struct SessionRunner {
    target: TargetDescriptor,
    auth: AuthMethod,
    connector: Arc<dyn Connector>,
    started: AtomicBool,
    killed: AtomicBool,
    kill_token: CancellationToken,
    kill_grace: Duration,
    phase: watch::Sender<Phase>,
    command: OnceLock<String>,
    stdout: OutputStream,
    stderr: OutputStream,
}

impl SessionRunner {
    /// 校验目标地址并解析认证方式
    pub fn new(target: TargetDescriptor, connector: Arc<dyn Connector>) -> Result<Self, RunnerError> {
        target
            .host_port()
            .map_err(|reason| RunnerError::InvalidTarget {
                address: target.address.clone(),
                reason,
            })?;

        let auth = AuthMethod::resolve(target.credential());
        debug!(host = %target.address, auth = auth.kind(), "Session runner created");

        let ready = Arc::new(Notify::new());
        let (phase, _) = watch::channel(Phase::Constructed);

        Ok(Self {
            target,
            auth,
            connector,
            started: AtomicBool::new(false),
            killed: AtomicBool::new(false),
            kill_token: CancellationToken::new(),
            kill_grace: DEFAULT_KILL_GRACE,
            phase,
            command: OnceLock::new(),
            stdout: OutputStream::new(ready.clone()),
            stderr: OutputStream::new(ready),
        })
    }

    /// 输出到达时唤醒给定的 `Notify`（聚合器共享同一个）
    pub fn with_output_signal(mut self, ready: Arc<Notify>) -> Self {
        self.stdout = OutputStream::new(ready.clone());
        self.stderr = OutputStream::new(ready);
        self
    }

    /// 设置 kill 等待会话拆除的时长
    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    /// 目标地址 `host:port`
    pub fn host(&self) -> &str {
        &self.target.address
    }

    /// 已下发的命令
    pub fn command(&self) -> Option<&str> {
        self.command.get().map(String::as_str)
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    pub fn read_stdout(&self) -> Result<Vec<u8>, StreamEnded> {
        self.stdout.read_chunk()
    }

    pub fn read_stderr(&self) -> Result<Vec<u8>, StreamEnded> {
        self.stderr.read_chunk()
    }

    pub fn read(&self, kind: StreamKind) -> Result<Vec<u8>, StreamEnded> {
        match kind {
            StreamKind::Stdout => self.read_stdout(),
            StreamKind::Stderr => self.read_stderr(),
        }
    }

    /// 连接、认证、打开会话并执行命令，直到远端退出或被 kill
    pub async fn execute(&self, command: &str) -> Result<ExecutionSummary, RunnerError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(RunnerError::AlreadyStarted {
                address: self.target.address.clone(),
            });
        }
        let _ = self.command.set(command.to_string());
        let started_at = Instant::now();

        let outcome = if self.is_killed() {
            debug!(host = %self.target.address, "Runner killed before execute, skipping");
            Err(self.killed_error())
        } else {
            self.phase.send_replace(Phase::Connecting);
            self.run_session(command).await
        };

        // kill 关闭连接后传输层报出的错误不算执行失败
        let outcome = match outcome {
            Err(e) if self.is_killed() && !e.is_killed() => {
                debug!(host = %self.target.address, error = %e, "Error after kill suppressed");
                Err(self.killed_error())
            }
            other => other,
        };

        self.stdout.finish();
        self.stderr.finish();
        self.phase.send_replace(Phase::Terminated);

        let duration_secs = started_at.elapsed().as_secs_f64();
        match &outcome {
            Ok(status) => info!(
                host = %self.target.address,
                exit_status = status,
                duration_secs = duration_secs,
                "Command finished"
            ),
            Err(e) => debug!(host = %self.target.address, error = %e, "Command did not complete"),
        }

        outcome.map(|exit_status| ExecutionSummary {
            exit_status,
            duration_secs,
        })
    }

    /// 强制终止
    ///
    /// 已连接时由执行任务向远端发送 SIGABRT 并关闭会话与连接，这里最多等待 kill grace；
    /// 尚未连接时只记录 killed 标记。返回本次调用是否中断了一个仍在进行的会话。
    pub async fn kill(&self) -> bool {
        let first = !self.killed.swap(true, Ordering::SeqCst);
        let live = matches!(self.phase(), Phase::Connecting | Phase::Running);
        self.kill_token.cancel();

        if live {
            let mut phase = self.phase.subscribe();
            let torn_down = matches!(
                tokio::time::timeout(self.kill_grace, phase.wait_for(|p| *p == Phase::Terminated))
                    .await,
                Ok(Ok(_))
            );
            if !torn_down {
                warn!(
                    host = %self.target.address,
                    grace_ms = self.kill_grace.as_millis() as u64,
                    "Session did not shut down within kill grace"
                );
            }
        }

        first && live
    }

    fn killed_error(&self) -> RunnerError {
        RunnerError::Killed {
            address: self.target.address.clone(),
        }
    }

    /// 在 kill 之前完成给定的步骤，否则返回 Killed
    async fn guard<T, F>(&self, step: F) -> Result<T, RunnerError>
    where
        F: Future<Output = Result<T, RunnerError>>,
    {
        tokio::select! {
            biased;
            _ = self.kill_token.cancelled() => Err(self.killed_error()),
            result = step => result,
        }
    }

    async fn run_session(&self, command: &str) -> Result<u32, RunnerError> {
        let mut connection = self.guard(self.connector.connect(&self.target)).await?;
        debug!(host = %self.target.address, "Connected");

        let result = self.drive(connection.as_mut(), command).await;
        connection.close().await;
        result
    }

    async fn drive(&self, connection: &mut dyn Connection, command: &str) -> Result<u32, RunnerError> {
        self.guard(connection.authenticate(&self.target.username, &self.auth))
            .await?;
        debug!(host = %self.target.address, user = %self.target.username, "Authenticated");

        let mut session = self.guard(connection.open_session()).await?;
        let result = self.pump(session.as_mut(), command).await;
        session.close().await;
        result
    }

    async fn pump(&self, session: &mut dyn RemoteSession, command: &str) -> Result<u32, RunnerError> {
        if let Err(e) = self.guard(session.exec(command)).await {
            if e.is_killed() {
                session.abort().await;
            }
            return Err(e);
        }
        self.phase.send_replace(Phase::Running);
        debug!(host = %self.target.address, command = %command, "Command started");

        let mut exit: Option<Result<u32, String>> = None;
        let mut eof = false;

        loop {
            tokio::select! {
                biased;
                _ = self.kill_token.cancelled() => {
                    info!(host = %self.target.address, "Sending SIGABRT to remote process");
                    session.abort().await;
                    return Err(self.killed_error());
                }
                event = session.next_event() => match event {
                    Some(SessionEvent::Stdout(data)) => self.stdout.push(&data),
                    Some(SessionEvent::Stderr(data)) => self.stderr.push(&data),
                    Some(SessionEvent::ExitStatus(status)) => {
                        exit = Some(Ok(status));
                        if eof {
                            break;
                        }
                    }
                    Some(SessionEvent::ExitSignal(signal)) => {
                        exit = Some(Err(signal));
                        if eof {
                            break;
                        }
                    }
                    Some(SessionEvent::Eof) => {
                        eof = true;
                        if exit.is_some() {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }

        let address = self.target.address.clone();
        match exit {
            Some(Ok(0)) => Ok(0),
            Some(Ok(status)) => Err(RunnerError::ExitStatus { address, status }),
            Some(Err(signal)) => Err(RunnerError::ExitSignal { address, signal }),
            None => Err(RunnerError::Run {
                address,
                reason: "session closed without exit status".to_string(),
            }),
        }
    }
}

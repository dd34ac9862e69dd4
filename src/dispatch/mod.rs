//! 分发器
//! 为每个目标主机并发创建会话执行器、向聚合器公告、布置超时看守，并等待全部完成

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::models::TargetDescriptor;
use crate::output::{Announcement, AnnouncementSender, OutputLine, OutputSink};
use crate::session::{Connector, SessionRunner, DEFAULT_KILL_GRACE};

/// 分发参数
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    /// 单个主机的超时，`None` 表示不限制
    pub timeout: Option<Duration>,
    /// 同时执行的会话上限，0 表示不限制
    pub max_parallel: usize,
    /// kill 等待会话拆除的时长
    pub kill_grace: Duration,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            max_parallel: 0,
            kill_grace: DEFAULT_KILL_GRACE,
        }
    }
}

impl DispatchOptions {
    /// 非正数表示不设超时
    pub fn with_timeout_secs(mut self, secs: i64) -> Self {
        self.timeout = u64::try_from(secs)
            .ok()
            .filter(|s| *s > 0)
            .map(Duration::from_secs);
        self
    }

    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel;
        self
    }

    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }
}

/// 单个分发单元的结局
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitOutcome {
    /// 命令正常完成
    Completed,
    /// 连接、认证或执行失败
    Failed,
    /// 被超时或中断 kill
    Killed,
    /// 执行器构建失败（目标非法）
    Rejected,
}

impl UnitOutcome {
    fn label(&self) -> &'static str {
        match self {
            UnitOutcome::Completed => "completed",
            UnitOutcome::Failed => "failed",
            UnitOutcome::Killed => "killed",
            UnitOutcome::Rejected => "rejected",
        }
    }
}

/// 分发汇总
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub completed: usize,
    pub failed: usize,
    pub killed: usize,
    pub rejected: usize,
}

impl DispatchReport {
    fn record(&mut self, outcome: UnitOutcome) {
        match outcome {
            UnitOutcome::Completed => self.completed += 1,
            UnitOutcome::Failed => self.failed += 1,
            UnitOutcome::Killed => self.killed += 1,
            UnitOutcome::Rejected => self.rejected += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.completed + self.failed + self.killed + self.rejected
    }
}

/// 分发器
#[derive(Clone)]
pub struct Dispatcher {
    connector: Arc<dyn Connector>,
    sink: Arc<dyn OutputSink>,
    ready: Arc<Notify>,
    cancel: CancellationToken,
    options: DispatchOptions,
    limiter: Option<Arc<Semaphore>>,
}

impl Dispatcher {
    /// `ready` 与聚合器共享；`cancel` 为全局中断令牌
    pub fn new(
        connector: Arc<dyn Connector>,
        sink: Arc<dyn OutputSink>,
        ready: Arc<Notify>,
        cancel: CancellationToken,
        options: DispatchOptions,
    ) -> Self {
        let limiter = (options.max_parallel > 0).then(|| Arc::new(Semaphore::new(options.max_parallel)));
        Self {
            connector,
            sink,
            ready,
            cancel,
            options,
            limiter,
        }
    }

    /// 为每个目标启动一个分发单元，等待全部结束（计数屏障）
    pub async fn dispatch(
        &self,
        targets: Vec<TargetDescriptor>,
        command: &str,
        announce: AnnouncementSender,
    ) -> DispatchReport {
        let command: Arc<str> = Arc::from(command);
        let mut units = JoinSet::new();
        // 超时看守只在本次分发期间有效，中断时随全局令牌一起取消
        let watch_scope = self.cancel.child_token();
        let _watch_guard = watch_scope.clone().drop_guard();

        info!(
            targets = targets.len(),
            timeout_secs = self.options.timeout.map(|t| t.as_secs()),
            max_parallel = self.options.max_parallel,
            "Dispatching command"
        );

        for target in targets {
            units.spawn(self.clone().run_unit(
                target,
                command.clone(),
                announce.clone(),
                watch_scope.clone(),
            ));
        }
        drop(announce);

        let mut report = DispatchReport::default();
        while let Some(joined) = units.join_next().await {
            match joined {
                Ok(outcome) => {
                    metrics::counter!("multicmd_sessions_total", "outcome" => outcome.label())
                        .increment(1);
                    report.record(outcome);
                }
                Err(e) => {
                    error!(error = %e, "Dispatch unit panicked");
                    report.record(UnitOutcome::Failed);
                }
            }
        }

        info!(
            completed = report.completed,
            failed = report.failed,
            killed = report.killed,
            rejected = report.rejected,
            "All dispatch units finished"
        );
        report
    }

    async fn run_unit(
        self,
        target: TargetDescriptor,
        command: Arc<str>,
        announce: AnnouncementSender,
        watch_scope: CancellationToken,
    ) -> UnitOutcome {
        let address = target.address.clone();

        let runner = match SessionRunner::new(target, self.connector.clone()) {
            Ok(runner) => Arc::new(
                runner
                    .with_output_signal(self.ready.clone())
                    .with_kill_grace(self.options.kill_grace),
            ),
            Err(e) => {
                warn!(host = %address, error = %e, "Failed to create session runner");
                self.sink.emit(OutputLine::failure(&address, e.to_string()));
                return UnitOutcome::Rejected;
            }
        };

        // 先公告再执行，中断时聚合器才能 kill 到它
        if announce.send(Announcement::Runner(runner.clone())).is_err() {
            debug!(host = %address, "Aggregator no longer accepting runners");
            runner.kill().await;
            return UnitOutcome::Killed;
        }
        drop(announce);

        let _permit = match &self.limiter {
            Some(limiter) => tokio::select! {
                permit = limiter.clone().acquire_owned() => permit.ok(),
                _ = self.cancel.cancelled() => {
                    runner.kill().await;
                    return UnitOutcome::Killed;
                }
            },
            None => None,
        };

        // 中断之后不再启动新会话
        if self.cancel.is_cancelled() {
            runner.kill().await;
            return UnitOutcome::Killed;
        }

        if let Some(limit) = self.options.timeout {
            arm_timeout(runner.clone(), limit, self.sink.clone(), watch_scope);
        }

        match runner.execute(&command).await {
            Ok(summary) => {
                debug!(host = %address, duration_secs = summary.duration_secs, "Dispatch unit completed");
                UnitOutcome::Completed
            }
            Err(e) if e.is_killed() => {
                debug!(host = %address, "Session killed");
                UnitOutcome::Killed
            }
            Err(e) => {
                warn!(host = %address, error = %e, category = ?e.category(), "Session failed");
                self.sink.emit(OutputLine::failure(&address, e.to_string()));
                UnitOutcome::Failed
            }
        }
    }
}

/// 超时看守：到时后输出超时提示并 kill，与命令是否已结束无关
///
/// 分发结束或操作者中断后看守随 `scope` 取消，不再输出。已结束的执行器把 kill 当作空操作。
fn arm_timeout(
    runner: Arc<SessionRunner>,
    limit: Duration,
    sink: Arc<dyn OutputSink>,
    scope: CancellationToken,
) {
    tokio::spawn(async move {
        tokio::select! {
            biased;
            _ = scope.cancelled() => return,
            _ = tokio::time::sleep(limit) => {}
        }
        sink.emit(OutputLine::timeout(runner.host()));
        let interrupted = runner.kill().await;
        warn!(
            host = %runner.host(),
            timeout_secs = limit.as_secs_f64(),
            interrupted = interrupted,
            "Timeout reached, SIGABRT sent"
        );
    });
}

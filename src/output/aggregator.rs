//! 输出聚合器
//!
//! 聚合器独占执行器登记表，其他组件只能通过公告通道加入新的执行器。
//! 每轮对每个执行器的 stdout、stderr 各读一块，任何一台主机没有输出都不会拖住其他主机。

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::sink::{OutputLine, OutputSink};
use crate::session::{SessionRunner, StreamEnded, StreamKind};

/// 公告通道上的消息
pub enum Announcement {
    /// 新构建好的执行器
    Runner(Arc<SessionRunner>),
    /// 不会再有新公告，进入排空阶段
    Done,
}

pub type AnnouncementSender = mpsc::UnboundedSender<Announcement>;
pub type AnnouncementReceiver = mpsc::UnboundedReceiver<Announcement>;

pub fn announcement_channel() -> (AnnouncementSender, AnnouncementReceiver) {
    mpsc::unbounded_channel()
}

/// 聚合器退出方式
pub enum AggregatorExit {
    /// 收到结束公告，交出登记表供最终 flush
    Drained(Vec<Arc<SessionRunner>>),
    /// 操作者中断，所有已登记的执行器都已 kill
    Aborted { killed: usize },
}

/// 输出聚合器
pub struct OutputAggregator {
    announcements: AnnouncementReceiver,
    registry: Vec<Arc<SessionRunner>>,
    sink: Arc<dyn OutputSink>,
    ready: Arc<Notify>,
    cancel: CancellationToken,
}

impl OutputAggregator {
    /// `ready` 必须与执行器共享，输出到达时用它唤醒聚合器
    pub fn new(
        announcements: AnnouncementReceiver,
        sink: Arc<dyn OutputSink>,
        ready: Arc<Notify>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            announcements,
            registry: Vec::new(),
            sink,
            ready,
            cancel,
        }
    }

    /// 主循环：接收公告、轮询输出，直到收到结束公告或被中断
    pub async fn run(mut self) -> AggregatorExit {
        loop {
            if self.cancel.is_cancelled() {
                return self.abort().await;
            }

            match self.announcements.try_recv() {
                Ok(announcement) => {
                    if self.admit(announcement) {
                        return self.into_drained();
                    }
                    continue;
                }
                Err(TryRecvError::Disconnected) => return self.into_drained(),
                Err(TryRecvError::Empty) => {}
            }

            if self.poll_once() > 0 {
                tokio::task::yield_now().await;
                continue;
            }

            // 没有新数据：等待输出、公告或中断
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {}
                announcement = self.announcements.recv() => match announcement {
                    Some(announcement) => {
                        if self.admit(announcement) {
                            return self.into_drained();
                        }
                    }
                    None => return self.into_drained(),
                },
                _ = self.ready.notified() => {}
            }
        }
    }

    /// 登记新执行器；返回是否收到了结束公告
    fn admit(&mut self, announcement: Announcement) -> bool {
        match announcement {
            Announcement::Runner(runner) => {
                debug!(host = %runner.host(), known = self.registry.len() + 1, "Runner announced");
                self.registry.push(runner);
                false
            }
            Announcement::Done => true,
        }
    }

    /// 对每个执行器的两个流各读一块，返回本轮输出的字节数
    fn poll_once(&self) -> usize {
        self.registry
            .iter()
            .map(|runner| {
                let out = emit_chunk(self.sink.as_ref(), runner, StreamKind::Stdout);
                let err = emit_chunk(self.sink.as_ref(), runner, StreamKind::Stderr);
                out.unwrap_or(0) + err.unwrap_or(0)
            })
            .sum()
    }

    fn into_drained(mut self) -> AggregatorExit {
        self.announcements.close();
        debug!(runners = self.registry.len(), "Announcements closed, handing over for flush");
        AggregatorExit::Drained(self.registry)
    }

    async fn abort(mut self) -> AggregatorExit {
        // 先关闭通道，再收下已经在途的公告，保证没有执行器漏掉
        self.announcements.close();
        while let Ok(announcement) = self.announcements.try_recv() {
            if let Announcement::Runner(runner) = announcement {
                self.registry.push(runner);
            }
        }

        warn!(runners = self.registry.len(), "Abort requested, killing all sessions");
        join_all(self.registry.iter().map(|runner| runner.kill())).await;

        AggregatorExit::Aborted {
            killed: self.registry.len(),
        }
    }
}

/// 读一块并输出；返回读到的字节数，流已结束时返回 `Err`
fn emit_chunk(
    sink: &dyn OutputSink,
    runner: &SessionRunner,
    kind: StreamKind,
) -> Result<usize, StreamEnded> {
    let chunk = runner.read(kind)?;
    let len = chunk.len();
    if len > 0 {
        sink.emit(OutputLine::chunk(runner.host(), kind, chunk));
    }
    Ok(len)
}

/// 最终 flush：按登记顺序把每个执行器剩余的输出读完，然后无条件 kill
///
/// 只要还有数据读出且至少一个流未结束就继续读。中途被中断时 kill 剩余执行器并返回 `false`。
pub async fn flush(
    registry: &[Arc<SessionRunner>],
    sink: &dyn OutputSink,
    cancel: &CancellationToken,
) -> bool {
    for (index, runner) in registry.iter().enumerate() {
        if cancel.is_cancelled() {
            warn!(remaining = registry.len() - index, "Abort during flush");
            join_all(registry[index..].iter().map(|r| r.kill())).await;
            return false;
        }

        loop {
            let out = emit_chunk(sink, runner, StreamKind::Stdout);
            let err = emit_chunk(sink, runner, StreamKind::Stderr);
            let open = out.is_ok() || err.is_ok();
            let read = out.unwrap_or(0) + err.unwrap_or(0);
            if !(open && read > 0) {
                break;
            }
        }

        runner.kill().await;
    }

    info!(runners = registry.len(), "Output flushed");
    true
}

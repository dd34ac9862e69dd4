//! 一次分发的完整流程
//! 启动聚合器 → 并发分发 → 屏障满足后发送结束公告 → 最终 flush；中断令牌可在任意时刻截断

use std::sync::Arc;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

use crate::dispatch::{DispatchOptions, DispatchReport, Dispatcher};
use crate::models::TargetDescriptor;
use crate::output::{
    announcement_channel, flush, AggregatorExit, Announcement, OutputAggregator, OutputSink,
};
use crate::session::Connector;

/// 一次运行的结局
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// 所有分发单元结束且输出已 flush
    Completed(DispatchReport),
    /// 操作者中断
    Aborted,
}

impl RunOutcome {
    /// 进程退出码：正常结束为 0（即使部分主机失败），中断为 1
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Completed(_) => 0,
            RunOutcome::Aborted => 1,
        }
    }
}

/// 把一条命令分发到多台主机
pub struct FanOut {
    connector: Arc<dyn Connector>,
    sink: Arc<dyn OutputSink>,
    options: DispatchOptions,
}

impl FanOut {
    pub fn new(connector: Arc<dyn Connector>, sink: Arc<dyn OutputSink>, options: DispatchOptions) -> Self {
        Self {
            connector,
            sink,
            options,
        }
    }

    pub async fn run(
        &self,
        targets: Vec<TargetDescriptor>,
        command: &str,
        cancel: CancellationToken,
    ) -> RunOutcome {
        let span = tracing::info_span!("run", run_id = %Uuid::new_v4(), hosts = targets.len());
        self.run_inner(targets, command, cancel).instrument(span).await
    }

    async fn run_inner(
        &self,
        targets: Vec<TargetDescriptor>,
        command: &str,
        cancel: CancellationToken,
    ) -> RunOutcome {
        let ready = Arc::new(Notify::new());
        let (announce, announcements) = announcement_channel();

        let aggregator = OutputAggregator::new(
            announcements,
            self.sink.clone(),
            ready.clone(),
            cancel.clone(),
        );
        let aggregator = tokio::spawn(aggregator.run().in_current_span());

        let dispatcher = Dispatcher::new(
            self.connector.clone(),
            self.sink.clone(),
            ready,
            cancel.clone(),
            self.options.clone(),
        );

        let dispatch = dispatcher.dispatch(targets, command, announce.clone());
        tokio::pin!(dispatch);

        let report = tokio::select! {
            report = &mut dispatch => report,
            _ = cancel.cancelled() => {
                // 聚合器持有登记表，由它 kill 所有会话
                if let Err(e) = aggregator.await {
                    error!(error = %e, "Output aggregator failed during abort");
                }
                drop(announce);
                // 被 kill 的单元很快结束，等它们收尾后再退出
                let report = dispatch.await;
                warn!(killed = report.killed, "Run aborted");
                return RunOutcome::Aborted;
            }
        };

        let _ = announce.send(Announcement::Done);
        drop(announce);

        match aggregator.await {
            Ok(AggregatorExit::Drained(registry)) => {
                if flush(&registry, self.sink.as_ref(), &cancel).await {
                    info!(total = report.total(), "Run completed");
                    RunOutcome::Completed(report)
                } else {
                    RunOutcome::Aborted
                }
            }
            Ok(AggregatorExit::Aborted { killed }) => {
                warn!(killed = killed, "Run aborted before flush");
                RunOutcome::Aborted
            }
            Err(e) => {
                error!(error = %e, "Output aggregator failed");
                RunOutcome::Completed(report)
            }
        }
    }
}

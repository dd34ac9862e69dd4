//! 输出模块
//! 聚合各主机的输出流、渲染终端行以及可选的脱敏

pub mod aggregator;
pub mod sanitize;
pub mod sink;

pub use aggregator::{
    announcement_channel, flush, AggregatorExit, Announcement, AnnouncementReceiver,
    AnnouncementSender, OutputAggregator,
};
pub use sanitize::{default_sanitizer, OutputSanitizer};
pub use sink::{LineKind, OutputLine, OutputSink, TerminalSink};

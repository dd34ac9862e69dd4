//! 会话输出缓冲
//!
//! 执行会话的任务负责写入，聚合器在另一个任务里做非阻塞的定长读取。

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;

use super::error::StreamEnded;

/// 单次读取的最大字节数
pub const READ_CHUNK_SIZE: usize = 1024;

/// 输出流类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl StreamKind {
    pub fn label(&self) -> &'static str {
        match self {
            StreamKind::Stdout => "out",
            StreamKind::Stderr => "err",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Default)]
struct Buffer {
    pending: VecDeque<u8>,
    ended: bool,
}

/// 一个远端输出流（stdout 或 stderr）的缓冲区
pub struct OutputStream {
    buffer: Mutex<Buffer>,
    ready: Arc<Notify>,
}

impl OutputStream {
    pub fn new(ready: Arc<Notify>) -> Self {
        Self {
            buffer: Mutex::new(Buffer::default()),
            ready,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Buffer> {
        // 临界区内不会 panic，中毒时沿用内部数据即可
        self.buffer.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 追加远端数据并唤醒消费者；流结束后的写入被丢弃
    pub fn push(&self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        {
            let mut buffer = self.lock();
            if buffer.ended {
                return;
            }
            buffer.pending.extend(data);
        }
        self.ready.notify_one();
    }

    /// 标记远端已关闭该流
    pub fn finish(&self) {
        self.lock().ended = true;
        self.ready.notify_one();
    }

    /// 非阻塞读取最多 [`READ_CHUNK_SIZE`] 字节
    ///
    /// 没有待读数据时返回空块；流已结束且数据读完后返回 [`StreamEnded`]。
    pub fn read_chunk(&self) -> Result<Vec<u8>, StreamEnded> {
        let mut buffer = self.lock();
        if buffer.pending.is_empty() {
            return if buffer.ended { Err(StreamEnded) } else { Ok(Vec::new()) };
        }
        let n = buffer.pending.len().min(READ_CHUNK_SIZE);
        Ok(buffer.pending.drain(..n).collect())
    }
}

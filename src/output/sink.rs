//! 输出行与终端渲染

use std::borrow::Cow;
use std::io::Write;
use std::sync::Arc;

use crossterm::queue;
use crossterm::style::{Attribute, Color, ResetColor, SetAttribute, SetForegroundColor, Stylize};

use super::sanitize::OutputSanitizer;
use crate::session::StreamKind;

/// 输出行类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    /// 远端标准输出块
    Stdout,
    /// 远端标准错误块
    Stderr,
    /// 超时触发的 kill
    Timeout,
    /// 单个主机的构建或执行错误
    Failure,
    /// 操作者中断
    Abort,
}

impl From<StreamKind> for LineKind {
    fn from(kind: StreamKind) -> Self {
        match kind {
            StreamKind::Stdout => LineKind::Stdout,
            StreamKind::Stderr => LineKind::Stderr,
        }
    }
}

/// 一条待输出的行，带来源主机
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub host: String,
    pub kind: LineKind,
    pub data: Vec<u8>,
}

impl OutputLine {
    pub fn chunk(host: &str, stream: StreamKind, data: Vec<u8>) -> Self {
        Self {
            host: host.to_string(),
            kind: stream.into(),
            data,
        }
    }

    pub fn timeout(host: &str) -> Self {
        Self {
            host: host.to_string(),
            kind: LineKind::Timeout,
            data: Vec::new(),
        }
    }

    pub fn failure(host: &str, message: impl Into<String>) -> Self {
        Self {
            host: host.to_string(),
            kind: LineKind::Failure,
            data: message.into().into_bytes(),
        }
    }

    pub fn abort() -> Self {
        Self {
            host: String::new(),
            kind: LineKind::Abort,
            data: Vec::new(),
        }
    }
}

/// 输出目的地
///
/// 每次 `emit` 对应一整行，实现必须保证同一行的内容不会与其他行交错。
pub trait OutputSink: Send + Sync {
    fn emit(&self, line: OutputLine);
}

/// 终端输出
pub struct TerminalSink {
    color: bool,
    sanitizer: Option<Arc<OutputSanitizer>>,
}

impl TerminalSink {
    pub fn new(color: bool) -> Self {
        Self {
            color,
            sanitizer: None,
        }
    }

    /// 打印前对输出块脱敏
    pub fn with_sanitizer(mut self, sanitizer: Arc<OutputSanitizer>) -> Self {
        self.sanitizer = Some(sanitizer);
        self
    }

    /// 渲染一行（含换行符）；不需要打印时返回 `None`
    ///
    /// 输出块按原始字节写出，不做 UTF-8 转换，跨块的多字节字符在终端上仍能拼回。
    pub fn render(&self, line: &OutputLine) -> Option<Vec<u8>> {
        let mut buf = Vec::new();
        match line.kind {
            LineKind::Stdout | LineKind::Stderr => {
                let body = line.data.strip_suffix(b"\n").unwrap_or(&line.data[..]);
                if body.is_empty() {
                    return None;
                }
                let tag = if line.kind == LineKind::Stdout { "[out]" } else { "[err]" };
                let prefix = format!("{} {}", tag, line.host);
                if self.color {
                    let prefix = if line.kind == LineKind::Stdout {
                        prefix.green().bold()
                    } else {
                        prefix.red().bold()
                    };
                    let _ = write!(buf, "{} ", prefix);
                    let _ = queue!(buf, SetForegroundColor(Color::Blue), SetAttribute(Attribute::Bold));
                    buf.extend_from_slice(&self.redact(body));
                    let _ = queue!(buf, SetAttribute(Attribute::Reset), ResetColor);
                } else {
                    buf.extend_from_slice(prefix.as_bytes());
                    buf.push(b' ');
                    buf.extend_from_slice(&self.redact(body));
                }
            }
            LineKind::Timeout => {
                let text = format!("[err] {} [timeout] SIGABRT sent", line.host);
                if self.color {
                    let _ = write!(buf, "{}", text.red().bold());
                } else {
                    buf.extend_from_slice(text.as_bytes());
                }
            }
            LineKind::Failure => {
                if self.color {
                    let _ = write!(buf, "{} ", "[err]".red().bold());
                } else {
                    buf.extend_from_slice(b"[err] ");
                }
                buf.extend_from_slice(&line.data);
            }
            LineKind::Abort => buf.extend_from_slice(b"[signal caught] terminating"),
        }
        buf.push(b'\n');
        Some(buf)
    }

    /// 脱敏只作用于单个输出块，跨块的敏感内容不会被遮盖
    fn redact<'a>(&self, body: &'a [u8]) -> Cow<'a, [u8]> {
        let Some(sanitizer) = &self.sanitizer else {
            return Cow::Borrowed(body);
        };
        let text = String::from_utf8_lossy(body);
        match sanitizer.sanitize(&text) {
            // 没有命中规则时保持原始字节
            Cow::Borrowed(_) => Cow::Borrowed(body),
            Cow::Owned(masked) => Cow::Owned(masked.into_bytes()),
        }
    }
}

impl OutputSink for TerminalSink {
    fn emit(&self, line: OutputLine) {
        if let Some(rendered) = self.render(&line) {
            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            // 终端关闭时无处可写，忽略错误
            let _ = out.write_all(&rendered);
            let _ = out.flush();
        }
    }
}

//! 测试公共模块
//! 内存中的脚本化 SSH 传输与收集输出的 sink

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use multicmd::{
    models::TargetDescriptor,
    output::{LineKind, OutputLine, OutputSink, TerminalSink},
    session::{Connection, Connector, RemoteSession, RunnerError, SessionEvent},
    ssh::AuthMethod,
};

/// 单台主机的脚本步骤
#[derive(Debug, Clone)]
pub enum Step {
    Event(SessionEvent),
    Sleep(Duration),
}

/// 单台主机的行为脚本
#[derive(Debug, Clone, Default)]
pub struct HostScript {
    refuse_connect: bool,
    hang_connect: bool,
    reject_auth: bool,
    steps: Vec<Step>,
    hang_after: bool,
}

impl HostScript {
    /// 能连上、认证通过的主机
    pub fn reachable() -> Self {
        Self::default()
    }

    /// 拨号被拒绝
    pub fn refused() -> Self {
        Self {
            refuse_connect: true,
            ..Self::default()
        }
    }

    /// 拨号永远没有回应
    pub fn unreachable() -> Self {
        Self {
            hang_connect: true,
            ..Self::default()
        }
    }

    /// 认证失败
    pub fn auth_rejected() -> Self {
        Self {
            reject_auth: true,
            ..Self::default()
        }
    }

    pub fn stdout(mut self, data: impl AsRef<[u8]>) -> Self {
        self.steps.push(Step::Event(SessionEvent::Stdout(data.as_ref().to_vec())));
        self
    }

    pub fn stderr(mut self, data: impl AsRef<[u8]>) -> Self {
        self.steps.push(Step::Event(SessionEvent::Stderr(data.as_ref().to_vec())));
        self
    }

    pub fn sleep(mut self, duration: Duration) -> Self {
        self.steps.push(Step::Sleep(duration));
        self
    }

    /// 远端进程以给定状态退出
    pub fn exit(mut self, status: u32) -> Self {
        self.steps.push(Step::Event(SessionEvent::Eof));
        self.steps.push(Step::Event(SessionEvent::ExitStatus(status)));
        self
    }

    /// 脚本结束后会话保持打开，直到被 kill
    pub fn hang(mut self) -> Self {
        self.hang_after = true;
        self
    }
}

/// 传输层调用记录：(主机, 动作)
pub type CallLog = Arc<Mutex<Vec<(String, &'static str)>>>;

/// 按主机地址分派脚本的连接器
#[derive(Default)]
pub struct MockConnector {
    scripts: HashMap<String, HostScript>,
    calls: CallLog,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host(mut self, address: &str, script: HostScript) -> Self {
        self.scripts.insert(address.to_string(), script);
        self
    }

    pub fn calls(&self) -> CallLog {
        self.calls.clone()
    }
}

fn record(calls: &CallLog, host: &str, action: &'static str) {
    calls.lock().unwrap().push((host.to_string(), action));
}

/// 某台主机是否发生过给定动作
pub fn called(calls: &CallLog, host: &str, action: &str) -> bool {
    calls
        .lock()
        .unwrap()
        .iter()
        .any(|(h, a)| h == host && *a == action)
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, target: &TargetDescriptor) -> Result<Box<dyn Connection>, RunnerError> {
        let host = target.address.clone();
        record(&self.calls, &host, "connect");

        let script = self.scripts.get(&host).cloned().unwrap_or_else(|| HostScript::reachable().exit(0));
        if script.hang_connect {
            std::future::pending::<()>().await;
        }
        if script.refuse_connect {
            return Err(RunnerError::Connect {
                address: host,
                reason: "connection refused".to_string(),
            });
        }

        Ok(Box::new(MockConnection {
            host,
            script,
            calls: self.calls.clone(),
        }))
    }
}

struct MockConnection {
    host: String,
    script: HostScript,
    calls: CallLog,
}

#[async_trait]
impl Connection for MockConnection {
    async fn authenticate(&mut self, _username: &str, _auth: &AuthMethod) -> Result<(), RunnerError> {
        record(&self.calls, &self.host, "authenticate");
        if self.script.reject_auth {
            return Err(RunnerError::Authenticate {
                address: self.host.clone(),
                reason: "authentication rejected".to_string(),
            });
        }
        Ok(())
    }

    async fn open_session(&mut self) -> Result<Box<dyn RemoteSession>, RunnerError> {
        record(&self.calls, &self.host, "open_session");
        Ok(Box::new(MockSession {
            host: self.host.clone(),
            steps: std::mem::take(&mut self.script.steps).into(),
            hang_after: self.script.hang_after,
            calls: self.calls.clone(),
        }))
    }

    async fn close(&mut self) {
        record(&self.calls, &self.host, "close_connection");
    }
}

struct MockSession {
    host: String,
    steps: VecDeque<Step>,
    hang_after: bool,
    calls: CallLog,
}

#[async_trait]
impl RemoteSession for MockSession {
    async fn exec(&mut self, _command: &str) -> Result<(), RunnerError> {
        record(&self.calls, &self.host, "exec");
        Ok(())
    }

    async fn next_event(&mut self) -> Option<SessionEvent> {
        while let Some(step) = self.steps.pop_front() {
            match step {
                Step::Sleep(duration) => tokio::time::sleep(duration).await,
                Step::Event(event) => return Some(event),
            }
        }
        if self.hang_after {
            std::future::pending::<()>().await;
        }
        None
    }

    async fn abort(&mut self) {
        record(&self.calls, &self.host, "abort");
    }

    async fn close(&mut self) {
        record(&self.calls, &self.host, "close_session");
    }
}

/// 收集所有输出行的 sink
#[derive(Default)]
pub struct CollectingSink {
    lines: Mutex<Vec<OutputLine>>,
}

impl CollectingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn lines(&self) -> Vec<OutputLine> {
        self.lines.lock().unwrap().clone()
    }

    /// 某台主机某个流的全部字节，按输出顺序拼接
    pub fn bytes(&self, host: &str, kind: LineKind) -> Vec<u8> {
        self.lines
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.host == host && l.kind == kind)
            .flat_map(|l| l.data.iter().copied())
            .collect()
    }

    pub fn count(&self, kind: LineKind) -> usize {
        self.lines.lock().unwrap().iter().filter(|l| l.kind == kind).count()
    }

    pub fn count_for(&self, host: &str, kind: LineKind) -> usize {
        self.lines
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.host == host && l.kind == kind)
            .count()
    }
}

impl OutputSink for CollectingSink {
    fn emit(&self, line: OutputLine) {
        self.lines.lock().unwrap().push(line);
    }
}

/// 用真实终端渲染并记录每一行写出的字节
pub struct RenderingSink {
    terminal: TerminalSink,
    written: Mutex<Vec<(String, LineKind, Vec<u8>)>>,
}

impl RenderingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            terminal: TerminalSink::new(false),
            written: Mutex::new(Vec::new()),
        })
    }

    /// 某台主机某个流写到终端的正文字节：去掉 `[out] host ` 前缀和行尾换行后拼接
    pub fn body(&self, host: &str, kind: LineKind) -> Vec<u8> {
        let tag = if kind == LineKind::Stdout { "[out]" } else { "[err]" };
        let prefix = format!("{} {} ", tag, host);
        self.written
            .lock()
            .unwrap()
            .iter()
            .filter(|(h, k, _)| h == host && *k == kind)
            .flat_map(|(_, _, bytes)| {
                assert!(bytes.starts_with(prefix.as_bytes()), "unexpected line prefix");
                assert_eq!(bytes.last(), Some(&b'\n'));
                bytes[prefix.len()..bytes.len() - 1].to_vec()
            })
            .collect()
    }
}

impl OutputSink for RenderingSink {
    fn emit(&self, line: OutputLine) {
        if let Some(bytes) = self.terminal.render(&line) {
            self.written.lock().unwrap().push((line.host.clone(), line.kind, bytes));
        }
    }
}

/// 构造测试目标，凭据不是密钥文件，按密码处理
pub fn target(address: &str) -> TargetDescriptor {
    TargetDescriptor::new(address, "deploy", "not-a-key-file")
}

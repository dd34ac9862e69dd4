//! 远程 shell 传输抽象
//!
//! 会话执行器只依赖这里的 trait，生产环境由 [`crate::ssh::SshConnector`] 实现，
//! 测试中可以替换为内存实现。

use async_trait::async_trait;

use super::error::RunnerError;
use crate::models::TargetDescriptor;
use crate::ssh::AuthMethod;

/// 远端会话事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// 标准输出数据
    Stdout(Vec<u8>),
    /// 标准错误数据
    Stderr(Vec<u8>),
    /// 远端进程退出码
    ExitStatus(u32),
    /// 远端进程被信号终止
    ExitSignal(String),
    /// 远端不会再发送数据
    Eof,
}

/// 建立到目标主机的连接（拨号 + 握手）
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, target: &TargetDescriptor) -> Result<Box<dyn Connection>, RunnerError>;
}

/// 已建立的连接，独占于一个会话执行器
#[async_trait]
pub trait Connection: Send {
    async fn authenticate(&mut self, username: &str, auth: &AuthMethod) -> Result<(), RunnerError>;

    async fn open_session(&mut self) -> Result<Box<dyn RemoteSession>, RunnerError>;

    /// 断开连接，重复调用无副作用
    async fn close(&mut self);
}

/// 连接上的一个命令会话
#[async_trait]
pub trait RemoteSession: Send {
    async fn exec(&mut self, command: &str) -> Result<(), RunnerError>;

    /// 下一个事件；会话关闭后返回 `None`
    async fn next_event(&mut self) -> Option<SessionEvent>;

    /// 向远端进程发送 SIGABRT
    async fn abort(&mut self);

    /// 关闭会话，重复调用无副作用
    async fn close(&mut self);
}

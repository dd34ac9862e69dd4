//! SSH执行器模块
//! 基于 russh 的 [`Connector`] 实现：拨号、握手、认证、打开会话、转发输出与信号

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Config};
use russh::{ChannelMsg, Disconnect, Sig};
use russh_keys::key::PublicKey;
use russh_keys::PublicKeyBase64;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::auth::AuthMethod;
use super::known_hosts::{fingerprint, HostKeyVerification, KnownHosts};
use crate::models::TargetDescriptor;
use crate::session::{Connection, Connector, RemoteSession, RunnerError, SessionEvent};

/// SSH 扩展数据类型：标准错误
const SSH_EXTENDED_DATA_STDERR: u32 = 1;

/// SSH 连接参数
#[derive(Debug, Clone, Default)]
pub struct SshSettings {
    /// 拨号与握手超时，`None` 表示不限制
    pub connect_timeout: Option<Duration>,
    /// 主机密钥验证策略
    pub host_key_verification: HostKeyVerification,
    /// 已知主机指纹
    pub known_hosts: Arc<KnownHosts>,
}

/// 基于 russh 的连接器
pub struct SshConnector {
    settings: SshSettings,
    client_config: Arc<Config>,
}

impl SshConnector {
    pub fn new(settings: SshSettings) -> Self {
        let client_config = Arc::new(Config {
            preferred: russh::Preferred::default(),
            ..Default::default()
        });
        Self {
            settings,
            client_config,
        }
    }

    fn create_handler(&self, host: &str, port: u16) -> HostKeyHandler {
        HostKeyHandler {
            verification_mode: self.settings.host_key_verification,
            known_hosts: self.settings.known_hosts.clone(),
            host: host.to_string(),
            port,
        }
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn connect(&self, target: &TargetDescriptor) -> Result<Box<dyn Connection>, RunnerError> {
        let address = target.address.clone();
        let (host, port) = target.host_port().map_err(|reason| RunnerError::InvalidTarget {
            address: address.clone(),
            reason,
        })?;

        debug!(host = %host, port = port, user = %target.username, "Dialing SSH");

        let handler = self.create_handler(&host, port);
        let connecting = client::connect(self.client_config.clone(), (host.clone(), port), handler);

        let connected = match self.settings.connect_timeout {
            Some(limit) => timeout(limit, connecting).await.map_err(|_| RunnerError::Connect {
                address: address.clone(),
                reason: format!("timed out after {}s", limit.as_secs()),
            })?,
            None => connecting.await,
        };

        let handle = connected.map_err(|e| {
            error!(host = %address, error = %e, "SSH连接失败");
            let reason = if e.to_string().contains("Host key") || e.to_string().contains("fingerprint") {
                format!("host key verification failed: {}", e)
            } else {
                e.to_string()
            };
            RunnerError::Connect {
                address: address.clone(),
                reason,
            }
        })?;

        Ok(Box::new(SshConnection {
            address,
            handle,
            closed: false,
        }))
    }
}

/// 已握手的 SSH 连接
struct SshConnection {
    address: String,
    handle: client::Handle<HostKeyHandler>,
    closed: bool,
}

#[async_trait]
impl Connection for SshConnection {
    async fn authenticate(&mut self, username: &str, auth: &AuthMethod) -> Result<(), RunnerError> {
        let result = match auth {
            AuthMethod::PublicKey(key) => {
                self.handle
                    .authenticate_publickey(username.to_string(), key.clone())
                    .await
            }
            AuthMethod::Password(_) => {
                let password = auth.password().unwrap_or_default();
                self.handle
                    .authenticate_password(username.to_string(), password)
                    .await
            }
        };

        match result {
            Ok(true) => Ok(()),
            Ok(false) => {
                warn!(host = %self.address, method = auth.kind(), "SSH认证失败");
                Err(RunnerError::Authenticate {
                    address: self.address.clone(),
                    reason: format!("{} authentication rejected", auth.kind()),
                })
            }
            Err(e) => Err(RunnerError::Authenticate {
                address: self.address.clone(),
                reason: e.to_string(),
            }),
        }
    }

    async fn open_session(&mut self) -> Result<Box<dyn RemoteSession>, RunnerError> {
        let channel = self.handle.channel_open_session().await.map_err(|e| {
            error!(host = %self.address, error = %e, "打开SSH通道失败");
            RunnerError::SessionOpen {
                address: self.address.clone(),
                reason: e.to_string(),
            }
        })?;

        Ok(Box::new(SshSession {
            address: self.address.clone(),
            channel,
            closed: false,
        }))
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "English")
            .await;
    }
}

/// 一个 SSH exec 通道
struct SshSession {
    address: String,
    channel: russh::Channel<client::Msg>,
    closed: bool,
}

#[async_trait]
impl RemoteSession for SshSession {
    async fn exec(&mut self, command: &str) -> Result<(), RunnerError> {
        self.channel.exec(true, command).await.map_err(|e| {
            error!(host = %self.address, error = %e, "执行命令失败");
            RunnerError::Run {
                address: self.address.clone(),
                reason: e.to_string(),
            }
        })
    }

    async fn next_event(&mut self) -> Option<SessionEvent> {
        loop {
            let msg = self.channel.wait().await?;
            let event = match msg {
                ChannelMsg::Data { ref data } => SessionEvent::Stdout(data.to_vec()),
                ChannelMsg::ExtendedData { ref data, ext } if ext == SSH_EXTENDED_DATA_STDERR => {
                    SessionEvent::Stderr(data.to_vec())
                }
                ChannelMsg::ExitStatus { exit_status } => SessionEvent::ExitStatus(exit_status),
                ChannelMsg::ExitSignal { signal_name, .. } => {
                    SessionEvent::ExitSignal(format!("{:?}", signal_name))
                }
                ChannelMsg::Eof => SessionEvent::Eof,
                ChannelMsg::Close => return None,
                _ => continue,
            };
            return Some(event);
        }
    }

    async fn abort(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.channel.signal(Sig::ABRT).await {
            debug!(host = %self.address, error = %e, "Failed to deliver SIGABRT");
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = self.channel.close().await;
    }
}

/// SSH 客户端会话处理器（主机密钥校验）
struct HostKeyHandler {
    verification_mode: HostKeyVerification,
    known_hosts: Arc<KnownHosts>,
    host: String,
    port: u16,
}

impl HostKeyHandler {
    fn verify(&self, fingerprint: &str) -> bool {
        let host_key = format!("{}:{}", self.host, self.port);

        match self.verification_mode {
            HostKeyVerification::Disabled => true,
            HostKeyVerification::Accept | HostKeyVerification::Strict => {
                match self.known_hosts.get(&host_key) {
                    Some(stored) if stored == fingerprint => {
                        debug!(host = %host_key, "Host key verified");
                        true
                    }
                    Some(stored) => {
                        error!(
                            host = %host_key,
                            expected = %stored,
                            actual = %fingerprint,
                            "Host key mismatch - REJECTING CONNECTION"
                        );
                        false
                    }
                    None if self.verification_mode == HostKeyVerification::Accept => {
                        info!(
                            host = %host_key,
                            fingerprint = %fingerprint,
                            "Unknown host key - accepting"
                        );
                        true
                    }
                    None => {
                        error!(host = %host_key, "Unknown host in strict mode - rejecting connection");
                        false
                    }
                }
            }
        }
    }
}

#[async_trait]
impl client::Handler for HostKeyHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        let fingerprint = fingerprint(&server_public_key.public_key_base64());
        Ok(self.verify(&fingerprint))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler(mode: HostKeyVerification, known: &str) -> HostKeyHandler {
        HostKeyHandler {
            verification_mode: mode,
            known_hosts: Arc::new(KnownHosts::parse(known).unwrap()),
            host: "web1".to_string(),
            port: 22,
        }
    }

    #[test]
    fn test_disabled_accepts_everything() {
        assert!(handler(HostKeyVerification::Disabled, "").verify("abc"));
    }

    #[test]
    fn test_accept_mode() {
        assert!(handler(HostKeyVerification::Accept, "").verify("abc"));
        assert!(handler(HostKeyVerification::Accept, "web1:22 abc").verify("abc"));
        assert!(!handler(HostKeyVerification::Accept, "web1:22 abc").verify("def"));
    }

    #[test]
    fn test_strict_mode() {
        assert!(!handler(HostKeyVerification::Strict, "").verify("abc"));
        assert!(handler(HostKeyVerification::Strict, "web1:22 abc").verify("abc"));
        assert!(!handler(HostKeyVerification::Strict, "web1:22 abc").verify("def"));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_a_connect_error() {
        // 本地端口 1 上通常没有监听者，连接会被立即拒绝
        let connector = SshConnector::new(SshSettings {
            connect_timeout: Some(Duration::from_secs(5)),
            ..Default::default()
        });
        let target = TargetDescriptor::new("127.0.0.1:1", "nobody", "nothing");

        let err = connector.connect(&target).await.err().expect("connect should fail");
        assert!(matches!(err, RunnerError::Connect { .. }));
    }
}

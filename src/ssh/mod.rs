//! SSH执行模块
//! 认证方式解析、主机密钥校验以及基于 russh 的传输实现

pub mod auth;
pub mod executor;
pub mod known_hosts;

pub use auth::AuthMethod;
pub use executor::{SshConnector, SshSettings};
pub use known_hosts::{HostKeyVerification, KnownHosts};

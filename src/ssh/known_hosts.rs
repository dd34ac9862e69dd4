//! 主机密钥校验策略与指纹表

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::error::AppError;

/// 主机密钥验证策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HostKeyVerification {
    /// 严格模式：只接受指纹表中已知的主机密钥
    Strict,
    /// 接受模式：指纹表中有记录则校验，没有记录则接受
    Accept,
    /// 禁用验证
    #[default]
    Disabled,
}

impl std::str::FromStr for HostKeyVerification {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "accept" => Ok(Self::Accept),
            "disabled" | "none" | "false" => Ok(Self::Disabled),
            _ => Err(format!("Unknown host key verification mode: {}", s)),
        }
    }
}

/// 公钥 base64 编码的 SHA-256 指纹（十六进制）
pub fn fingerprint(public_key_base64: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(public_key_base64.as_bytes());
    hex::encode(hasher.finalize())
}

/// 已知主机指纹表，键为 `host:port`
#[derive(Debug, Clone, Default)]
pub struct KnownHosts {
    entries: HashMap<String, String>,
}

impl KnownHosts {
    /// 解析指纹文件：每行 `host:port <sha256-hex>`，支持 `#` 注释
    pub fn parse(content: &str) -> Result<Self, AppError> {
        let mut entries = HashMap::new();
        for (lineno, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.split_whitespace();
            match (parts.next(), parts.next(), parts.next()) {
                (Some(host), Some(fp), None) => {
                    entries.insert(host.to_string(), fp.to_lowercase());
                }
                _ => {
                    return Err(AppError::Config(format!(
                        "known hosts line {}: expected '<host:port> <sha256-hex>'",
                        lineno + 1
                    )))
                }
            }
        }
        Ok(Self { entries })
    }

    pub fn load(path: &Path) -> Result<Self, AppError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("cannot read known hosts file {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    pub fn get(&self, host_port: &str) -> Option<&str> {
        self.entries.get(host_port).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

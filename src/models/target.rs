//! 目标主机模型

use secrecy::{ExposeSecret, Secret};

/// 所有主机都隐式携带的标签
pub const TAG_ALL: &str = "all";

/// 一台目标主机：地址、用户名、凭据引用和标签
///
/// 凭据引用既可能是私钥文件路径，也可能是明文密码，具体含义在认证时才确定，
/// 所以统一用 `Secret` 包装，避免出现在日志中。
#[derive(Debug, Clone)]
pub struct TargetDescriptor {
    /// 网络地址，`host:port`
    pub address: String,
    /// 用户名
    pub username: String,
    /// 凭据引用
    pub credential: Secret<String>,
    /// 标签
    pub tags: Vec<String>,
}

impl TargetDescriptor {
    pub fn new(
        address: impl Into<String>,
        username: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            address: address.into(),
            username: username.into(),
            credential: Secret::new(credential.into()),
            tags: vec![TAG_ALL.to_string()],
        }
    }

    /// 追加标签
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for tag in tags {
            let tag = tag.into();
            if !self.tags.contains(&tag) {
                self.tags.push(tag);
            }
        }
        self
    }

    /// 是否携带任一给定标签
    pub fn matches_any(&self, wanted: &[String]) -> bool {
        self.tags.iter().any(|t| wanted.contains(t))
    }

    /// 凭据原文
    pub fn credential(&self) -> &str {
        self.credential.expose_secret()
    }

    /// 拆分 `host:port`
    ///
    /// 端口取最后一个冒号之后的部分，以兼容带方括号的 IPv6 地址（`[::1]:22`）。
    pub fn host_port(&self) -> Result<(String, u16), String> {
        let (host, port) = self
            .address
            .rsplit_once(':')
            .ok_or_else(|| "expected host:port".to_string())?;

        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err("empty host".to_string());
        }

        let port = port
            .parse::<u16>()
            .map_err(|_| format!("invalid port '{}'", port))?;
        if port == 0 {
            return Err("port must be non-zero".to_string());
        }

        Ok((host.to_string(), port))
    }
}

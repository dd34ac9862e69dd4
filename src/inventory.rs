//! 主机清单
//!
//! 每行一台主机：`user@host:port:credential:taga,tagb`。空行和 `#` 注释忽略，
//! 格式错误的行记录警告后跳过。

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::AppError;
use crate::models::TargetDescriptor;

/// 默认清单文件
pub const DEFAULT_HOSTS_FILE: &str = "hosts.ini";

/// 清单文件路径的环境变量
pub const HOSTS_ENV: &str = "MULTICMD_HOSTS";

const INVALID_HOSTLINE: &str = "invalid host string, expected: user@host:port:credential:taga,tagb";

/// 依次取命令行参数、环境变量、默认值
pub fn resolve_hosts_file(flag: Option<&str>) -> PathBuf {
    let from_env = std::env::var(HOSTS_ENV).ok();
    [flag.map(str::to_string), from_env]
        .into_iter()
        .flatten()
        .find(|candidate| !candidate.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_HOSTS_FILE))
}

/// 解析单行
pub fn parse_hostline(line: &str) -> Result<TargetDescriptor, String> {
    if line.matches(':').count() != 3 || line.matches('@').count() != 1 {
        return Err(INVALID_HOSTLINE.to_string());
    }

    let (username, rest) = line.split_once('@').ok_or_else(|| INVALID_HOSTLINE.to_string())?;
    let mut fields = rest.splitn(4, ':');
    let (host, port, credential, tags) = match (fields.next(), fields.next(), fields.next(), fields.next()) {
        (Some(host), Some(port), Some(credential), Some(tags)) => (host, port, credential, tags),
        _ => return Err(INVALID_HOSTLINE.to_string()),
    };

    let tags = tags
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty());

    Ok(TargetDescriptor::new(format!("{}:{}", host, port), username, credential).with_tags(tags))
}

/// 解析清单内容，保留所有格式正确的行
pub fn parse_hosts(content: &str) -> Vec<TargetDescriptor> {
    content
        .lines()
        .enumerate()
        .filter_map(|(index, raw)| {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            match parse_hostline(line) {
                Ok(target) => Some(target),
                Err(e) => {
                    warn!(line = index + 1, error = %e, "Ignoring host list line");
                    None
                }
            }
        })
        .collect()
}

/// 保留携带任一标签的主机，顺序不变
pub fn select(targets: Vec<TargetDescriptor>, tags: &[String]) -> Vec<TargetDescriptor> {
    targets.into_iter().filter(|t| t.matches_any(tags)).collect()
}

/// 读取清单文件并按标签筛选；没有匹配的主机时报错
pub fn load(path: &Path, tags: &[String]) -> Result<Vec<TargetDescriptor>, AppError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| AppError::Inventory(format!("cannot read {}: {}", path.display(), e)))?;

    let selected = select(parse_hosts(&content), tags);
    if selected.is_empty() {
        return Err(AppError::NoTargets(path.display().to_string()));
    }
    Ok(selected)
}

//! 命令行参数

use clap::Parser;

use crate::error::AppError;
use crate::models::TAG_ALL;

#[derive(Debug, Parser)]
#[command(name = "multicmd")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// 主机清单文件（默认取 MULTICMD_HOSTS，再退回 hosts.ini）
    #[arg(short = 'f', long = "file", value_name = "FILE")]
    pub hosts_file: Option<String>,

    /// 只在带这些标签的主机上执行，逗号分隔
    #[arg(short = 't', long = "tag", value_delimiter = ',', default_value = TAG_ALL)]
    pub tags: Vec<String>,

    /// 单主机超时（秒），非正数表示不限制
    #[arg(long, value_name = "SECS", allow_negative_numbers = true)]
    pub timeout: Option<i64>,

    /// 并发会话上限，0 表示不限制
    #[arg(long, value_name = "N")]
    pub max_parallel: Option<usize>,

    /// 关闭彩色输出
    #[arg(long)]
    pub no_color: bool,

    /// 输出调试日志
    #[arg(short, long)]
    pub verbose: bool,

    /// 要执行的命令
    #[arg(value_name = "COMMAND", required = true, num_args = 1.., trailing_var_arg = true)]
    pub command: Vec<String>,
}

impl Args {
    /// 把剩余参数用单个空格拼成命令
    pub fn command_line(&self) -> Result<String, AppError> {
        let command = self.command.join(" ");
        if command.trim().is_empty() {
            return Err(AppError::InvalidArgs("command must not be empty".to_string()));
        }
        Ok(command)
    }

    /// 去掉空标签；全部为空时退回 `all`
    pub fn tag_filter(&self) -> Vec<String> {
        let tags: Vec<String> = self
            .tags
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();
        if tags.is_empty() {
            vec![TAG_ALL.to_string()]
        } else {
            tags
        }
    }
}

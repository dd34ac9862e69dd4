//! multicmd 库
//! 在多台主机上并发执行同一条命令，实时汇聚各主机输出

pub mod cli;
pub mod concurrency;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod fanout;
pub mod inventory;
pub mod models;
pub mod output;
pub mod session;
pub mod ssh;
pub mod telemetry;

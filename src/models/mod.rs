//! 数据模型模块

pub mod target;

pub use target::{TargetDescriptor, TAG_ALL};

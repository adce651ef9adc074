// 工具模块 - 通用工具函数
pub mod indicators;
pub mod session;
pub mod unified_logger;
pub mod webhook;

pub use unified_logger::{init_logger, LogConfig};

// 核心模块 - 数据模型、错误、配置与重试
pub mod config;
pub mod error;
pub mod retry_policy;
pub mod types;

pub use config::*;
pub use error::*;
pub use types::*;

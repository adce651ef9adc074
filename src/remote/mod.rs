//! 远端版本化文档
//!
//! 编辑进程与评估进程不共享内存和磁盘，唯一的同步手段是文档版本号：
//! 写入必须携带读取时拿到的版本号，远端版本已变化则返回 `VersionConflict`。

pub mod github;
pub mod local_file;
pub mod memory;

use async_trait::async_trait;

use crate::core::types::{Result, VersionToken};

pub use github::GithubDocumentClient;
pub use local_file::LocalFileDocumentClient;
pub use memory::MemoryDocumentClient;

/// 读取到的文档内容及其版本号
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteDocument {
    pub content: String,
    pub version: VersionToken,
}

#[async_trait]
pub trait RemoteDocumentClient: Send + Sync {
    /// 用于日志的位置描述
    fn describe(&self) -> String;

    /// 读取文档；不存在返回 `NotFound`，传输失败返回 `Unavailable`
    async fn fetch(&self) -> Result<RemoteDocument>;

    /// 条件写入：远端版本不等于 `expected` 时返回 `VersionConflict`，不会部分写入
    async fn update(&self, content: &str, expected: &VersionToken) -> Result<VersionToken>;

    /// 文档不存在时创建；已存在返回 `VersionConflict`
    async fn create(&self, content: &str) -> Result<VersionToken>;
}

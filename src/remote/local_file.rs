use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::time::sleep;

use super::{RemoteDocument, RemoteDocumentClient};
use crate::core::error::MonitorError;
use crate::core::types::{Result, VersionToken};

/// 获取写锁的最多尝试次数
const LOCK_ATTEMPTS: u32 = 20;
/// 超过该时长的锁文件视为崩溃进程遗留
const STALE_LOCK_SECS: u64 = 60;

/// 本地文件文档，版本号为内容的 SHA-256
///
/// 编辑进程与评估进程可能同时写同一个文件，比对哈希和替换文件都在
/// `<path>.lock` 独占锁内完成。
pub struct LocalFileDocumentClient {
    path: PathBuf,
}

/// 持有期间独占 `<path>.lock`，释放时删除锁文件
struct WriteLock {
    path: PathBuf,
}

impl Drop for WriteLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            log::warn!("⚠️ 删除写锁 {} 失败: {}", self.path.display(), e);
        }
    }
}

impl LocalFileDocumentClient {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn content_token(bytes: &[u8]) -> VersionToken {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        VersionToken::new(hex::encode(hasher.finalize()))
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(suffix);
        PathBuf::from(name)
    }

    fn lock_path(&self) -> PathBuf {
        self.sibling(".lock")
    }

    async fn read_raw(&self) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(MonitorError::Unavailable(format!(
                "读取 {} 失败: {}",
                self.path.display(),
                e
            ))),
        }
    }

    async fn ensure_parent(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    MonitorError::Unavailable(format!("创建目录 {} 失败: {}", parent.display(), e))
                })?;
            }
        }
        Ok(())
    }

    /// 以 create_new 独占创建锁文件，其他进程持有时退避等待
    async fn acquire_lock(&self) -> Result<WriteLock> {
        self.ensure_parent().await?;
        let lock = self.lock_path();

        for attempt in 0..LOCK_ATTEMPTS {
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&lock)
                .await
            {
                Ok(_) => return Ok(WriteLock { path: lock }),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if self.clear_stale_lock(&lock).await {
                        continue;
                    }
                    sleep(Duration::from_millis(20 * (attempt as u64 + 1))).await;
                }
                Err(e) => {
                    return Err(MonitorError::Unavailable(format!(
                        "创建写锁 {} 失败: {}",
                        lock.display(),
                        e
                    )))
                }
            }
        }

        Err(MonitorError::Unavailable(format!(
            "等待写锁超时: {}",
            lock.display()
        )))
    }

    async fn clear_stale_lock(&self, lock: &Path) -> bool {
        let modified = match tokio::fs::metadata(lock).await.and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(_) => return false,
        };
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or_default();
        if age < Duration::from_secs(STALE_LOCK_SECS) {
            return false;
        }
        log::warn!(
            "⚠️ 清理遗留写锁 {} (已存在{}秒)",
            lock.display(),
            age.as_secs()
        );
        tokio::fs::remove_file(lock).await.is_ok()
    }

    /// 先写临时文件再改名，读者不会看到写了一半的内容
    async fn write_atomic(&self, content: &str) -> Result<()> {
        let tmp = self.sibling(&format!(
            ".{}.{:08x}.tmp",
            std::process::id(),
            rand::random::<u32>()
        ));
        if let Err(e) = tokio::fs::write(&tmp, content.as_bytes()).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(MonitorError::Unavailable(format!(
                "写入 {} 失败: {}",
                tmp.display(),
                e
            )));
        }
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(MonitorError::Unavailable(format!(
                "替换 {} 失败: {}",
                self.path.display(),
                e
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteDocumentClient for LocalFileDocumentClient {
    fn describe(&self) -> String {
        format!("file://{}", self.path.display())
    }

    async fn fetch(&self) -> Result<RemoteDocument> {
        let bytes = self
            .read_raw()
            .await?
            .ok_or_else(|| MonitorError::NotFound(self.path.display().to_string()))?;
        let version = Self::content_token(&bytes);
        let content = String::from_utf8(bytes)
            .map_err(|e| MonitorError::CorruptStore(format!("文件不是合法的UTF-8: {}", e)))?;
        Ok(RemoteDocument { content, version })
    }

    async fn update(&self, content: &str, expected: &VersionToken) -> Result<VersionToken> {
        let _lock = self.acquire_lock().await?;

        let current = self
            .read_raw()
            .await?
            .ok_or_else(|| MonitorError::NotFound(self.path.display().to_string()))?;
        if Self::content_token(&current) != *expected {
            return Err(MonitorError::VersionConflict {
                expected: expected.to_string(),
            });
        }

        self.write_atomic(content).await?;
        Ok(Self::content_token(content.as_bytes()))
    }

    async fn create(&self, content: &str) -> Result<VersionToken> {
        let _lock = self.acquire_lock().await?;

        if self.read_raw().await?.is_some() {
            return Err(MonitorError::VersionConflict {
                expected: "<absent>".to_string(),
            });
        }

        self.write_atomic(content).await?;
        Ok(Self::content_token(content.as_bytes()))
    }
}

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{RemoteDocument, RemoteDocumentClient};
use crate::core::error::MonitorError;
use crate::core::types::{Result, VersionToken};

const ABSENT: &str = "<absent>";

/// 进程内文档，版本号单调递增（v1, v2, ...）
#[derive(Default)]
pub struct MemoryDocumentClient {
    state: Mutex<Option<(String, u64)>>,
    writes: AtomicUsize,
}

impl MemoryDocumentClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_content(content: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(Some((content.into(), 1))),
            writes: AtomicUsize::new(0),
        }
    }

    /// 当前内容（测试与调试用）
    pub fn content(&self) -> Option<String> {
        self.lock().as_ref().map(|(content, _)| content.clone())
    }

    /// 成功写入次数
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<(String, u64)>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn token(version: u64) -> VersionToken {
        VersionToken::new(format!("v{}", version))
    }
}

#[async_trait]
impl RemoteDocumentClient for MemoryDocumentClient {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    async fn fetch(&self) -> Result<RemoteDocument> {
        let state = self.lock();
        let (content, version) = state
            .as_ref()
            .ok_or_else(|| MonitorError::NotFound("memory document".to_string()))?;
        Ok(RemoteDocument {
            content: content.clone(),
            version: Self::token(*version),
        })
    }

    async fn update(&self, content: &str, expected: &VersionToken) -> Result<VersionToken> {
        let mut state = self.lock();
        let current = match state.as_ref() {
            Some((_, version)) => *version,
            None => return Err(MonitorError::NotFound("memory document".to_string())),
        };

        if Self::token(current) != *expected {
            return Err(MonitorError::VersionConflict {
                expected: expected.to_string(),
            });
        }

        let next = current + 1;
        *state = Some((content.to_string(), next));
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(Self::token(next))
    }

    async fn create(&self, content: &str) -> Result<VersionToken> {
        let mut state = self.lock();
        if state.is_some() {
            return Err(MonitorError::VersionConflict {
                expected: ABSENT.to_string(),
            });
        }
        *state = Some((content.to_string(), 1));
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(Self::token(1))
    }
}

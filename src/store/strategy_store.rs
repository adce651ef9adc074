use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};

use super::codec;
use crate::core::config::StoreConfig;
use crate::core::error::MonitorError;
use crate::core::retry_policy::{ExponentialBackoffRetry, RetryConfig, RetryPolicy};
use crate::core::types::{Result, SessionId, StrategyRecord, StrategySet};
use crate::remote::{RemoteDocument, RemoteDocumentClient};
use crate::strategies::rules;

/// 策略仓库
///
/// 所有写操作都是 读取 → 解码 → 修改 → 编码 → 带版本号写回。
/// 版本冲突时从读取重新开始，重试耗尽返回 `Contention`。
pub struct StrategyStore {
    client: Arc<dyn RemoteDocumentClient>,
    retry: ExponentialBackoffRetry,
    timeout: Duration,
}

impl StrategyStore {
    pub fn new(client: Arc<dyn RemoteDocumentClient>, config: &StoreConfig) -> Self {
        let retry = ExponentialBackoffRetry::new(RetryConfig::for_conflicts(
            config.max_retries,
            config.initial_backoff_ms,
            config.max_backoff_ms,
        ));
        Self::with_retry(client, retry, Duration::from_secs(config.timeout_secs))
    }

    pub fn with_retry(
        client: Arc<dyn RemoteDocumentClient>,
        retry: ExponentialBackoffRetry,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            retry,
            timeout,
        }
    }

    pub fn describe(&self) -> String {
        self.client.describe()
    }

    async fn with_timeout<T>(
        &self,
        operation: &str,
        future: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match timeout(self.timeout, future).await {
            Ok(result) => result,
            Err(_) => Err(MonitorError::timeout(operation, self.timeout.as_secs())),
        }
    }

    async fn fetch_document(&self) -> Result<RemoteDocument> {
        self.with_timeout("fetch", self.client.fetch()).await
    }

    // ============= 读操作 =============

    /// 读取当前策略集合（不重试）
    pub async fn list(&self) -> Result<StrategySet> {
        let document = self.fetch_document().await?;
        codec::decode(&document.content, document.version)
    }

    pub async fn get(&self, fund_code: &str) -> Result<StrategyRecord> {
        self.list()
            .await?
            .get(fund_code)
            .cloned()
            .ok_or_else(|| MonitorError::UnknownFund(fund_code.to_string()))
    }

    pub async fn was_notification_sent(&self, session: &SessionId) -> Result<bool> {
        Ok(self.list().await?.was_notified(session))
    }

    // ============= 写操作 =============

    /// 文档不存在时创建空文档，返回是否新建
    pub async fn init(&self) -> Result<bool> {
        match self.fetch_document().await {
            Ok(document) => {
                codec::decode(&document.content, document.version)?;
                log::info!("📄 策略文档已存在: {}", self.describe());
                Ok(false)
            }
            Err(MonitorError::NotFound(_)) => {
                let result = self
                    .with_timeout("create", self.client.create(&codec::empty_document()))
                    .await;
                match result {
                    Ok(version) => {
                        log::info!("✅ 已创建策略文档 {} (版本 {})", self.describe(), version);
                        Ok(true)
                    }
                    // 另一方抢先创建
                    Err(MonitorError::VersionConflict { .. }) => Ok(false),
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// 追加一条策略；调用方提供的触发时间会被清空
    pub async fn add(&self, record: StrategyRecord) -> Result<()> {
        rules::validate(&record)?;
        let record = StrategyRecord {
            last_triggered: None,
            ..record
        };
        let code = record.fund_code.clone();

        self.mutate("add", |set| set.insert(record.clone())).await?;
        log::info!("✅ 已添加策略: {}", code);
        Ok(())
    }

    pub async fn remove(&self, fund_code: &str) -> Result<StrategyRecord> {
        let removed = self.mutate("remove", |set| set.remove(fund_code)).await?;
        log::info!("🗑️ 已删除策略: {}", removed.display_label());
        Ok(removed)
    }

    pub async fn set_enabled(&self, fund_code: &str, enabled: bool) -> Result<()> {
        self.mutate("set_enabled", |set| {
            let record = set
                .get_mut(fund_code)
                .ok_or_else(|| MonitorError::UnknownFund(fund_code.to_string()))?;
            record.enabled = enabled;
            Ok(())
        })
        .await?;
        log::info!(
            "✅ 策略 {} 已{}",
            fund_code,
            if enabled { "启用" } else { "停用" }
        );
        Ok(())
    }

    /// 记录触发时间；比已有时间更早时不写入
    pub async fn mark_triggered(&self, fund_code: &str, at: DateTime<Utc>) -> Result<bool> {
        self.mutate("mark_triggered", |set| {
            let record = set
                .get_mut(fund_code)
                .ok_or_else(|| MonitorError::UnknownFund(fund_code.to_string()))?;
            Ok(record.mark_triggered(at))
        })
        .await
    }

    /// 写入时段标记；标记只向后推进，迟到的旧时段不会覆盖新标记
    pub async fn record_notification_sent(&self, session: &SessionId) -> Result<()> {
        let advanced = self
            .mutate("record_notification_sent", |set| Ok(set.mark_notified(session)))
            .await?;
        if !advanced {
            log::warn!("⚠️ 时段 {} 不晚于已有标记，保持原标记", session);
        }
        Ok(())
    }

    /// 读-改-写循环
    ///
    /// `apply` 返回错误时直接中止，不写入；修改后文档不变时也不写入。
    async fn mutate<T, F>(&self, operation: &str, mut apply: F) -> Result<T>
    where
        F: FnMut(&mut StrategySet) -> Result<T>,
    {
        let mut attempt: u32 = 0;

        loop {
            let document = self.fetch_document().await?;
            let mut set = codec::decode(&document.content, document.version.clone())?;
            let before = codec::encode(&set)?;

            let outcome = apply(&mut set)?;

            let after = codec::encode(&set)?;
            if after == before {
                log::debug!("操作 {} 未改变文档，跳过写入", operation);
                return Ok(outcome);
            }

            let written = self
                .with_timeout("update", self.client.update(&after, &document.version))
                .await;

            match written {
                Ok(version) => {
                    if attempt > 0 {
                        log::info!("✅ 操作 {} 在第{}次尝试后写入成功", operation, attempt + 1);
                    }
                    log::debug!("文档版本 {} -> {}", document.version, version);
                    return Ok(outcome);
                }
                Err(error @ MonitorError::VersionConflict { .. }) => {
                    if !self.retry.should_retry(&error, attempt) {
                        log::error!(
                            "❌ 操作 {} 连续{}次版本冲突，放弃",
                            operation,
                            attempt + 1
                        );
                        return Err(MonitorError::Contention {
                            operation: operation.to_string(),
                            attempts: attempt + 1,
                        });
                    }

                    let delay = self.retry.calculate_delay(attempt);
                    log::warn!(
                        "⚠️ 操作 {} 遇到版本冲突，{}毫秒后重新读取 (尝试 {}/{})",
                        operation,
                        delay.as_millis(),
                        attempt + 1,
                        self.retry.max_retries()
                    );
                    attempt += 1;
                    sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

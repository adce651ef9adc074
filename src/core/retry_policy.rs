use crate::core::error::MonitorError;
use async_trait::async_trait;
/// 重试策略（带抖动的指数退避）
use std::time::Duration;
use tokio::time::sleep;

/// 重试策略配置
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// 最大重试次数（不含首次尝试）
    pub max_retries: u32,
    /// 初始延迟（毫秒）
    pub initial_delay_ms: u64,
    /// 最大延迟（毫秒）
    pub max_delay_ms: u64,
    /// 指数退避因子
    pub backoff_factor: f64,
    /// 是否添加抖动
    pub jitter: bool,
    /// 可重试的错误类型
    pub retryable_errors: Vec<RetryableError>,
}

impl RetryConfig {
    /// 读-改-写循环使用：只重试版本冲突，短延迟
    pub fn for_conflicts(max_retries: u32, initial_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_retries,
            initial_delay_ms,
            max_delay_ms,
            backoff_factor: 2.0,
            jitter: true,
            retryable_errors: vec![RetryableError::VersionConflict],
        }
    }

    /// 传输层瞬时故障使用：只重试远端不可用
    pub fn for_transport(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_delay_ms: 200,
            max_delay_ms: 2000,
            backoff_factor: 2.0,
            jitter: true,
            retryable_errors: vec![RetryableError::Unavailable],
        }
    }
}

/// 可重试的错误类型
#[derive(Debug, Clone, PartialEq)]
pub enum RetryableError {
    Unavailable,
    VersionConflict,
}

/// 重试策略trait
#[async_trait]
pub trait RetryPolicy: Send + Sync {
    /// 判断是否应该重试
    fn should_retry(&self, error: &MonitorError, attempt: u32) -> bool;

    /// 计算重试延迟
    fn calculate_delay(&self, attempt: u32) -> Duration;

    /// 执行带重试的操作
    async fn execute_with_retry<F, T, Fut>(&self, operation: F) -> Result<T, MonitorError>
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: std::future::Future<Output = Result<T, MonitorError>> + Send,
        T: Send;
}

/// 指数退避重试策略
#[derive(Debug, Clone)]
pub struct ExponentialBackoffRetry {
    config: RetryConfig,
}

impl ExponentialBackoffRetry {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    /// 判断错误是否可重试
    fn is_retryable_error(&self, error: &MonitorError) -> bool {
        match error {
            MonitorError::Unavailable(_) => self
                .config
                .retryable_errors
                .contains(&RetryableError::Unavailable),
            MonitorError::VersionConflict { .. } => self
                .config
                .retryable_errors
                .contains(&RetryableError::VersionConflict),
            _ => false,
        }
    }
}

#[async_trait]
impl RetryPolicy for ExponentialBackoffRetry {
    fn should_retry(&self, error: &MonitorError, attempt: u32) -> bool {
        if attempt >= self.config.max_retries {
            return false;
        }

        self.is_retryable_error(error)
    }

    fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_delay =
            self.config.initial_delay_ms as f64 * self.config.backoff_factor.powi(attempt as i32);

        let mut delay_ms = base_delay.min(self.config.max_delay_ms as f64) as u64;

        // 添加抖动，避免两个写入方同步重试
        if self.config.jitter && delay_ms > 0 {
            use rand::Rng;
            let mut rng = rand::thread_rng();
            let jitter = rng.gen_range(0..=delay_ms / 2);
            delay_ms += jitter;
        }

        Duration::from_millis(delay_ms)
    }

    async fn execute_with_retry<F, T, Fut>(&self, operation: F) -> Result<T, MonitorError>
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: std::future::Future<Output = Result<T, MonitorError>> + Send,
        T: Send,
    {
        let mut attempt = 0;

        loop {
            match operation().await {
                Ok(result) => {
                    if attempt > 0 {
                        log::info!("✅ 操作在第{}次尝试后成功", attempt + 1);
                    }
                    return Ok(result);
                }
                Err(error) => {
                    if !self.should_retry(&error, attempt) {
                        return Err(error);
                    }

                    let delay = self.calculate_delay(attempt);
                    log::warn!(
                        "⚠️ 操作失败，将在{:.2}秒后重试 (尝试 {}/{}): {}",
                        delay.as_secs_f64(),
                        attempt + 1,
                        self.config.max_retries,
                        error
                    );

                    attempt += 1;

                    sleep(delay).await;
                }
            }
        }
    }
}

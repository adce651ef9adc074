use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MonitorError {
    #[error("资源不存在: {0}")]
    NotFound(String),

    #[error("远端不可用: {0}")]
    Unavailable(String),

    #[error("版本冲突: 期望版本 {expected}")]
    VersionConflict { expected: String },

    #[error("写入竞争: 操作 '{operation}' 在 {attempts} 次尝试后仍冲突")]
    Contention { operation: String, attempts: u32 },

    #[error("策略文档损坏: {0}")]
    CorruptStore(String),

    #[error("策略规则无效: {fund_code} - {reason}")]
    InvalidRule { fund_code: String, reason: String },

    #[error("行情数据不可用: {fund_code} - {reason}")]
    DataUnavailable { fund_code: String, reason: String },

    #[error("基金代码重复: {0}")]
    DuplicateFund(String),

    #[error("基金未配置策略: {0}")]
    UnknownFund(String),

    #[error("配置错误: {0}")]
    ConfigError(String),

    #[error("通知发送失败: {0}")]
    NotificationError(String),
}

impl MonitorError {
    /// 超时统一视为远端不可用
    pub fn timeout(operation: &str, timeout_secs: u64) -> Self {
        MonitorError::Unavailable(format!("操作 '{}' 超时 ({}秒)", operation, timeout_secs))
    }

    /// 判断错误是否可以重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MonitorError::Unavailable(_) | MonitorError::VersionConflict { .. }
        )
    }

    /// 获取错误的严重程度
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            MonitorError::VersionConflict { .. } => ErrorSeverity::Info,
            MonitorError::Unavailable(_) => ErrorSeverity::Warning,
            MonitorError::DataUnavailable { .. } => ErrorSeverity::Warning,
            MonitorError::InvalidRule { .. } => ErrorSeverity::Warning,
            MonitorError::NotificationError(_) => ErrorSeverity::Error,
            MonitorError::Contention { .. } => ErrorSeverity::Error,
            MonitorError::CorruptStore(_) => ErrorSeverity::Critical,
            MonitorError::ConfigError(_) => ErrorSeverity::Critical,
            _ => ErrorSeverity::Error,
        }
    }

    /// 获取用户友好的错误描述
    pub fn user_friendly_message(&self) -> String {
        match self {
            MonitorError::Unavailable(_) => "远端服务暂不可用，请检查网络或稍后重试".to_string(),
            MonitorError::Contention { .. } => {
                "策略文档正被其他进程修改，请稍后重试".to_string()
            }
            MonitorError::CorruptStore(_) => {
                "策略文档格式损坏，已保留远端最后一次有效内容，请手动修复".to_string()
            }
            MonitorError::DuplicateFund(code) => format!("基金 {} 已存在监控策略", code),
            MonitorError::UnknownFund(code) => format!("基金 {} 没有配置监控策略", code),
            _ => self.to_string(),
        }
    }
}

impl From<reqwest::Error> for MonitorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            MonitorError::Unavailable(format!("请求超时: {}", err))
        } else {
            MonitorError::Unavailable(format!("网络请求错误: {}", err))
        }
    }
}

/// 错误严重程度
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorSeverity {
    Info,     // 信息性错误，通常不影响操作
    Warning,  // 警告性错误，可以重试或降级
    Error,    // 一般错误，需要用户处理
    Critical, // 严重错误，需要立即处理
}

use crate::core::error::MonitorError;
use crate::core::types::Result;
use crate::utils::unified_logger::LogConfig;
use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_true() -> bool {
    true
}

fn default_max_retries() -> u32 {
    5
}

fn default_initial_backoff_ms() -> u64 {
    50
}

fn default_max_backoff_ms() -> u64 {
    800
}

fn default_store_timeout_secs() -> u64 {
    15
}

fn default_github_api() -> String {
    "https://api.github.com".to_string()
}

fn default_document_path() -> String {
    "fund_strategies.json".to_string()
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}

fn default_commit_message() -> String {
    "chore: update fund strategies".to_string()
}

fn default_history_url() -> String {
    "https://api.fund.eastmoney.com/f10/lsjz".to_string()
}

fn default_estimate_url() -> String {
    "http://fundgz.1234567.com.cn/js".to_string()
}

fn default_market_timeout_secs() -> u64 {
    10
}

fn default_max_concurrency() -> usize {
    4
}

fn default_record_timeout_secs() -> u64 {
    30
}

fn default_notify_timeout_secs() -> u64 {
    10
}

fn default_utc_offset_hours() -> i32 {
    8
}

/// 策略文档存放位置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    Github,
    LocalFile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubStoreConfig {
    #[serde(default = "default_github_api")]
    pub api_base: String,
    pub owner: String,
    pub repo: String,
    #[serde(default = "default_document_path")]
    pub path: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    /// 存放访问令牌的环境变量名
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_commit_message")]
    pub commit_message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalFileStoreConfig {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    #[serde(default)]
    pub github: Option<GithubStoreConfig>,
    #[serde(default)]
    pub local_file: Option<LocalFileStoreConfig>,
    /// 版本冲突后的最大重试次数
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_store_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketDataConfig {
    #[serde(default = "default_history_url")]
    pub history_url: String,
    #[serde(default = "default_estimate_url")]
    pub estimate_url: String,
    /// 是否把盘中估值作为最新数据点
    #[serde(default = "default_true")]
    pub include_estimate: bool,
    #[serde(default = "default_market_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for MarketDataConfig {
    fn default() -> Self {
        Self {
            history_url: default_history_url(),
            estimate_url: default_estimate_url(),
            include_estimate: true,
            timeout_secs: default_market_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationConfig {
    /// 并发评估的策略数上限（外部接口限流）
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// 单条策略（取数+评估）的超时
    #[serde(default = "default_record_timeout_secs")]
    pub record_timeout_secs: u64,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            record_timeout_secs: default_record_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifierKind {
    Wecom,
    Log,
}

/// 企业微信机器人配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeComConfig {
    pub webhook_url: String,
    #[serde(default)]
    pub mentioned_list: Vec<String>,
    #[serde(default)]
    pub mentioned_mobile_list: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierConfig {
    pub kind: NotifierKind,
    #[serde(default)]
    pub wecom: Option<WeComConfig>,
    #[serde(default = "default_notify_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            kind: NotifierKind::Log,
            wecom: None,
            timeout_secs: default_notify_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// 推导逻辑日期使用的时区偏移
    #[serde(default = "default_utc_offset_hours")]
    pub utc_offset_hours: i32,
    /// 周末不评估
    #[serde(default = "default_true")]
    pub skip_weekends: bool,
    #[serde(default)]
    pub label: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            utc_offset_hours: default_utc_offset_hours(),
            skip_weekends: true,
            label: None,
        }
    }
}

impl SessionConfig {
    pub fn offset(&self) -> Result<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_hours * 3600).ok_or_else(|| {
            MonitorError::ConfigError(format!("非法的时区偏移: {}", self.utc_offset_hours))
        })
    }
}

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub store: StoreConfig,
    #[serde(default)]
    pub market_data: MarketDataConfig,
    #[serde(default)]
    pub evaluation: EvaluationConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub logging: LogConfig,
}

impl AppConfig {
    /// 从YAML文件加载配置，环境变量 `FUNDWATCH__SECTION__KEY` 可覆盖
    pub fn from_file(path: &str) -> Result<Self> {
        if !Path::new(path).exists() {
            return Err(MonitorError::ConfigError(format!("配置文件不存在: {}", path)));
        }

        let settings = config::Config::builder()
            .add_source(config::File::from(Path::new(path)))
            .add_source(
                config::Environment::with_prefix("FUNDWATCH")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .map_err(|e| MonitorError::ConfigError(format!("读取配置文件失败: {}", e)))?;

        let config: AppConfig = settings
            .try_deserialize()
            .map_err(|e| MonitorError::ConfigError(format!("解析配置失败: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        let config: AppConfig = serde_yaml::from_str(contents)
            .map_err(|e| MonitorError::ConfigError(format!("解析配置失败: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        match self.store.backend {
            StoreBackend::Github if self.store.github.is_none() => {
                return Err(MonitorError::ConfigError(
                    "store.backend=github 需要 store.github 配置".to_string(),
                ));
            }
            StoreBackend::LocalFile if self.store.local_file.is_none() => {
                return Err(MonitorError::ConfigError(
                    "store.backend=local_file 需要 store.local_file 配置".to_string(),
                ));
            }
            _ => {}
        }

        if self.notifier.kind == NotifierKind::Wecom && self.notifier.wecom.is_none() {
            return Err(MonitorError::ConfigError(
                "notifier.kind=wecom 需要 notifier.wecom 配置".to_string(),
            ));
        }

        if self.evaluation.max_concurrency == 0 {
            return Err(MonitorError::ConfigError(
                "evaluation.max_concurrency 必须大于0".to_string(),
            ));
        }

        self.session.offset()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
store:
  backend: github
  github:
    owner: someone
    repo: fund-config
notifier:
  kind: wecom
  wecom:
    webhook_url: https://qyapi.weixin.qq.com/cgi-bin/webhook/send?key=test
    mentioned_list: ["@all"]
evaluation:
  max_concurrency: 2
"#;

    #[test]
    fn test_defaults_are_filled() {
        let config = AppConfig::from_yaml_str(SAMPLE).unwrap();
        let github = config.store.github.as_ref().unwrap();
        assert_eq!(github.api_base, "https://api.github.com");
        assert_eq!(github.path, "fund_strategies.json");
        assert_eq!(github.token_env, "GITHUB_TOKEN");
        assert_eq!(config.store.max_retries, 5);
        assert_eq!(config.evaluation.max_concurrency, 2);
        assert_eq!(config.evaluation.record_timeout_secs, 30);
        assert_eq!(config.session.utc_offset_hours, 8);
        assert!(config.session.skip_weekends);
        assert!(config.market_data.include_estimate);
    }

    #[test]
    fn test_backend_section_is_required() {
        let broken = "store:\n  backend: local_file\n";
        let err = AppConfig::from_yaml_str(broken).unwrap_err();
        assert!(matches!(err, MonitorError::ConfigError(_)));
    }

    #[test]
    fn test_zero_concurrency_is_rejected() {
        let broken = "store:\n  backend: local_file\n  local_file:\n    path: /tmp/x.json\nevaluation:\n  max_concurrency: 0\n";
        assert!(AppConfig::from_yaml_str(broken).is_err());
    }
}

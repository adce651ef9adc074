/// 统一日志管理模块
/// 控制台 + 按大小轮转的文件日志，基于 log4rs
use anyhow::{anyhow, Result};
use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::append::rolling_file::policy::compound::roll::fixed_window::FixedWindowRoller;
use log4rs::append::rolling_file::policy::compound::trigger::size::SizeTrigger;
use log4rs::append::rolling_file::policy::compound::CompoundPolicy;
use log4rs::append::rolling_file::RollingFileAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

const LOG_PATTERN: &str = "[{d(%Y-%m-%d %H:%M:%S%.3f)}] [{l}] [{M}] {m}{n}";

fn default_root_dir() -> String {
    "logs".to_string()
}

fn default_level() -> String {
    "INFO".to_string()
}

fn default_max_file_size_mb() -> u64 {
    10
}

fn default_retained_files() -> u32 {
    7
}

fn default_console_output() -> bool {
    true
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_root_dir")]
    pub root_dir: String,
    #[serde(default = "default_level")]
    pub default_level: String,
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,
    /// 保留的轮转文件个数
    #[serde(default = "default_retained_files")]
    pub retained_files: u32,
    #[serde(default = "default_console_output")]
    pub console_output: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            default_level: default_level(),
            max_file_size_mb: default_max_file_size_mb(),
            retained_files: default_retained_files(),
            console_output: default_console_output(),
        }
    }
}

impl LogConfig {
    /// 获取日志级别
    pub fn level_filter(&self) -> LevelFilter {
        match self.default_level.to_uppercase().as_str() {
            "TRACE" => LevelFilter::Trace,
            "DEBUG" => LevelFilter::Debug,
            "INFO" => LevelFilter::Info,
            "WARN" | "WARNING" => LevelFilter::Warn,
            "ERROR" => LevelFilter::Error,
            "OFF" => LevelFilter::Off,
            _ => LevelFilter::Info,
        }
    }

    /// 进程日志文件路径，例如 logs/run.log
    pub fn log_file_path(&self, process: &str) -> String {
        format!("{}/{}.log", self.root_dir, process)
    }
}

/// 初始化全局日志器
///
/// `process` 区分编辑进程与评估进程的日志文件，二者可能同时运行。
pub fn init_logger(config: &LogConfig, process: &str) -> Result<()> {
    if !Path::new(&config.root_dir).exists() {
        fs::create_dir_all(&config.root_dir)?;
    }

    let log_file = config.log_file_path(process);
    let roll_pattern = format!("{}/{}.{{}}.log", config.root_dir, process);

    let roller = FixedWindowRoller::builder()
        .build(&roll_pattern, config.retained_files.max(1))
        .map_err(|e| anyhow!("创建日志轮转器失败: {}", e))?;
    let trigger = SizeTrigger::new(config.max_file_size_mb.max(1) * 1024 * 1024);
    let policy = CompoundPolicy::new(Box::new(trigger), Box::new(roller));

    let file_appender = RollingFileAppender::builder()
        .encoder(Box::new(PatternEncoder::new(LOG_PATTERN)))
        .build(&log_file, Box::new(policy))
        .map_err(|e| anyhow!("打开日志文件 {} 失败: {}", log_file, e))?;

    let mut builder =
        Config::builder().appender(Appender::builder().build("file", Box::new(file_appender)));
    let mut root = Root::builder().appender("file");

    if config.console_output {
        let console = ConsoleAppender::builder()
            .encoder(Box::new(PatternEncoder::new(LOG_PATTERN)))
            .build();
        builder = builder.appender(Appender::builder().build("console", Box::new(console)));
        root = root.appender("console");
    }

    let log_config = builder
        .build(root.build(config.level_filter()))
        .map_err(|e| anyhow!("日志配置无效: {}", e))?;

    log4rs::init_config(log_config).map_err(|e| anyhow!("日志系统初始化失败: {}", e))?;

    log::debug!("日志输出到 {}", log_file);
    Ok(())
}

// 日志文件命名规范：
// - 当前日志: {root_dir}/{进程}.log
// - 轮转日志: {root_dir}/{进程}.{序号}.log

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_filter_parsing() {
        let mut config = LogConfig::default();
        assert_eq!(config.level_filter(), LevelFilter::Info);

        config.default_level = "debug".to_string();
        assert_eq!(config.level_filter(), LevelFilter::Debug);

        config.default_level = "warning".to_string();
        assert_eq!(config.level_filter(), LevelFilter::Warn);

        config.default_level = "nonsense".to_string();
        assert_eq!(config.level_filter(), LevelFilter::Info);
    }

    #[test]
    fn test_log_file_path() {
        let config = LogConfig::default();
        assert_eq!(config.log_file_path("run"), "logs/run.log");
    }
}

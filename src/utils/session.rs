//! 交易时段推导
//!
//! 时段只由触发器给出的逻辑日期决定；没有指定日期时才取配置时区下的“今天”。

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Utc, Weekday};

use crate::core::config::SessionConfig;
use crate::core::error::MonitorError;
use crate::core::types::{Result, SessionId};

/// 指定时区下 `now` 所在的日期
pub fn logical_date(now: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    now.with_timezone(&offset).date_naive()
}

/// 周一到周五视为交易日（不处理法定节假日）
pub fn is_trading_day(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

pub fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|e| MonitorError::ConfigError(format!("非法的日期 '{}': {}", raw, e)))
}

/// 一次触发对应的时段
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSession {
    pub date: NaiveDate,
    pub session: SessionId,
    /// 配置要求跳过且当天不是交易日
    pub skip: bool,
}

/// 由命令行参数与配置推导时段；命令行的标签优先于配置
pub fn resolve(
    config: &SessionConfig,
    date: Option<NaiveDate>,
    label: Option<&str>,
    now: DateTime<Utc>,
) -> Result<ResolvedSession> {
    let date = match date {
        Some(date) => date,
        None => logical_date(now, config.offset()?),
    };

    let session = match label.or(config.label.as_deref()) {
        Some(label) => SessionId::with_label(date, label),
        None => SessionId::from_date(date),
    };

    Ok(ResolvedSession {
        date,
        session,
        skip: config.skip_weekends && !is_trading_day(date),
    })
}

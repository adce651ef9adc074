use chrono::{DateTime, NaiveDate, Utc};
/// 统一的类型定义模块
/// 策略文档、行情序列与评估结论的数据结构
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::core::error::MonitorError;

// ============= 基础类型定义 =============

/// 结果类型别名
pub type Result<T> = std::result::Result<T, MonitorError>;

/// 规则参数: 参数名 -> 数值
pub type RuleParams = BTreeMap<String, f64>;

/// 远端文档版本号（不透明，只比较和透传）
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionToken(String);

impl VersionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 交易时段标识，由触发器的逻辑日期推导
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn from_date(date: NaiveDate) -> Self {
        Self(date.format("%Y-%m-%d").to_string())
    }

    /// 同一交易日内的多个时段，例如 `2026-10-16#close`
    pub fn with_label(date: NaiveDate, label: &str) -> Self {
        let label = label.trim();
        if label.is_empty() {
            return Self::from_date(date);
        }
        Self(format!("{}#{}", date.format("%Y-%m-%d"), label))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let date_part = raw.split('#').next().unwrap_or_default();
        NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
            .map_err(|e| MonitorError::ConfigError(format!("非法的时段标识 '{}': {}", raw, e)))?;
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 时段所在的交易日
    pub fn date(&self) -> Option<NaiveDate> {
        let date_part = self.0.split('#').next()?;
        NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============= 策略定义 =============

/// 规则类型（封闭集合，未知类型保留原文以便原样写回）
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RuleKind {
    /// 回顾期收益率阈值
    ReturnThreshold,
    /// 区间最大回撤阈值
    Drawdown,
    /// 均线交叉
    MovingAverageCross,
    Unrecognized(String),
}

impl RuleKind {
    pub fn as_str(&self) -> &str {
        match self {
            RuleKind::ReturnThreshold => "return_threshold",
            RuleKind::Drawdown => "drawdown",
            RuleKind::MovingAverageCross => "ma_cross",
            RuleKind::Unrecognized(raw) => raw.as_str(),
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, RuleKind::Unrecognized(_))
    }

    pub fn display_name(&self) -> &str {
        match self {
            RuleKind::ReturnThreshold => "回顾期收益率阈值",
            RuleKind::Drawdown => "最大回撤阈值",
            RuleKind::MovingAverageCross => "均线交叉",
            RuleKind::Unrecognized(raw) => raw.as_str(),
        }
    }
}

impl From<&str> for RuleKind {
    fn from(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "return_threshold" | "threshold" => RuleKind::ReturnThreshold,
            "drawdown" => RuleKind::Drawdown,
            "ma_cross" | "moving_average_cross" => RuleKind::MovingAverageCross,
            _ => RuleKind::Unrecognized(raw.to_string()),
        }
    }
}

impl From<String> for RuleKind {
    fn from(raw: String) -> Self {
        RuleKind::from(raw.as_str())
    }
}

impl From<RuleKind> for String {
    fn from(kind: RuleKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 单只基金的监控策略
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyRecord {
    pub fund_code: String,
    pub name: String,
    pub rule_kind: RuleKind,
    pub params: RuleParams,
    pub enabled: bool,
    /// 只由评估流程写入
    pub last_triggered: Option<DateTime<Utc>>,
}

impl StrategyRecord {
    pub fn new(fund_code: impl Into<String>, name: impl Into<String>, rule_kind: RuleKind) -> Self {
        Self {
            fund_code: fund_code.into(),
            name: name.into(),
            rule_kind,
            params: RuleParams::new(),
            enabled: true,
            last_triggered: None,
        }
    }

    pub fn with_param(mut self, key: &str, value: f64) -> Self {
        self.params.insert(key.to_string(), value);
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn param(&self, key: &str) -> Option<f64> {
        self.params.get(key).copied()
    }

    /// 触发时间只前进不后退，返回是否发生变化
    pub fn mark_triggered(&mut self, at: DateTime<Utc>) -> bool {
        match self.last_triggered {
            Some(previous) if previous >= at => false,
            _ => {
                self.last_triggered = Some(at);
                true
            }
        }
    }

    pub fn display_label(&self) -> String {
        if self.name.is_empty() || self.name == self.fund_code {
            self.fund_code.clone()
        } else {
            format!("{} ({})", self.name, self.fund_code)
        }
    }
}

/// 文档顶层保留字段：最近一次已通知的交易时段
pub const SESSION_MARKER_KEY: &str = "lastNotifiedSession";

/// 校验基金代码格式
pub fn validate_fund_code(code: &str) -> Result<()> {
    if code == SESSION_MARKER_KEY {
        return Err(MonitorError::InvalidRule {
            fund_code: code.to_string(),
            reason: "基金代码与文档保留字段冲突".to_string(),
        });
    }
    if code.is_empty() || !code.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(MonitorError::InvalidRule {
            fund_code: code.to_string(),
            reason: "基金代码只能包含字母和数字".to_string(),
        });
    }
    Ok(())
}

/// 策略集合（按文档顺序，基金代码唯一）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StrategySet {
    records: Vec<StrategyRecord>,
    last_notified_session: Option<SessionId>,
    version: Option<VersionToken>,
}

impl StrategySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_version(mut self, version: VersionToken) -> Self {
        self.version = Some(version);
        self
    }

    pub fn version(&self) -> Option<&VersionToken> {
        self.version.as_ref()
    }

    pub fn records(&self) -> &[StrategyRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, fund_code: &str) -> Option<&StrategyRecord> {
        self.records.iter().find(|r| r.fund_code == fund_code)
    }

    pub fn get_mut(&mut self, fund_code: &str) -> Option<&mut StrategyRecord> {
        self.records.iter_mut().find(|r| r.fund_code == fund_code)
    }

    pub fn contains(&self, fund_code: &str) -> bool {
        self.get(fund_code).is_some()
    }

    /// 追加策略，重复的基金代码视为领域错误
    pub fn insert(&mut self, record: StrategyRecord) -> Result<()> {
        if self.contains(&record.fund_code) {
            return Err(MonitorError::DuplicateFund(record.fund_code));
        }
        self.records.push(record);
        Ok(())
    }

    pub fn remove(&mut self, fund_code: &str) -> Result<StrategyRecord> {
        let index = self
            .records
            .iter()
            .position(|r| r.fund_code == fund_code)
            .ok_or_else(|| MonitorError::UnknownFund(fund_code.to_string()))?;
        Ok(self.records.remove(index))
    }

    pub fn enabled(&self) -> impl Iterator<Item = &StrategyRecord> {
        self.records.iter().filter(|r| r.enabled)
    }

    pub fn last_notified_session(&self) -> Option<&SessionId> {
        self.last_notified_session.as_ref()
    }

    pub fn set_last_notified_session(&mut self, session: Option<SessionId>) {
        self.last_notified_session = session;
    }

    /// 记录已通知的时段；比已有标记更早的交易日不会覆盖标记
    pub fn mark_notified(&mut self, session: &SessionId) -> bool {
        if let Some(current) = &self.last_notified_session {
            if current == session {
                return false;
            }
            if let (Some(current_date), Some(date)) = (current.date(), session.date()) {
                if date < current_date {
                    return false;
                }
            }
        }
        self.last_notified_session = Some(session.clone());
        true
    }

    pub fn was_notified(&self, session: &SessionId) -> bool {
        self.last_notified_session.as_ref() == Some(session)
    }
}

// ============= 行情数据 =============

/// 单位净值数据点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavPoint {
    pub timestamp: DateTime<Utc>,
    pub nav: f64,
}

impl NavPoint {
    pub fn new(timestamp: DateTime<Utc>, nav: f64) -> Self {
        Self { timestamp, nav }
    }
}

/// 按时间升序排列的净值序列
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavSeries {
    pub fund_code: String,
    pub fund_name: Option<String>,
    pub points: Vec<NavPoint>,
}

impl NavSeries {
    pub fn new(fund_code: impl Into<String>, points: Vec<NavPoint>) -> Self {
        Self {
            fund_code: fund_code.into(),
            fund_name: None,
            points,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.fund_name = Some(name.into());
        self
    }

    /// 只保留最近 `window` 个数据点
    pub fn tail(&self, window: usize) -> &[NavPoint] {
        let start = self.points.len().saturating_sub(window);
        &self.points[start..]
    }
}

// ============= 评估结论 =============

/// 操作建议
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    Buy,
    Sell,
    Hold,
}

impl Signal {
    pub fn label(&self) -> &'static str {
        match self {
            Signal::Buy => "建议买入",
            Signal::Sell => "建议卖出",
            Signal::Hold => "观望",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictStatus {
    Evaluated,
    DataUnavailable,
}

/// 评估时使用的数据快照，用于事后审计
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataSnapshot {
    pub points: Vec<NavPoint>,
    pub metrics: BTreeMap<String, f64>,
}

/// 单条策略的评估结论
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub fund_code: String,
    pub fund_name: String,
    pub rule_kind: RuleKind,
    pub fired: bool,
    pub signal: Signal,
    pub status: VerdictStatus,
    pub rationale: String,
    pub snapshot: DataSnapshot,
}

impl Verdict {
    /// 行情获取失败时的降级结论
    pub fn unavailable(record: &StrategyRecord, reason: impl Into<String>) -> Self {
        Self {
            fund_code: record.fund_code.clone(),
            fund_name: record.name.clone(),
            rule_kind: record.rule_kind.clone(),
            fired: false,
            signal: Signal::Hold,
            status: VerdictStatus::DataUnavailable,
            rationale: reason.into(),
            snapshot: DataSnapshot::default(),
        }
    }

    pub fn is_unavailable(&self) -> bool {
        self.status == VerdictStatus::DataUnavailable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_kind_round_trip_keeps_unknown_text() {
        assert_eq!(RuleKind::from("drawdown"), RuleKind::Drawdown);
        assert_eq!(RuleKind::from("MA_CROSS"), RuleKind::MovingAverageCross);

        let unknown = RuleKind::from("bollinger");
        assert!(!unknown.is_known());
        assert_eq!(String::from(unknown), "bollinger");
    }

    #[test]
    fn test_strategy_set_rejects_duplicate() {
        let mut set = StrategySet::new();
        set.insert(StrategyRecord::new("161725", "白酒", RuleKind::Drawdown))
            .unwrap();
        let err = set
            .insert(StrategyRecord::new("161725", "另一个", RuleKind::Drawdown))
            .unwrap_err();
        assert_eq!(err, MonitorError::DuplicateFund("161725".to_string()));
        assert_eq!(set.len(), 1);
        assert_eq!(set.get("161725").unwrap().name, "白酒");
    }

    #[test]
    fn test_last_triggered_only_moves_forward() {
        let mut record = StrategyRecord::new("000001", "华夏成长", RuleKind::Drawdown);
        let later = DateTime::parse_from_rfc3339("2026-10-16T06:45:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let earlier = DateTime::parse_from_rfc3339("2026-10-15T06:45:00Z")
            .unwrap()
            .with_timezone(&Utc);

        assert!(record.mark_triggered(later));
        assert!(!record.mark_triggered(earlier));
        assert!(!record.mark_triggered(later));
        assert_eq!(record.last_triggered, Some(later));
    }

    #[test]
    fn test_session_id_formats() {
        let date = NaiveDate::from_ymd_opt(2026, 10, 16).unwrap();
        assert_eq!(SessionId::from_date(date).as_str(), "2026-10-16");
        assert_eq!(SessionId::with_label(date, "close").as_str(), "2026-10-16#close");
        assert_eq!(SessionId::with_label(date, " ").as_str(), "2026-10-16");
        assert!(SessionId::parse("2026-10-16#am").is_ok());
        assert!(SessionId::parse("yesterday").is_err());
    }

    #[test]
    fn test_notified_marker_only_moves_forward() {
        let mut set = StrategySet::new();
        let friday = SessionId::parse("2026-10-16").unwrap();
        let thursday = SessionId::parse("2026-10-15").unwrap();
        let friday_close = SessionId::parse("2026-10-16#close").unwrap();

        assert!(set.mark_notified(&friday));
        assert!(!set.mark_notified(&friday));
        assert!(!set.mark_notified(&thursday));
        assert!(set.was_notified(&friday));

        // 同一交易日的其他时段照常推进
        assert!(set.mark_notified(&friday_close));
        assert_eq!(set.last_notified_session(), Some(&friday_close));
        assert_eq!(
            friday_close.date(),
            NaiveDate::from_ymd_opt(2026, 10, 16)
        );
    }

    #[test]
    fn test_fund_code_validation() {
        assert!(validate_fund_code("161725").is_ok());
        assert!(validate_fund_code("FUND001").is_ok());
        assert!(validate_fund_code("").is_err());
        assert!(validate_fund_code("fund-001").is_err());
        assert!(validate_fund_code(SESSION_MARKER_KEY).is_err());
    }
}

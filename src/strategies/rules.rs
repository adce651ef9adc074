//! 规则参数模式与预设
//!
//! 每种规则类型有固定的必填参数集合，`validate` 在写入文档前和评估前各检查一次。

use crate::core::error::MonitorError;
use crate::core::types::{validate_fund_code, Result, RuleKind, StrategyRecord};

// 参数名
pub const LOOKBACK_DAYS: &str = "lookback_days";
pub const BUY_THRESHOLD: &str = "buy_threshold";
pub const SELL_THRESHOLD: &str = "sell_threshold";
pub const WINDOW_DAYS: &str = "window_days";
pub const MAX_DRAWDOWN_PCT: &str = "max_drawdown_pct";
pub const SHORT_WINDOW: &str = "short_window";
pub const LONG_WINDOW: &str = "long_window";

/// 窗口类参数的上限，与行情源单页最多返回的净值点数一致
pub const MAX_WINDOW_POINTS: usize = 500;

/// 规则类型对应的必填参数
pub fn required_params(kind: &RuleKind) -> &'static [&'static str] {
    match kind {
        RuleKind::ReturnThreshold => &[LOOKBACK_DAYS, BUY_THRESHOLD, SELL_THRESHOLD],
        RuleKind::Drawdown => &[WINDOW_DAYS, MAX_DRAWDOWN_PCT],
        RuleKind::MovingAverageCross => &[SHORT_WINDOW, LONG_WINDOW],
        RuleKind::Unrecognized(_) => &[],
    }
}

fn invalid(record: &StrategyRecord, reason: impl Into<String>) -> MonitorError {
    MonitorError::InvalidRule {
        fund_code: record.fund_code.clone(),
        reason: reason.into(),
    }
}

fn require(record: &StrategyRecord, key: &str) -> Result<f64> {
    let value = record
        .param(key)
        .ok_or_else(|| invalid(record, format!("缺少参数 {}", key)))?;
    if !value.is_finite() {
        return Err(invalid(record, format!("参数 {} 不是有限数值: {}", key, value)));
    }
    Ok(value)
}

/// 读取整数参数（窗口长度之类），小数或超出 `[min, MAX_WINDOW_POINTS - 1]` 都视为非法
fn require_count(record: &StrategyRecord, key: &str, min: usize) -> Result<usize> {
    let value = require(record, key)?;
    let max = MAX_WINDOW_POINTS - 1;
    if value.fract() != 0.0 || value < min as f64 || value > max as f64 {
        return Err(invalid(
            record,
            format!(
                "参数 {} 必须是{}到{}之间的整数，当前为 {}",
                key, min, max, value
            ),
        ));
    }
    Ok(value as usize)
}

/// 回顾期收益率阈值参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReturnThresholdParams {
    pub lookback_days: usize,
    pub buy_threshold: f64,
    pub sell_threshold: f64,
}

/// 最大回撤参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawdownParams {
    pub window_days: usize,
    pub max_drawdown_pct: f64,
}

/// 均线交叉参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaCrossParams {
    pub short_window: usize,
    pub long_window: usize,
}

/// 校验通过后的规则
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rule {
    ReturnThreshold(ReturnThresholdParams),
    Drawdown(DrawdownParams),
    MaCross(MaCrossParams),
}

impl Rule {
    /// 评估所需的最少净值点数
    pub fn required_window(&self) -> usize {
        match self {
            Rule::ReturnThreshold(p) => p.lookback_days.saturating_add(1),
            Rule::Drawdown(p) => p.window_days,
            Rule::MaCross(p) => p.long_window.saturating_add(1),
        }
    }
}

/// 把记录解析为具体规则；未知类型与参数错误都返回 `InvalidRule`
pub fn parse(record: &StrategyRecord) -> Result<Rule> {
    let missing: Vec<&str> = required_params(&record.rule_kind)
        .iter()
        .copied()
        .filter(|key| record.param(key).is_none())
        .collect();
    if !missing.is_empty() {
        return Err(invalid(record, format!("缺少参数 {}", missing.join(", "))));
    }

    match &record.rule_kind {
        RuleKind::ReturnThreshold => {
            let lookback_days = require_count(record, LOOKBACK_DAYS, 1)?;
            let buy_threshold = require(record, BUY_THRESHOLD)?;
            let sell_threshold = require(record, SELL_THRESHOLD)?;
            if buy_threshold >= sell_threshold {
                return Err(invalid(
                    record,
                    format!(
                        "买入阈值({})必须小于卖出阈值({})",
                        buy_threshold, sell_threshold
                    ),
                ));
            }
            Ok(Rule::ReturnThreshold(ReturnThresholdParams {
                lookback_days,
                buy_threshold,
                sell_threshold,
            }))
        }
        RuleKind::Drawdown => {
            let window_days = require_count(record, WINDOW_DAYS, 2)?;
            let max_drawdown_pct = require(record, MAX_DRAWDOWN_PCT)?;
            if max_drawdown_pct <= 0.0 {
                return Err(invalid(record, "最大回撤阈值必须大于0"));
            }
            Ok(Rule::Drawdown(DrawdownParams {
                window_days,
                max_drawdown_pct,
            }))
        }
        RuleKind::MovingAverageCross => {
            let short_window = require_count(record, SHORT_WINDOW, 1)?;
            let long_window = require_count(record, LONG_WINDOW, 2)?;
            if short_window >= long_window {
                return Err(invalid(
                    record,
                    format!("短均线({})必须小于长均线({})", short_window, long_window),
                ));
            }
            Ok(Rule::MaCross(MaCrossParams {
                short_window,
                long_window,
            }))
        }
        RuleKind::Unrecognized(raw) => Err(invalid(record, format!("未知的规则类型 '{}'", raw))),
    }
}

/// 写入前的完整校验：基金代码格式 + 规则类型 + 参数
pub fn validate(record: &StrategyRecord) -> Result<()> {
    validate_fund_code(&record.fund_code)?;
    parse(record).map(|_| ())
}

/// 评估一条记录需要向行情源请求的点数
pub fn required_window(record: &StrategyRecord) -> Result<usize> {
    parse(record).map(|rule| rule.required_window())
}

/// 收益率阈值预设
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RulePreset {
    /// 保守型
    Conservative,
    /// 积极型
    Active,
    /// 激进型
    Aggressive,
}

impl RulePreset {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "conservative" => Some(RulePreset::Conservative),
            "active" => Some(RulePreset::Active),
            "aggressive" => Some(RulePreset::Aggressive),
            _ => None,
        }
    }

    /// (买入阈值, 卖出阈值, 回顾天数)
    pub fn values(&self) -> (f64, f64, f64) {
        match self {
            RulePreset::Conservative => (-8.0, 15.0, 30.0),
            RulePreset::Active => (-5.0, 10.0, 20.0),
            RulePreset::Aggressive => (-3.0, 8.0, 15.0),
        }
    }

    /// 把预设写入记录；记录已有的同名参数会被覆盖
    pub fn apply(&self, record: StrategyRecord) -> StrategyRecord {
        let (buy, sell, lookback) = self.values();
        let mut record = record
            .with_param(BUY_THRESHOLD, buy)
            .with_param(SELL_THRESHOLD, sell)
            .with_param(LOOKBACK_DAYS, lookback);
        record.rule_kind = RuleKind::ReturnThreshold;
        record
    }
}

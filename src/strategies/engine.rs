//! 决策引擎：单条策略 + 净值序列 -> 结论
//!
//! 纯计算，不做任何 I/O；相同输入总是得到相同结论。

use std::collections::BTreeMap;

use crate::core::error::MonitorError;
use crate::core::types::{
    DataSnapshot, NavSeries, Result, Signal, StrategyRecord, Verdict, VerdictStatus,
};
use crate::strategies::rules::{self, DrawdownParams, MaCrossParams, ReturnThresholdParams, Rule};
use crate::utils::indicators::{self, Crossover};

pub const METRIC_LATEST_NAV: &str = "latest_nav";
pub const METRIC_RETURN_PCT: &str = "return_pct";
pub const METRIC_DRAWDOWN_PCT: &str = "drawdown_pct";
pub const METRIC_SHORT_MA: &str = "short_ma";
pub const METRIC_LONG_MA: &str = "long_ma";

/// 单条规则的计算结果
struct Outcome {
    fired: bool,
    signal: Signal,
    rationale: String,
    metrics: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DecisionEngine;

impl DecisionEngine {
    pub fn new() -> Self {
        Self
    }

    /// 评估需要的净值点数
    pub fn required_window(&self, record: &StrategyRecord) -> Result<usize> {
        rules::required_window(record)
    }

    /// 评估一条策略
    ///
    /// 规则类型未知或参数非法返回 `InvalidRule`；历史数据不足返回 `DataUnavailable`。
    pub fn evaluate(&self, record: &StrategyRecord, series: &NavSeries) -> Result<Verdict> {
        let rule = rules::parse(record)?;
        let window = rule.required_window();

        if series.points.len() < window {
            return Err(MonitorError::DataUnavailable {
                fund_code: record.fund_code.clone(),
                reason: format!(
                    "历史数据不足: 需要{}个净值点，只有{}个",
                    window,
                    series.points.len()
                ),
            });
        }

        let consumed = series.tail(window);
        let navs: Vec<f64> = consumed.iter().map(|p| p.nav).collect();

        let outcome = match rule {
            Rule::ReturnThreshold(params) => evaluate_return(record, &navs, params)?,
            Rule::Drawdown(params) => evaluate_drawdown(record, &navs, params)?,
            Rule::MaCross(params) => evaluate_ma_cross(record, &navs, params)?,
        };

        let mut metrics = outcome.metrics;
        if let Some(latest) = navs.last() {
            metrics.insert(METRIC_LATEST_NAV.to_string(), *latest);
        }

        Ok(Verdict {
            fund_code: record.fund_code.clone(),
            fund_name: series
                .fund_name
                .clone()
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| record.name.clone()),
            rule_kind: record.rule_kind.clone(),
            fired: outcome.fired,
            signal: outcome.signal,
            status: VerdictStatus::Evaluated,
            rationale: outcome.rationale,
            snapshot: DataSnapshot {
                points: consumed.to_vec(),
                metrics,
            },
        })
    }
}

fn insufficient(record: &StrategyRecord, what: &str) -> MonitorError {
    MonitorError::DataUnavailable {
        fund_code: record.fund_code.clone(),
        reason: format!("无法计算{}", what),
    }
}

fn evaluate_return(
    record: &StrategyRecord,
    navs: &[f64],
    params: ReturnThresholdParams,
) -> Result<Outcome> {
    let ret = indicators::period_return_pct(navs, params.lookback_days)
        .ok_or_else(|| insufficient(record, "回顾期收益率"))?;

    let (fired, signal, verdict) = if ret <= params.buy_threshold {
        (true, Signal::Buy, format!("低于买入阈值 {:.2}%", params.buy_threshold))
    } else if ret >= params.sell_threshold {
        (true, Signal::Sell, format!("高于卖出阈值 {:.2}%", params.sell_threshold))
    } else {
        (
            false,
            Signal::Hold,
            format!(
                "处于区间 ({:.2}%, {:.2}%) 内",
                params.buy_threshold, params.sell_threshold
            ),
        )
    };

    Ok(Outcome {
        fired,
        signal,
        rationale: format!(
            "近{}个交易日收益率 {:.2}%，{}",
            params.lookback_days, ret, verdict
        ),
        metrics: BTreeMap::from([(METRIC_RETURN_PCT.to_string(), ret)]),
    })
}

fn evaluate_drawdown(
    record: &StrategyRecord,
    navs: &[f64],
    params: DrawdownParams,
) -> Result<Outcome> {
    let drawdown =
        indicators::max_drawdown_pct(navs).ok_or_else(|| insufficient(record, "最大回撤"))?;
    let fired = drawdown >= params.max_drawdown_pct;

    Ok(Outcome {
        fired,
        signal: if fired { Signal::Buy } else { Signal::Hold },
        rationale: format!(
            "近{}个交易日最大回撤 {:.2}%，{}阈值 {:.2}%",
            params.window_days,
            drawdown,
            if fired { "达到" } else { "未达到" },
            params.max_drawdown_pct
        ),
        metrics: BTreeMap::from([(METRIC_DRAWDOWN_PCT.to_string(), drawdown)]),
    })
}

fn evaluate_ma_cross(
    record: &StrategyRecord,
    navs: &[f64],
    params: MaCrossParams,
) -> Result<Outcome> {
    let (cross, short_ma, long_ma) =
        indicators::ma_crossover(navs, params.short_window, params.long_window)
            .ok_or_else(|| insufficient(record, "均线"))?;

    let (fired, signal, description) = match cross {
        Crossover::Golden => (true, Signal::Buy, "金叉"),
        Crossover::Death => (true, Signal::Sell, "死叉"),
        Crossover::None => (false, Signal::Hold, "未交叉"),
    };

    Ok(Outcome {
        fired,
        signal,
        rationale: format!(
            "MA{} {:.4} / MA{} {:.4}，{}",
            params.short_window, short_ma, params.long_window, long_ma, description
        ),
        metrics: BTreeMap::from([
            (METRIC_SHORT_MA.to_string(), short_ma),
            (METRIC_LONG_MA.to_string(), long_ma),
        ]),
    })
}

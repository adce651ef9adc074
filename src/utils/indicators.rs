/// 净值指标计算（无状态函数）
/// 供规则引擎使用，输入均为按时间升序排列的净值

/// 计算简单移动平均线 (SMA)，取最近 `period` 个值
pub fn sma(values: &[f64], period: usize) -> Option<f64> {
    if values.len() < period || period == 0 {
        return None;
    }

    let sum: f64 = values[values.len() - period..].iter().sum();
    Some(sum / period as f64)
}

/// 以 `end`（不含）为终点的 SMA，用于比较前后两个时点
pub fn sma_ending_at(values: &[f64], period: usize, end: usize) -> Option<f64> {
    if end > values.len() {
        return None;
    }
    sma(&values[..end], period)
}

/// 回顾期收益率（百分比）
///
/// 基准是最新值之前第 `lookback` 个数据点。
pub fn period_return_pct(values: &[f64], lookback: usize) -> Option<f64> {
    if lookback == 0 || values.len() <= lookback {
        return None;
    }

    let latest = *values.last()?;
    let reference = values[values.len() - 1 - lookback];
    if reference <= 0.0 {
        return None;
    }

    Some((latest / reference - 1.0) * 100.0)
}

/// 最大回撤（百分比，正数），峰值到谷底
pub fn max_drawdown_pct(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }

    let mut peak = f64::MIN;
    let mut max_drawdown = 0.0_f64;

    for &value in values {
        if value > peak {
            peak = value;
        }
        if peak > 0.0 {
            let drawdown = (peak - value) / peak * 100.0;
            max_drawdown = max_drawdown.max(drawdown);
        }
    }

    Some(max_drawdown)
}

/// 均线交叉方向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Crossover {
    /// 短均线上穿长均线
    Golden,
    /// 短均线下穿长均线
    Death,
    None,
}

/// 判断最后一个数据点上是否发生均线交叉
pub fn ma_crossover(values: &[f64], short: usize, long: usize) -> Option<(Crossover, f64, f64)> {
    if short == 0 || short >= long || values.len() < long + 1 {
        return None;
    }

    let len = values.len();
    let short_now = sma_ending_at(values, short, len)?;
    let long_now = sma_ending_at(values, long, len)?;
    let short_prev = sma_ending_at(values, short, len - 1)?;
    let long_prev = sma_ending_at(values, long, len - 1)?;

    let diff_prev = short_prev - long_prev;
    let diff_now = short_now - long_now;

    let cross = if diff_prev <= 0.0 && diff_now > 0.0 {
        Crossover::Golden
    } else if diff_prev >= 0.0 && diff_now < 0.0 {
        Crossover::Death
    } else {
        Crossover::None
    };

    Some((cross, short_now, long_now))
}

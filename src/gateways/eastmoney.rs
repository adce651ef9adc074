//! 天天基金/东方财富净值接口
//!
//! 历史净值来自 `lsjz` 接口（最新的在前），盘中估值来自 `fundgz` 的 JSONP 接口。
//! 估值时间晚于最近一次公布净值时，把估值作为最新一个点追加到序列末尾。

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use reqwest::{Client, ClientBuilder};
use serde::Deserialize;
use std::time::Duration;

use super::MarketDataGateway;
use crate::core::config::MarketDataConfig;
use crate::core::error::MonitorError;
use crate::core::types::{NavPoint, NavSeries, Result};

const REFERER: &str = "http://fundf10.eastmoney.com/";
const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";
/// 国内基金净值统一按北京时间
const CHINA_OFFSET_SECS: i32 = 8 * 3600;
/// 单次最多请求的历史条数
const MAX_PAGE_SIZE: usize = 500;

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    #[serde(rename = "Data")]
    data: Option<HistoryData>,
    #[serde(rename = "ErrMsg", default)]
    err_msg: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HistoryData {
    #[serde(rename = "LSJZList", default)]
    list: Vec<HistoryItem>,
}

#[derive(Debug, Deserialize)]
struct HistoryItem {
    /// 净值日期
    #[serde(rename = "FSRQ")]
    date: String,
    /// 单位净值
    #[serde(rename = "DWJZ")]
    nav: String,
}

/// 盘中估值
#[derive(Debug, Clone, Deserialize)]
pub struct Estimate {
    #[serde(rename = "fundcode")]
    pub fund_code: String,
    pub name: String,
    /// 估算净值
    pub gsz: String,
    /// 估值时间
    pub gztime: String,
}

fn china_time(naive: NaiveDateTime) -> Option<DateTime<Utc>> {
    FixedOffset::east_opt(CHINA_OFFSET_SECS)?
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

/// 公布净值的日期按当日15:00收盘计
fn close_time(date: NaiveDate) -> Option<DateTime<Utc>> {
    let close = NaiveTime::from_hms_opt(15, 0, 0)?;
    china_time(date.and_time(close))
}

/// 解析历史净值响应，返回按时间升序的点
pub fn parse_history(fund_code: &str, body: &str) -> Result<Vec<NavPoint>> {
    let response: HistoryResponse = serde_json::from_str(body).map_err(|e| {
        MonitorError::Unavailable(format!("解析基金 {} 历史净值失败: {}", fund_code, e))
    })?;

    let items = response.data.map(|d| d.list).unwrap_or_default();
    if items.is_empty() {
        return Err(MonitorError::NotFound(format!(
            "基金 {} 没有历史净值{}",
            fund_code,
            response
                .err_msg
                .filter(|m| !m.is_empty())
                .map(|m| format!(" ({})", m))
                .unwrap_or_default()
        )));
    }

    let mut points = Vec::with_capacity(items.len());
    for item in items {
        // 新成立或暂停估值的基金可能出现空净值
        let Ok(nav) = item.nav.trim().parse::<f64>() else {
            log::debug!("跳过基金 {} {} 的空净值", fund_code, item.date);
            continue;
        };
        let date = NaiveDate::parse_from_str(item.date.trim(), "%Y-%m-%d").map_err(|e| {
            MonitorError::Unavailable(format!("基金 {} 日期格式异常 '{}': {}", fund_code, item.date, e))
        })?;
        let timestamp = close_time(date).ok_or_else(|| {
            MonitorError::Unavailable(format!("基金 {} 日期无法换算: {}", fund_code, item.date))
        })?;
        points.push(NavPoint::new(timestamp, nav));
    }

    points.sort_by_key(|p| p.timestamp);
    points.dedup_by_key(|p| p.timestamp);
    Ok(points)
}

/// 解析 `jsonpgz({...});`；空包 `jsonpgz();` 表示没有估值
pub fn parse_jsonp(body: &str) -> Result<Option<Estimate>> {
    let trimmed = body.trim();
    let inner = trimmed
        .strip_prefix("jsonpgz(")
        .and_then(|rest| rest.strip_suffix(";").or(Some(rest)))
        .and_then(|rest| rest.strip_suffix(')'))
        .ok_or_else(|| MonitorError::Unavailable(format!("估值响应格式不匹配: {}", trimmed)))?
        .trim();

    if inner.is_empty() {
        return Ok(None);
    }

    let estimate: Estimate = serde_json::from_str(inner)
        .map_err(|e| MonitorError::Unavailable(format!("解析估值JSON失败: {}", e)))?;
    Ok(Some(estimate))
}

impl Estimate {
    /// 估值点；时间或数值无法解析时返回 None
    pub fn to_point(&self) -> Option<NavPoint> {
        let nav = self.gsz.trim().parse::<f64>().ok()?;
        let raw = self.gztime.trim();
        let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M")
            .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S"))
            .ok()?;
        Some(NavPoint::new(china_time(naive)?, nav))
    }
}

/// 估值晚于最后一个公布净值时追加
pub fn merge_estimate(points: &mut Vec<NavPoint>, estimate: &Estimate) -> bool {
    let Some(point) = estimate.to_point() else {
        return false;
    };
    match points.last() {
        Some(last) if last.timestamp >= point.timestamp => false,
        _ => {
            points.push(point);
            true
        }
    }
}

pub struct EastmoneyGateway {
    client: Client,
    config: MarketDataConfig,
}

impl EastmoneyGateway {
    pub fn new(config: MarketDataConfig) -> Result<Self> {
        let client = ClientBuilder::new()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| MonitorError::ConfigError(format!("创建HTTP客户端失败: {}", e)))?;
        Ok(Self { client, config })
    }

    async fn fetch_history(&self, fund_code: &str, window: usize) -> Result<Vec<NavPoint>> {
        let page_size = window.clamp(1, MAX_PAGE_SIZE).to_string();
        let response = self
            .client
            .get(&self.config.history_url)
            .header("Referer", REFERER)
            .query(&[
                ("fundCode", fund_code),
                ("pageIndex", "1"),
                ("pageSize", page_size.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(MonitorError::Unavailable(format!(
                "历史净值接口返回 {}",
                response.status()
            )));
        }

        let body = response.text().await?;
        parse_history(fund_code, &body)
    }

    async fn fetch_estimate(&self, fund_code: &str) -> Result<Option<Estimate>> {
        let url = format!(
            "{}/{}.js",
            self.config.estimate_url.trim_end_matches('/'),
            fund_code
        );
        let rt = Utc::now().timestamp_millis().to_string();
        let response = self
            .client
            .get(&url)
            .header("Referer", format!("http://fund.eastmoney.com/{}.html", fund_code))
            .query(&[("rt", rt.as_str())])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(MonitorError::Unavailable(format!(
                "估值接口返回 {}",
                response.status()
            )));
        }

        let body = response.text().await?;
        parse_jsonp(&body)
    }
}

#[async_trait]
impl MarketDataGateway for EastmoneyGateway {
    async fn get_series(&self, fund_code: &str, window: usize) -> Result<NavSeries> {
        let mut points = self.fetch_history(fund_code, window).await?;
        let mut series_name = None;

        if self.config.include_estimate {
            match self.fetch_estimate(fund_code).await {
                Ok(Some(estimate)) => {
                    if merge_estimate(&mut points, &estimate) {
                        log::debug!("基金 {} 追加盘中估值 {} @ {}", fund_code, estimate.gsz, estimate.gztime);
                    }
                    series_name = Some(estimate.name);
                }
                Ok(None) => log::debug!("基金 {} 暂无盘中估值", fund_code),
                // 估值只是补充，失败时退回历史净值
                Err(e) => log::warn!("⚠️ 获取基金 {} 估值失败: {}", fund_code, e),
            }
        }

        let start = points.len().saturating_sub(window);
        let points = points.split_off(start);
        let series = NavSeries::new(fund_code, points);
        Ok(match series_name {
            Some(name) => series.with_name(name),
            None => series,
        })
    }
}

//! 决策报告与通知渠道
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use std::sync::Mutex;

use crate::core::types::{Result, SessionId, Signal, Verdict};

/// 单个交易时段的决策报告
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionReport {
    pub session: SessionId,
    pub generated_at: DateTime<Utc>,
    /// 触发的结论
    pub fired: Vec<Verdict>,
    /// 行情不可用的结论，作为附加部分
    pub degraded: Vec<Verdict>,
}

impl DecisionReport {
    pub fn new(session: SessionId, generated_at: DateTime<Utc>, verdicts: &[Verdict]) -> Self {
        Self {
            session,
            generated_at,
            fired: verdicts.iter().filter(|v| v.fired).cloned().collect(),
            degraded: verdicts
                .iter()
                .filter(|v| v.is_unavailable())
                .cloned()
                .collect(),
        }
    }

    pub fn title(&self) -> String {
        format!("基金交易决策报告 - {}", self.session)
    }

    pub fn fund_codes(&self) -> Vec<&str> {
        self.fired.iter().map(|v| v.fund_code.as_str()).collect()
    }

    /// 企业微信 markdown 格式
    pub fn render_markdown(&self, offset: FixedOffset) -> String {
        let mut lines = vec![format!("## {}", self.title())];

        for verdict in &self.fired {
            let color = match verdict.signal {
                Signal::Buy => "info",
                Signal::Sell => "warning",
                Signal::Hold => "comment",
            };
            lines.push(format!(
                "> **{} ({})** <font color=\"{}\">{}</font>",
                verdict.fund_name, verdict.fund_code, color, verdict.signal.label()
            ));
            lines.push(format!("> 规则: {}", verdict.rule_kind.display_name()));
            lines.push(format!("> {}", verdict.rationale));
            if let Some(point) = verdict.snapshot.points.last() {
                lines.push(format!(
                    "> 最新净值: {:.4} ({})",
                    point.nav,
                    point.timestamp.with_timezone(&offset).format("%Y-%m-%d %H:%M")
                ));
            }
            lines.push(String::new());
        }

        if !self.degraded.is_empty() {
            lines.push("**数据获取失败**".to_string());
            for verdict in &self.degraded {
                lines.push(format!(
                    "> <font color=\"comment\">{} ({}): {}</font>",
                    verdict.fund_name, verdict.fund_code, verdict.rationale
                ));
            }
            lines.push(String::new());
        }

        lines.push(format!(
            "<font color=\"comment\">生成时间: {}</font>",
            self.generated_at.with_timezone(&offset).format("%Y-%m-%d %H:%M:%S")
        ));
        lines.join("\n")
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    /// 发送报告；返回 Ok 表示对方已确认接收
    async fn send(&self, report: &DecisionReport) -> Result<()>;
}

/// 只写日志的通知器，用于本地调试
pub struct LogNotifier {
    offset: FixedOffset,
    sent: Mutex<Vec<SessionId>>,
}

impl LogNotifier {
    pub fn new(offset: FixedOffset) -> Self {
        Self {
            offset,
            sent: Mutex::new(Vec::new()),
        }
    }

    /// 已“发送”的时段
    pub fn sent_sessions(&self) -> Vec<SessionId> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, report: &DecisionReport) -> Result<()> {
        log::info!("📨 {}\n{}", report.title(), report.render_markdown(self.offset));
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(report.session.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{DataSnapshot, NavPoint, RuleKind, StrategyRecord, VerdictStatus};

    fn verdict(code: &str, fired: bool) -> Verdict {
        Verdict {
            fund_code: code.to_string(),
            fund_name: format!("基金{}", code),
            rule_kind: RuleKind::Drawdown,
            fired,
            signal: if fired { Signal::Buy } else { Signal::Hold },
            status: VerdictStatus::Evaluated,
            rationale: "近30个交易日最大回撤 12.00%，达到阈值 10.00%".to_string(),
            snapshot: DataSnapshot {
                points: vec![NavPoint::new(Utc::now(), 0.968)],
                metrics: Default::default(),
            },
        }
    }

    #[test]
    fn test_report_splits_fired_and_degraded() {
        let record = StrategyRecord::new("FUND002", "债券", RuleKind::Drawdown);
        let verdicts = vec![
            verdict("FUND001", true),
            verdict("FUND003", false),
            Verdict::unavailable(&record, "行情接口超时"),
        ];
        let report = DecisionReport::new(
            SessionId::parse("2026-10-16").unwrap(),
            Utc::now(),
            &verdicts,
        );

        assert_eq!(report.fund_codes(), vec!["FUND001"]);
        assert_eq!(report.degraded.len(), 1);

        let offset = FixedOffset::east_opt(8 * 3600).unwrap();
        let text = report.render_markdown(offset);
        assert!(text.starts_with("## 基金交易决策报告 - 2026-10-16"));
        assert!(text.contains("FUND001"));
        assert!(text.contains("建议买入"));
        assert!(text.contains("数据获取失败"));
        assert!(text.contains("行情接口超时"));
        assert!(!text.contains("FUND003"));
    }

    #[tokio::test]
    async fn test_log_notifier_records_session() {
        let notifier = LogNotifier::new(FixedOffset::east_opt(8 * 3600).unwrap());
        let session = SessionId::parse("2026-10-16").unwrap();
        let report = DecisionReport::new(session.clone(), Utc::now(), &[verdict("FUND001", true)]);

        notifier.send(&report).await.unwrap();
        assert_eq!(notifier.sent_sessions(), vec![session]);
    }
}

//! 定时评估流程
//!
//! Start → Loaded → Evaluating → Deciding → Notifying → Done，任何阶段都可能进入 Failed。
//! 同一交易时段最多发送一次通知：发送成功后才写入时段标记。

use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use crate::core::config::EvaluationConfig;
use crate::core::error::{ErrorSeverity, MonitorError};
use crate::core::types::{Result, SessionId, StrategyRecord, Verdict};
use crate::gateways::MarketDataGateway;
use crate::store::StrategyStore;
use crate::strategies::engine::DecisionEngine;
use crate::strategies::report::{DecisionReport, Notifier};

/// 评估流程状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Start,
    Loaded,
    Evaluating,
    Deciding,
    Notifying,
    Done,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// 外部调度器的一次触发
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerEvent {
    pub session: SessionId,
    pub fired_at: DateTime<Utc>,
}

impl TriggerEvent {
    pub fn new(session: SessionId, fired_at: DateTime<Utc>) -> Self {
        Self { session, fired_at }
    }
}

/// 因规则无效被跳过的策略
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedRecord {
    pub fund_code: String,
    pub reason: String,
}

/// 一批策略的评估结果（按文档顺序）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvaluationBatch {
    pub verdicts: Vec<Verdict>,
    pub skipped: Vec<SkippedRecord>,
    /// 行情源请求失败或超时的条数（不含历史数据不足）
    pub fetch_failures: usize,
}

impl EvaluationBatch {
    pub fn fired(&self) -> impl Iterator<Item = &Verdict> {
        self.verdicts.iter().filter(|v| v.fired)
    }

    /// 至少有一条结论，且每一条都是行情源请求失败
    pub fn all_fetches_failed(&self) -> bool {
        !self.verdicts.is_empty() && self.fetch_failures == self.verdicts.len()
    }
}

enum RecordOutcome {
    Evaluated(Verdict),
    Unreachable(Verdict),
    Skipped(SkippedRecord),
}

/// 一次评估的完整记录
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub session: SessionId,
    pub final_state: RunState,
    pub transitions: Vec<(RunState, RunState)>,
    pub verdicts: Vec<Verdict>,
    pub skipped: Vec<SkippedRecord>,
    /// 本次是否确实发出了通知
    pub notified: bool,
    pub error: Option<MonitorError>,
}

impl RunReport {
    fn new(session: SessionId) -> Self {
        Self {
            session,
            final_state: RunState::Start,
            transitions: Vec::new(),
            verdicts: Vec::new(),
            skipped: Vec::new(),
            notified: false,
            error: None,
        }
    }

    fn advance(&mut self, to: RunState) {
        let from = self.final_state;
        log::info!("🔄 [{}] {} -> {}", self.session, from, to);
        self.transitions.push((from, to));
        self.final_state = to;
    }

    fn fail(mut self, error: MonitorError) -> Self {
        match error.severity() {
            ErrorSeverity::Critical => log::error!("🚨 [{}] 评估失败: {}", self.session, error),
            _ => log::error!("❌ [{}] 评估失败: {}", self.session, error),
        }
        self.advance(RunState::Failed);
        self.error = Some(error);
        self
    }

    pub fn fired_count(&self) -> usize {
        self.verdicts.iter().filter(|v| v.fired).count()
    }

    pub fn unavailable_count(&self) -> usize {
        self.verdicts.iter().filter(|v| v.is_unavailable()).count()
    }
}

pub struct EvaluationRun {
    store: Arc<StrategyStore>,
    gateway: Arc<dyn MarketDataGateway>,
    notifier: Arc<dyn Notifier>,
    engine: DecisionEngine,
    max_concurrency: usize,
    record_timeout: Duration,
    notify_timeout: Duration,
}

impl EvaluationRun {
    pub fn new(
        store: Arc<StrategyStore>,
        gateway: Arc<dyn MarketDataGateway>,
        notifier: Arc<dyn Notifier>,
        config: &EvaluationConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            notifier,
            engine: DecisionEngine::new(),
            max_concurrency: config.max_concurrency.max(1),
            record_timeout: Duration::from_secs(config.record_timeout_secs),
            notify_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_notify_timeout(mut self, notify_timeout: Duration) -> Self {
        self.notify_timeout = notify_timeout;
        self
    }

    /// 执行一次完整评估
    pub async fn run(&self, trigger: &TriggerEvent) -> RunReport {
        let mut report = RunReport::new(trigger.session.clone());
        log::info!(
            "🚀 开始评估时段 {} (触发时间 {})",
            trigger.session,
            trigger.fired_at
        );

        // Start -> Loaded
        let set = match self.store.list().await {
            Ok(set) => set,
            Err(e) => return report.fail(e),
        };
        report.advance(RunState::Loaded);

        // Loaded -> Evaluating
        report.advance(RunState::Evaluating);
        let records: Vec<StrategyRecord> = set.enabled().cloned().collect();
        log::info!("📊 共{}条策略，启用{}条", set.len(), records.len());

        let batch = self.evaluate_records(records).await;
        let total_failure = batch.all_fetches_failed();
        let evaluated = batch.verdicts.len();
        report.verdicts = batch.verdicts;
        report.skipped = batch.skipped;

        if total_failure {
            return report.fail(MonitorError::Unavailable(format!(
                "{}条策略的行情全部获取失败",
                evaluated
            )));
        }

        // Evaluating -> Deciding
        report.advance(RunState::Deciding);
        if report.fired_count() == 0 {
            log::info!("📭 没有策略触发，无需通知");
            report.advance(RunState::Done);
            return report;
        }

        match self.store.was_notification_sent(&trigger.session).await {
            Ok(true) => {
                log::info!("📭 时段 {} 已发送过通知，跳过", trigger.session);
                report.advance(RunState::Done);
                return report;
            }
            Ok(false) => {}
            Err(e) => return report.fail(e),
        }

        // Deciding -> Notifying
        report.advance(RunState::Notifying);
        let decision = DecisionReport::new(trigger.session.clone(), trigger.fired_at, &report.verdicts);

        let sent = match timeout(self.notify_timeout, self.notifier.send(&decision)).await {
            Ok(result) => result,
            Err(_) => Err(MonitorError::timeout("notify", self.notify_timeout.as_secs())),
        };
        if let Err(e) = sent {
            // 标记保持未设置，下次触发会重新发送
            log::error!("❌ 通知发送失败 ({}): {}", self.notifier.name(), e);
            report.error = Some(e);
            report.advance(RunState::Done);
            return report;
        }
        report.notified = true;
        log::info!(
            "📨 已通过 {} 发送 {} 条触发结论",
            self.notifier.name(),
            decision.fired.len()
        );

        if let Err(e) = self.store.record_notification_sent(&trigger.session).await {
            return report.fail(e);
        }

        for verdict in &decision.fired {
            match self
                .store
                .mark_triggered(&verdict.fund_code, trigger.fired_at)
                .await
            {
                Ok(_) => {}
                Err(MonitorError::UnknownFund(code)) => {
                    log::warn!("⚠️ 策略 {} 已被删除，跳过触发时间记录", code);
                }
                Err(e) => {
                    log::warn!("⚠️ 记录 {} 的触发时间失败: {}", verdict.fund_code, e);
                }
            }
        }

        report.advance(RunState::Done);
        report
    }

    /// 只评估不通知，也不写入任何状态
    pub async fn preview(&self, fund_code: Option<&str>) -> Result<EvaluationBatch> {
        let set = self.store.list().await?;
        let records: Vec<StrategyRecord> = match fund_code {
            Some(code) => vec![set
                .get(code)
                .cloned()
                .ok_or_else(|| MonitorError::UnknownFund(code.to_string()))?],
            None => set.enabled().cloned().collect(),
        };
        Ok(self.evaluate_records(records).await)
    }

    /// 并发评估，结果按输入顺序返回
    async fn evaluate_records(&self, records: Vec<StrategyRecord>) -> EvaluationBatch {
        let mut outcomes: Vec<(usize, RecordOutcome)> = stream::iter(records.into_iter().enumerate())
            .map(|(index, record)| async move { (index, self.evaluate_record(record).await) })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;
        outcomes.sort_by_key(|(index, _)| *index);

        let mut batch = EvaluationBatch::default();
        for (_, outcome) in outcomes {
            match outcome {
                RecordOutcome::Evaluated(verdict) => batch.verdicts.push(verdict),
                RecordOutcome::Unreachable(verdict) => {
                    batch.fetch_failures += 1;
                    batch.verdicts.push(verdict);
                }
                RecordOutcome::Skipped(skipped) => batch.skipped.push(skipped),
            }
        }
        batch
    }

    async fn evaluate_record(&self, record: StrategyRecord) -> RecordOutcome {
        let window = match self.engine.required_window(&record) {
            Ok(window) => window,
            Err(e) => return skip(&record, e),
        };

        let fetched = timeout(
            self.record_timeout,
            self.gateway.get_series(&record.fund_code, window),
        )
        .await;
        let series = match fetched {
            Ok(Ok(series)) => series,
            Ok(Err(e)) => return unreachable_source(&record, e),
            Err(_) => {
                return unreachable_source(
                    &record,
                    MonitorError::timeout("get_series", self.record_timeout.as_secs()),
                )
            }
        };

        match self.engine.evaluate(&record, &series) {
            Ok(verdict) => {
                if verdict.fired {
                    log::info!(
                        "🎯 {} 触发: {} ({})",
                        record.display_label(),
                        verdict.rationale,
                        verdict.signal.label()
                    );
                } else {
                    log::debug!("{} 未触发: {}", record.display_label(), verdict.rationale);
                }
                RecordOutcome::Evaluated(verdict)
            }
            Err(e @ MonitorError::InvalidRule { .. }) => skip(&record, e),
            Err(e) => degraded(&record, e),
        }
    }
}

fn skip(record: &StrategyRecord, error: MonitorError) -> RecordOutcome {
    log::warn!("⚠️ 跳过策略 {}: {}", record.display_label(), error);
    RecordOutcome::Skipped(SkippedRecord {
        fund_code: record.fund_code.clone(),
        reason: error.to_string(),
    })
}

fn unreachable_source(record: &StrategyRecord, error: MonitorError) -> RecordOutcome {
    log::warn!("⚠️ {} 行情获取失败: {}", record.display_label(), error);
    RecordOutcome::Unreachable(Verdict::unavailable(record, error.to_string()))
}

fn degraded(record: &StrategyRecord, error: MonitorError) -> RecordOutcome {
    log::warn!("⚠️ {} 行情不可用: {}", record.display_label(), error);
    RecordOutcome::Evaluated(Verdict::unavailable(record, error.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::retry_policy::{ExponentialBackoffRetry, RetryConfig};
    use crate::core::types::{NavPoint, NavSeries, RuleKind, StrategySet, VerdictStatus, VersionToken};
    use crate::remote::{MemoryDocumentClient, RemoteDocument, RemoteDocumentClient};
    use crate::store::codec;
    use crate::strategies::rules::{
        BUY_THRESHOLD, LOOKBACK_DAYS, MAX_DRAWDOWN_PCT, SELL_THRESHOLD, WINDOW_DAYS,
    };
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FakeGateway {
        series: HashMap<String, Vec<f64>>,
        stalled: Option<String>,
        calls: AtomicUsize,
    }

    impl FakeGateway {
        fn new(entries: &[(&str, Vec<f64>)]) -> Self {
            Self {
                series: entries
                    .iter()
                    .map(|(code, navs)| (code.to_string(), navs.clone()))
                    .collect(),
                stalled: None,
                calls: AtomicUsize::new(0),
            }
        }

        /// 该基金的请求一直挂起
        fn with_stalled(mut self, fund_code: &str) -> Self {
            self.stalled = Some(fund_code.to_string());
            self
        }
    }

    #[async_trait]
    impl MarketDataGateway for FakeGateway {
        async fn get_series(&self, fund_code: &str, window: usize) -> Result<NavSeries> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.stalled.as_deref() == Some(fund_code) {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            let navs = self
                .series
                .get(fund_code)
                .ok_or_else(|| MonitorError::Unavailable(format!("{} 接口超时", fund_code)))?;
            let start = Utc.with_ymd_and_hms(2026, 9, 1, 7, 0, 0).unwrap();
            let points: Vec<NavPoint> = navs
                .iter()
                .enumerate()
                .map(|(i, nav)| NavPoint::new(start + chrono::Duration::days(i as i64), *nav))
                .collect();
            let keep = points.len().saturating_sub(window);
            Ok(NavSeries::new(fund_code, points[keep..].to_vec()))
        }
    }

    #[derive(Default)]
    struct FakeNotifier {
        fail: bool,
        reports: Mutex<Vec<DecisionReport>>,
    }

    impl FakeNotifier {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        fn sent(&self) -> Vec<DecisionReport> {
            self.reports.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Notifier for FakeNotifier {
        fn name(&self) -> &str {
            "fake"
        }

        async fn send(&self, report: &DecisionReport) -> Result<()> {
            if self.fail {
                return Err(MonitorError::NotificationError("webhook 502".to_string()));
            }
            self.reports.lock().unwrap().push(report.clone());
            Ok(())
        }
    }

    /// 能读取但所有写入都失败
    struct ReadOnlyClient {
        inner: Arc<MemoryDocumentClient>,
    }

    #[async_trait]
    impl RemoteDocumentClient for ReadOnlyClient {
        fn describe(&self) -> String {
            "read-only".to_string()
        }

        async fn fetch(&self) -> Result<RemoteDocument> {
            self.inner.fetch().await
        }

        async fn update(&self, _content: &str, _expected: &VersionToken) -> Result<VersionToken> {
            Err(MonitorError::Unavailable("503 Service Unavailable".to_string()))
        }

        async fn create(&self, _content: &str) -> Result<VersionToken> {
            Err(MonitorError::Unavailable("503 Service Unavailable".to_string()))
        }
    }

    /// 先涨到 1.10 再回撤 12%
    fn dipping_navs() -> Vec<f64> {
        let mut navs: Vec<f64> = (0..10).map(|i| 1.0 + i as f64 * 0.01).collect();
        navs.push(1.10);
        for i in 1..=19 {
            navs.push(1.10 - 0.132 * i as f64 / 19.0);
        }
        navs
    }

    fn flat_navs() -> Vec<f64> {
        vec![1.0; 30]
    }

    fn drawdown(code: &str) -> StrategyRecord {
        StrategyRecord::new(code, format!("基金{}", code), RuleKind::Drawdown)
            .with_param(WINDOW_DAYS, 30.0)
            .with_param(MAX_DRAWDOWN_PCT, 10.0)
    }

    fn threshold(code: &str) -> StrategyRecord {
        StrategyRecord::new(code, format!("基金{}", code), RuleKind::ReturnThreshold)
            .with_param(LOOKBACK_DAYS, 20.0)
            .with_param(BUY_THRESHOLD, -5.0)
            .with_param(SELL_THRESHOLD, 10.0)
    }

    fn store_with(records: Vec<StrategyRecord>) -> (Arc<StrategyStore>, Arc<MemoryDocumentClient>) {
        let mut set = StrategySet::new();
        for record in records {
            set.insert(record).unwrap();
        }
        let memory = Arc::new(MemoryDocumentClient::with_content(codec::encode(&set).unwrap()));
        let store = StrategyStore::with_retry(
            memory.clone(),
            ExponentialBackoffRetry::new(RetryConfig::for_conflicts(3, 1, 5)),
            Duration::from_secs(5),
        );
        (Arc::new(store), memory)
    }

    fn evaluation(
        store: Arc<StrategyStore>,
        gateway: Arc<FakeGateway>,
        notifier: Arc<FakeNotifier>,
    ) -> EvaluationRun {
        let config = EvaluationConfig {
            max_concurrency: 2,
            record_timeout_secs: 5,
        };
        EvaluationRun::new(store, gateway, notifier, &config)
            .with_notify_timeout(Duration::from_secs(5))
    }

    fn trigger(date: &str) -> TriggerEvent {
        TriggerEvent::new(
            SessionId::parse(date).unwrap(),
            Utc.with_ymd_and_hms(2026, 10, 16, 6, 45, 0).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_fired_strategy_notifies_once_per_session() {
        let (store, _) = store_with(vec![drawdown("FUND001")]);
        let gateway = Arc::new(FakeGateway::new(&[("FUND001", dipping_navs())]));
        let notifier = Arc::new(FakeNotifier::default());
        let run = evaluation(store.clone(), gateway, notifier.clone());

        let first = run.run(&trigger("2026-10-16")).await;
        assert_eq!(first.final_state, RunState::Done);
        assert!(first.notified);
        assert_eq!(
            first.transitions.iter().map(|(_, to)| *to).collect::<Vec<_>>(),
            vec![
                RunState::Loaded,
                RunState::Evaluating,
                RunState::Deciding,
                RunState::Notifying,
                RunState::Done
            ]
        );

        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].fund_codes(), vec!["FUND001"]);

        let session = SessionId::parse("2026-10-16").unwrap();
        assert!(store.was_notification_sent(&session).await.unwrap());
        assert_eq!(
            store.get("FUND001").await.unwrap().last_triggered,
            Some(trigger("2026-10-16").fired_at)
        );

        let second = run.run(&trigger("2026-10-16")).await;
        assert_eq!(second.final_state, RunState::Done);
        assert!(!second.notified);
        assert_eq!(notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_gateway_failure_degrades_single_record() {
        let (store, _) = store_with(vec![threshold("FUND002"), threshold("FUND003")]);
        let gateway = Arc::new(FakeGateway::new(&[("FUND003", flat_navs())]));
        let notifier = Arc::new(FakeNotifier::default());
        let run = evaluation(store, gateway, notifier.clone());

        let report = run.run(&trigger("2026-10-16")).await;
        assert_eq!(report.final_state, RunState::Done);
        assert_eq!(report.verdicts.len(), 2);
        assert_eq!(report.verdicts[0].fund_code, "FUND002");
        assert_eq!(report.verdicts[0].status, VerdictStatus::DataUnavailable);
        assert_eq!(report.verdicts[1].fund_code, "FUND003");
        assert_eq!(report.verdicts[1].status, VerdictStatus::Evaluated);
        assert!(notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn test_degraded_records_ride_along_with_fired() {
        let (store, _) = store_with(vec![drawdown("FUND001"), threshold("FUND002")]);
        let gateway = Arc::new(FakeGateway::new(&[("FUND001", dipping_navs())]));
        let notifier = Arc::new(FakeNotifier::default());
        let run = evaluation(store, gateway, notifier.clone());

        let report = run.run(&trigger("2026-10-16")).await;
        assert_eq!(report.final_state, RunState::Done);
        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].degraded.len(), 1);
        assert_eq!(sent[0].degraded[0].fund_code, "FUND002");
    }

    #[tokio::test]
    async fn test_unknown_rule_is_skipped_without_blocking() {
        let unknown = StrategyRecord::new("FUND009", "布林带", RuleKind::from("bollinger"))
            .with_param("window", 20.0);
        let (store, _) = store_with(vec![unknown, drawdown("FUND001")]);
        let gateway = Arc::new(FakeGateway::new(&[("FUND001", dipping_navs())]));
        let notifier = Arc::new(FakeNotifier::default());
        let run = evaluation(store, gateway.clone(), notifier.clone());

        let report = run.run(&trigger("2026-10-16")).await;
        assert_eq!(report.final_state, RunState::Done);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].fund_code, "FUND009");
        assert!(report.verdicts.iter().all(|v| v.fund_code != "FUND009"));
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 1);
        assert_eq!(notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_notifier_failure_leaves_marker_unset() {
        let (store, memory) = store_with(vec![drawdown("FUND001")]);
        let gateway = Arc::new(FakeGateway::new(&[("FUND001", dipping_navs())]));
        let run = evaluation(store.clone(), gateway, Arc::new(FakeNotifier::failing()));

        let report = run.run(&trigger("2026-10-16")).await;
        assert_eq!(report.final_state, RunState::Done);
        assert!(!report.notified);
        assert!(matches!(
            report.error,
            Some(MonitorError::NotificationError(_))
        ));
        assert!(!store
            .was_notification_sent(&SessionId::parse("2026-10-16").unwrap())
            .await
            .unwrap());
        assert_eq!(store.get("FUND001").await.unwrap().last_triggered, None);
        assert_eq!(memory.write_count(), 0);
    }

    #[tokio::test]
    async fn test_already_notified_session_sends_nothing() {
        let (store, _) = store_with(vec![drawdown("FUND001")]);
        store
            .record_notification_sent(&SessionId::parse("2026-10-16").unwrap())
            .await
            .unwrap();
        let gateway = Arc::new(FakeGateway::new(&[("FUND001", dipping_navs())]));
        let notifier = Arc::new(FakeNotifier::default());
        let run = evaluation(store, gateway, notifier.clone());

        let report = run.run(&trigger("2026-10-16")).await;
        assert_eq!(report.final_state, RunState::Done);
        assert_eq!(report.fired_count(), 1);
        assert!(notifier.sent().is_empty());

        // 新的时段照常发送
        let next = run.run(&trigger("2026-10-19")).await;
        assert!(next.notified);
        assert_eq!(notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_total_evaluation_failure_fails_run() {
        let (store, _) = store_with(vec![drawdown("FUND001"), threshold("FUND002")]);
        let gateway = Arc::new(FakeGateway::new(&[]));
        let notifier = Arc::new(FakeNotifier::default());
        let run = evaluation(store, gateway, notifier.clone());

        let report = run.run(&trigger("2026-10-16")).await;
        assert_eq!(report.final_state, RunState::Failed);
        assert_eq!(report.unavailable_count(), 2);
        assert!(notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn test_insufficient_history_alone_does_not_fail_run() {
        let (store, _) = store_with(vec![drawdown("FUND001"), threshold("FUND002")]);
        let gateway = Arc::new(FakeGateway::new(&[
            ("FUND001", vec![1.0, 0.99, 0.98]),
            ("FUND002", vec![1.0, 1.01]),
        ]));
        let notifier = Arc::new(FakeNotifier::default());
        let run = evaluation(store, gateway, notifier.clone());

        let report = run.run(&trigger("2026-10-16")).await;
        assert_eq!(report.final_state, RunState::Done);
        assert_eq!(report.unavailable_count(), 2);
        assert!(report.error.is_none());
        assert!(notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn test_stalled_gateway_times_out_per_record() {
        let (store, _) = store_with(vec![drawdown("FUND001"), threshold("FUND002")]);
        let gateway = Arc::new(
            FakeGateway::new(&[("FUND001", dipping_navs()), ("FUND002", flat_navs())])
                .with_stalled("FUND002"),
        );
        let notifier = Arc::new(FakeNotifier::default());
        let config = EvaluationConfig {
            max_concurrency: 2,
            record_timeout_secs: 1,
        };
        let run = EvaluationRun::new(store, gateway, notifier.clone(), &config)
            .with_notify_timeout(Duration::from_secs(5));

        let started = std::time::Instant::now();
        let report = run.run(&trigger("2026-10-16")).await;
        assert!(started.elapsed() < Duration::from_secs(30));

        assert_eq!(report.final_state, RunState::Done);
        assert_eq!(report.verdicts[0].status, VerdictStatus::Evaluated);
        assert_eq!(report.verdicts[1].fund_code, "FUND002");
        assert_eq!(report.verdicts[1].status, VerdictStatus::DataUnavailable);

        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].degraded[0].fund_code, "FUND002");
    }

    #[tokio::test]
    async fn test_marker_write_failure_after_send_fails_run() {
        let (_, memory) = store_with(vec![drawdown("FUND001")]);
        let store = Arc::new(StrategyStore::with_retry(
            Arc::new(ReadOnlyClient {
                inner: memory.clone(),
            }),
            ExponentialBackoffRetry::new(RetryConfig::for_conflicts(3, 1, 5)),
            Duration::from_secs(5),
        ));
        let gateway = Arc::new(FakeGateway::new(&[("FUND001", dipping_navs())]));
        let notifier = Arc::new(FakeNotifier::default());
        let run = evaluation(store.clone(), gateway, notifier.clone());

        let report = run.run(&trigger("2026-10-16")).await;
        assert_eq!(report.final_state, RunState::Failed);
        assert!(report.notified);
        assert!(matches!(report.error, Some(MonitorError::Unavailable(_))));
        assert_eq!(
            report.transitions.last(),
            Some(&(RunState::Notifying, RunState::Failed))
        );
        assert_eq!(notifier.sent().len(), 1);

        // 标记未写入，下次触发会再次发送
        assert!(!store
            .was_notification_sent(&SessionId::parse("2026-10-16").unwrap())
            .await
            .unwrap());
        assert_eq!(store.get("FUND001").await.unwrap().last_triggered, None);
    }

    #[tokio::test]
    async fn test_corrupt_store_fails_before_evaluation() {
        let memory = Arc::new(MemoryDocumentClient::with_content("[1, 2]"));
        let store = Arc::new(StrategyStore::with_retry(
            memory,
            ExponentialBackoffRetry::new(RetryConfig::for_conflicts(3, 1, 5)),
            Duration::from_secs(5),
        ));
        let gateway = Arc::new(FakeGateway::new(&[]));
        let run = evaluation(store, gateway.clone(), Arc::new(FakeNotifier::default()));

        let report = run.run(&trigger("2026-10-16")).await;
        assert_eq!(report.final_state, RunState::Failed);
        assert_eq!(report.transitions, vec![(RunState::Start, RunState::Failed)]);
        assert!(matches!(report.error, Some(MonitorError::CorruptStore(_))));
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_preview_does_not_write() {
        let (store, memory) = store_with(vec![drawdown("FUND001"), threshold("FUND003")]);
        let gateway = Arc::new(FakeGateway::new(&[
            ("FUND001", dipping_navs()),
            ("FUND003", flat_navs()),
        ]));
        let notifier = Arc::new(FakeNotifier::default());
        let run = evaluation(store, gateway, notifier.clone());

        let batch = run.preview(None).await.unwrap();
        assert_eq!(batch.fired().count(), 1);
        let single = run.preview(Some("FUND003")).await.unwrap();
        assert_eq!(single.verdicts.len(), 1);
        assert!(matches!(
            run.preview(Some("FUND404")).await,
            Err(MonitorError::UnknownFund(_))
        ));
        assert!(notifier.sent().is_empty());
        assert_eq!(memory.write_count(), 0);
    }
}

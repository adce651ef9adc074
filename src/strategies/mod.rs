//! 策略规则、决策引擎与定时评估流程
pub mod engine;
pub mod evaluation;
pub mod report;
pub mod rules;

pub use engine::DecisionEngine;
pub use evaluation::{EvaluationRun, RunReport, RunState, TriggerEvent};
pub use report::{DecisionReport, LogNotifier, Notifier};
pub use rules::RulePreset;

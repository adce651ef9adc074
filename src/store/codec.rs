//! 策略文档编解码
//!
//! 文档是一个 JSON 对象：基金代码 -> 策略记录，外加顶层字段
//! `lastNotifiedSession`。键的顺序即策略集合的顺序。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::error::MonitorError;
use crate::core::types::{
    validate_fund_code, Result, RuleKind, RuleParams, SessionId, StrategyRecord, StrategySet,
    VersionToken, SESSION_MARKER_KEY,
};

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordDoc {
    #[serde(default)]
    name: String,
    #[serde(alias = "rule_kind")]
    rule_kind: RuleKind,
    #[serde(default)]
    params: RuleParams,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default, alias = "last_triggered", skip_serializing_if = "Option::is_none")]
    last_triggered: Option<DateTime<Utc>>,
}

/// 空文档内容，`init` 时写入
pub fn empty_document() -> String {
    let mut root = Map::new();
    root.insert(SESSION_MARKER_KEY.to_string(), Value::Null);
    Value::Object(root).to_string()
}

/// 解码文档；任何格式问题都视为 `CorruptStore`
pub fn decode(content: &str, version: VersionToken) -> Result<StrategySet> {
    let root: Value = serde_json::from_str(content)
        .map_err(|e| MonitorError::CorruptStore(format!("JSON解析失败: {}", e)))?;
    let Value::Object(entries) = root else {
        return Err(MonitorError::CorruptStore("文档顶层必须是对象".to_string()));
    };

    let mut set = StrategySet::new().with_version(version);

    for (key, value) in entries {
        if key == SESSION_MARKER_KEY {
            let session = match value {
                Value::Null => None,
                Value::String(raw) => Some(SessionId::parse(&raw).map_err(|e| {
                    MonitorError::CorruptStore(format!("{} 字段无效: {}", SESSION_MARKER_KEY, e))
                })?),
                other => {
                    return Err(MonitorError::CorruptStore(format!(
                        "{} 字段类型错误: {}",
                        SESSION_MARKER_KEY, other
                    )))
                }
            };
            set.set_last_notified_session(session);
            continue;
        }

        validate_fund_code(&key)
            .map_err(|e| MonitorError::CorruptStore(format!("非法的基金代码键: {}", e)))?;

        let doc: RecordDoc = serde_json::from_value(value)
            .map_err(|e| MonitorError::CorruptStore(format!("基金 {} 的记录格式错误: {}", key, e)))?;

        set.insert(StrategyRecord {
            fund_code: key,
            name: doc.name,
            rule_kind: doc.rule_kind,
            params: doc.params,
            enabled: doc.enabled,
            last_triggered: doc.last_triggered,
        })
        .map_err(|e| MonitorError::CorruptStore(e.to_string()))?;
    }

    Ok(set)
}

/// 编码为带缩进的 JSON，便于在仓库中查看差异
pub fn encode(set: &StrategySet) -> Result<String> {
    let mut root = Map::new();
    root.insert(
        SESSION_MARKER_KEY.to_string(),
        set.last_notified_session()
            .map(|s| Value::String(s.as_str().to_string()))
            .unwrap_or(Value::Null),
    );

    for record in set.records() {
        let doc = RecordDoc {
            name: record.name.clone(),
            rule_kind: record.rule_kind.clone(),
            params: record.params.clone(),
            enabled: record.enabled,
            last_triggered: record.last_triggered,
        };
        let value = serde_json::to_value(&doc)
            .map_err(|e| MonitorError::CorruptStore(format!("编码 {} 失败: {}", record.fund_code, e)))?;
        root.insert(record.fund_code.clone(), value);
    }

    serde_json::to_string_pretty(&Value::Object(root))
        .map_err(|e| MonitorError::CorruptStore(format!("编码文档失败: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
  "lastNotifiedSession": "2026-10-15",
  "161725": {
    "name": "招商中证白酒指数(LOF)A",
    "ruleKind": "return_threshold",
    "params": {"lookback_days": 20, "buy_threshold": -5, "sell_threshold": 10},
    "enabled": true,
    "lastTriggered": "2026-10-15T06:45:00Z"
  },
  "110022": {
    "name": "易方达消费行业股票",
    "ruleKind": "bollinger",
    "params": {"window": 20},
    "enabled": false
  }
}"#;

    #[test]
    fn test_decode_keeps_document_order_and_unknown_rules() {
        let set = decode(SAMPLE, VersionToken::new("sha1")).unwrap();
        let codes: Vec<&str> = set.records().iter().map(|r| r.fund_code.as_str()).collect();
        assert_eq!(codes, vec!["161725", "110022"]);
        assert_eq!(set.version(), Some(&VersionToken::new("sha1")));
        assert_eq!(
            set.last_notified_session(),
            Some(&SessionId::parse("2026-10-15").unwrap())
        );

        let white_spirit = set.get("161725").unwrap();
        assert_eq!(white_spirit.rule_kind, RuleKind::ReturnThreshold);
        assert_eq!(white_spirit.param("lookback_days"), Some(20.0));
        assert!(white_spirit.last_triggered.is_some());

        let consumer = set.get("110022").unwrap();
        assert_eq!(consumer.rule_kind, RuleKind::Unrecognized("bollinger".to_string()));
        assert!(!consumer.enabled);
    }

    #[test]
    fn test_encode_then_decode_preserves_set() {
        let set = decode(SAMPLE, VersionToken::new("sha1")).unwrap();
        let encoded = encode(&set).unwrap();
        assert!(encoded.contains("\"ruleKind\": \"bollinger\""));

        let again = decode(&encoded, VersionToken::new("sha1")).unwrap();
        assert_eq!(again, set);
    }

    #[test]
    fn test_malformed_documents_are_corrupt() {
        for broken in [
            "",
            "[]",
            "{\"161725\": {\"name\": \"x\"}}",
            "{\"lastNotifiedSession\": 42}",
            "{\"bad-code\": {\"ruleKind\": \"drawdown\"}}",
            "{\"161725\": {\"ruleKind\": \"drawdown\", \"params\": {\"window_days\": \"ten\"}}}",
        ] {
            let err = decode(broken, VersionToken::new("v")).unwrap_err();
            assert!(
                matches!(err, MonitorError::CorruptStore(_)),
                "expected CorruptStore for {:?}, got {:?}",
                broken,
                err
            );
        }
    }

    #[test]
    fn test_empty_document() {
        let set = decode(&empty_document(), VersionToken::new("v1")).unwrap();
        assert!(set.is_empty());
        assert!(set.last_notified_session().is_none());
    }
}

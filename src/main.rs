use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use clap::{Arg, ArgAction, ArgMatches, Command};
use fundwatch::{
    core::config::{AppConfig, NotifierKind, StoreBackend},
    core::types::{RuleKind, StrategyRecord},
    gateways::EastmoneyGateway,
    remote::{GithubDocumentClient, LocalFileDocumentClient, RemoteDocumentClient},
    store::StrategyStore,
    strategies::evaluation::{EvaluationRun, RunState, TriggerEvent},
    strategies::report::{LogNotifier, Notifier},
    strategies::rules::RulePreset,
    utils::{session, unified_logger::init_logger, webhook::WeComNotifier},
};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_CONFIG: &str = "config/fundwatch.yml";

fn fund_code_arg() -> Arg {
    Arg::new("fund_code")
        .value_name("FUND_CODE")
        .help("基金代码")
        .required(true)
}

fn build_cli() -> Command {
    Command::new("fundwatch")
        .version(env!("CARGO_PKG_VERSION"))
        .about("基金策略监控：编辑策略并按交易时段发送决策报告")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径")
                .default_value(DEFAULT_CONFIG)
                .global(true),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .help("覆盖配置中的日志级别: trace, debug, info, warn, error")
                .global(true),
        )
        .subcommand(Command::new("init").about("远端策略文档不存在时创建空文档"))
        .subcommand(Command::new("list").about("列出所有监控策略"))
        .subcommand(
            Command::new("add")
                .about("添加一条监控策略")
                .arg(fund_code_arg())
                .arg(
                    Arg::new("name")
                        .short('n')
                        .long("name")
                        .value_name("NAME")
                        .help("基金名称"),
                )
                .arg(
                    Arg::new("rule")
                        .short('r')
                        .long("rule")
                        .value_name("RULE")
                        .help("规则类型: return_threshold, drawdown, ma_cross"),
                )
                .arg(
                    Arg::new("preset")
                        .short('p')
                        .long("preset")
                        .value_name("PRESET")
                        .help("收益率阈值预设: conservative, active, aggressive"),
                )
                .arg(
                    Arg::new("param")
                        .long("param")
                        .value_name("KEY=VALUE")
                        .help("规则参数，可重复，例如 --param window_days=30")
                        .action(ArgAction::Append),
                )
                .arg(
                    Arg::new("disabled")
                        .long("disabled")
                        .help("添加后保持停用")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(Command::new("remove").about("删除监控策略").arg(fund_code_arg()))
        .subcommand(Command::new("enable").about("启用监控策略").arg(fund_code_arg()))
        .subcommand(Command::new("disable").about("停用监控策略").arg(fund_code_arg()))
        .subcommand(
            Command::new("preview")
                .about("只评估不通知，也不写入任何状态")
                .arg(
                    Arg::new("fund_code")
                        .value_name("FUND_CODE")
                        .help("只评估指定基金（包括已停用的）"),
                ),
        )
        .subcommand(
            Command::new("run")
                .about("执行一次定时评估（由外部调度器调用）")
                .arg(
                    Arg::new("date")
                        .short('d')
                        .long("date")
                        .value_name("YYYY-MM-DD")
                        .help("逻辑日期，缺省为配置时区下的今天"),
                )
                .arg(
                    Arg::new("session")
                        .short('s')
                        .long("session")
                        .value_name("LABEL")
                        .help("同一交易日内的时段标签"),
                ),
        )
}

fn build_client(config: &AppConfig) -> Result<Arc<dyn RemoteDocumentClient>> {
    let timeout = Duration::from_secs(config.store.timeout_secs);
    let client: Arc<dyn RemoteDocumentClient> = match config.store.backend {
        StoreBackend::Github => {
            let github = config
                .store
                .github
                .clone()
                .ok_or_else(|| anyhow!("缺少 store.github 配置"))?;
            Arc::new(GithubDocumentClient::from_env(github, timeout)?)
        }
        StoreBackend::LocalFile => {
            let local = config
                .store
                .local_file
                .as_ref()
                .ok_or_else(|| anyhow!("缺少 store.local_file 配置"))?;
            Arc::new(LocalFileDocumentClient::new(&local.path))
        }
    };
    Ok(client)
}

fn build_notifier(config: &AppConfig) -> Result<Arc<dyn Notifier>> {
    let offset = config.session.offset()?;
    let notifier: Arc<dyn Notifier> = match config.notifier.kind {
        NotifierKind::Wecom => {
            let wecom = config
                .notifier
                .wecom
                .clone()
                .ok_or_else(|| anyhow!("缺少 notifier.wecom 配置"))?;
            Arc::new(WeComNotifier::new(
                wecom,
                Duration::from_secs(config.notifier.timeout_secs),
                offset,
            )?)
        }
        NotifierKind::Log => Arc::new(LogNotifier::new(offset)),
    };
    Ok(notifier)
}

fn build_evaluation(config: &AppConfig, store: Arc<StrategyStore>) -> Result<EvaluationRun> {
    let gateway = Arc::new(EastmoneyGateway::new(config.market_data.clone())?);
    let notifier = build_notifier(config)?;
    // 正文与提醒各一次请求
    let notify_timeout = Duration::from_secs(config.notifier.timeout_secs.saturating_mul(2));
    Ok(
        EvaluationRun::new(store, gateway, notifier, &config.evaluation)
            .with_notify_timeout(notify_timeout),
    )
}

fn fund_code(matches: &ArgMatches) -> Result<String> {
    matches
        .get_one::<String>("fund_code")
        .cloned()
        .ok_or_else(|| anyhow!("缺少基金代码"))
}

/// 解析 `key=value` 形式的规则参数
fn parse_param(raw: &str) -> Result<(String, f64)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("参数格式应为 KEY=VALUE: {}", raw))?;
    let value: f64 = value
        .trim()
        .parse()
        .with_context(|| format!("参数 {} 的值不是数字: {}", key, value))?;
    Ok((key.trim().to_string(), value))
}

fn record_from_args(matches: &ArgMatches) -> Result<StrategyRecord> {
    let code = fund_code(matches)?;
    let name = matches
        .get_one::<String>("name")
        .cloned()
        .unwrap_or_else(|| code.clone());
    let preset = match matches.get_one::<String>("preset") {
        Some(raw) => Some(
            RulePreset::from_name(raw).ok_or_else(|| anyhow!("未知的预设: {}", raw))?,
        ),
        None => None,
    };
    let rule_kind = match (matches.get_one::<String>("rule"), preset) {
        (Some(raw), _) => RuleKind::from(raw.as_str()),
        (None, Some(_)) => RuleKind::ReturnThreshold,
        (None, None) => bail!("需要 --rule 或 --preset"),
    };

    let mut record = StrategyRecord::new(code, name, rule_kind.clone())
        .with_enabled(!matches.get_flag("disabled"));
    if let Some(preset) = preset {
        if rule_kind != RuleKind::ReturnThreshold {
            bail!("预设只适用于 return_threshold 规则");
        }
        record = preset.apply(record);
    }
    // 显式参数覆盖预设
    if let Some(params) = matches.get_many::<String>("param") {
        for raw in params {
            let (key, value) = parse_param(raw)?;
            record = record.with_param(&key, value);
        }
    }
    Ok(record)
}

async fn list(store: &StrategyStore) -> Result<()> {
    let set = store.list().await?;
    println!("策略文档: {}", store.describe());
    println!(
        "最近通知时段: {}",
        set.last_notified_session()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "无".to_string())
    );
    if set.is_empty() {
        println!("暂无监控策略");
        return Ok(());
    }

    for record in set.records() {
        let params = record
            .params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(", ");
        println!(
            "{} {:<10} {:<20} {:<18} [{}] 上次触发: {}",
            if record.enabled { "●" } else { "○" },
            record.fund_code,
            record.name,
            record.rule_kind.display_name(),
            params,
            record
                .last_triggered
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "-".to_string())
        );
    }
    Ok(())
}

async fn preview(evaluation: &EvaluationRun, fund_code: Option<&str>) -> Result<()> {
    let batch = evaluation.preview(fund_code).await?;
    for verdict in &batch.verdicts {
        println!(
            "{} {:<10} {:<8} {}",
            if verdict.fired { "🎯" } else { "  " },
            verdict.fund_code,
            if verdict.is_unavailable() {
                "数据不可用"
            } else {
                verdict.signal.label()
            },
            verdict.rationale
        );
    }
    for skipped in &batch.skipped {
        println!("⏭  {:<10} 已跳过: {}", skipped.fund_code, skipped.reason);
    }
    Ok(())
}

async fn run(config: &AppConfig, store: Arc<StrategyStore>, matches: &ArgMatches) -> Result<()> {
    let date = matches
        .get_one::<String>("date")
        .map(|raw| session::parse_date(raw))
        .transpose()?;
    let label = matches.get_one::<String>("session").map(String::as_str);
    let now = Utc::now();
    let resolved = session::resolve(&config.session, date, label, now)?;

    if resolved.skip {
        log::info!("📅 {} 不是交易日，跳过评估", resolved.date);
        return Ok(());
    }

    let evaluation = build_evaluation(config, store)?;
    let report = evaluation
        .run(&TriggerEvent::new(resolved.session, now))
        .await;

    log::info!(
        "🏁 时段 {} 结束: {}，结论{}条（触发{}，不可用{}），跳过{}条，已通知: {}",
        report.session,
        report.final_state,
        report.verdicts.len(),
        report.fired_count(),
        report.unavailable_count(),
        report.skipped.len(),
        report.notified
    );

    match (report.final_state, report.error) {
        (RunState::Failed, Some(e)) => {
            log::error!("❌ {}", e.user_friendly_message());
            Err(anyhow::Error::new(e).context("评估失败"))
        }
        (RunState::Failed, None) => bail!("评估失败"),
        _ => Ok(()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // 加载环境变量
    dotenv::dotenv().ok();

    let matches = build_cli().get_matches();
    let config_path = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or(DEFAULT_CONFIG);

    let mut config = AppConfig::from_file(config_path)
        .with_context(|| format!("加载配置失败: {}", config_path))?;
    if let Some(level) = matches.get_one::<String>("log-level") {
        config.logging.default_level = level.clone();
    }

    let (command, sub_matches) = matches
        .subcommand()
        .ok_or_else(|| anyhow!("缺少子命令"))?;

    // 编辑进程与评估进程分开写日志
    let process = match command {
        "run" | "preview" => "run",
        _ => "editor",
    };
    init_logger(&config.logging, process)?;
    log::info!("启动 fundwatch {} (配置: {})", command, config_path);

    let store = Arc::new(StrategyStore::new(build_client(&config)?, &config.store));

    match command {
        "init" => {
            if store.init().await? {
                println!("已创建策略文档: {}", store.describe());
            } else {
                println!("策略文档已存在: {}", store.describe());
            }
        }
        "list" => list(&store).await?,
        "add" => {
            let record = record_from_args(sub_matches)?;
            let label = record.display_label();
            store.add(record).await?;
            println!("已添加: {}", label);
        }
        "remove" => {
            let removed = store.remove(&fund_code(sub_matches)?).await?;
            println!("已删除: {}", removed.display_label());
        }
        "enable" | "disable" => {
            let code = fund_code(sub_matches)?;
            store.set_enabled(&code, command == "enable").await?;
            println!("已{}: {}", if command == "enable" { "启用" } else { "停用" }, code);
        }
        "preview" => {
            let evaluation = build_evaluation(&config, store)?;
            let code = sub_matches.get_one::<String>("fund_code").map(String::as_str);
            preview(&evaluation, code).await?;
        }
        "run" => run(&config, store, sub_matches).await?,
        other => bail!("未知的子命令: {}", other),
    }

    Ok(())
}

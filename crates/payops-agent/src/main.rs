//! `payops-agent` command-line entrypoint

use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use payops_agent::history::verify_file;
use payops_agent::{
    ControlLoop, JsonlLessonStore, LessonStore, MemoryLessonStore, SyntheticSource, TracingOps,
};
use payops_core::{AgentConfig, Aggregate, CycleReport, DiagnosisEngine, Guardrail};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

fn cli() -> Command {
    Command::new("payops-agent")
        .version(payops_agent::VERSION)
        .about("Autonomous payment operations agent")
        .subcommand_required(true)
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .global(true)
                .default_value("info")
                .help("Log filter when RUST_LOG is unset"),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand(
            Command::new("run")
                .about("Run the control loop on synthetic traffic until Ctrl-C")
                .arg(config_arg())
                .arg(
                    Arg::new("cycles")
                        .long("cycles")
                        .value_parser(value_parser!(u64))
                        .help("Stop after this many cycles"),
                )
                .arg(
                    Arg::new("tick-ms")
                        .long("tick-ms")
                        .value_parser(value_parser!(u64))
                        .help("Cycle period in milliseconds"),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .value_parser(value_parser!(u64))
                        .help("Seed for the synthetic traffic"),
                )
                .arg(history_arg()),
        )
        .subcommand(
            Command::new("diagnose")
                .about("Diagnose a single aggregate snapshot")
                .arg(config_arg())
                .arg(
                    Arg::new("aggregate")
                        .long("aggregate")
                        .required(true)
                        .help("Aggregate JSON, inline or as a file path"),
                )
                .arg(history_arg()),
        )
        .subcommand(
            Command::new("verify-log")
                .about("Verify the hash chain of a lesson log")
                .arg(
                    Arg::new("path")
                        .long("path")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Lesson log (JSON lines)"),
                ),
        )
}

fn config_arg() -> Arg {
    Arg::new("config")
        .long("config")
        .value_parser(value_parser!(PathBuf))
        .help("Config file (.toml, .yaml or .yml)")
}

fn history_arg() -> Arg {
    Arg::new("history")
        .long("history")
        .value_parser(value_parser!(PathBuf))
        .help("Lesson log (JSON lines)")
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    let level = matches
        .get_one::<String>("log-level")
        .map_or("info", String::as_str);
    init_logging(level, matches.get_flag("json-logs"))?;

    match matches.subcommand() {
        Some(("run", args)) => run(args).await,
        Some(("diagnose", args)) => diagnose(args),
        Some(("verify-log", args)) => verify_log(args),
        _ => Ok(()),
    }
}

fn init_logging(level: &str, json: bool) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
    Ok(())
}

fn load_config(args: &ArgMatches) -> Result<AgentConfig> {
    let mut config = match args.get_one::<PathBuf>("config") {
        Some(path) => AgentConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => AgentConfig::new(),
    };
    if let Some(path) = args.get_one::<PathBuf>("history") {
        config = config.with_history_path(path);
    }
    Ok(config)
}

fn open_store(config: &AgentConfig) -> Arc<dyn LessonStore> {
    let Some(path) = &config.history.path else {
        return Arc::new(MemoryLessonStore::new());
    };
    match JsonlLessonStore::open_with_capacity(path, config.control.lesson_window) {
        Ok(store) => {
            info!(path = %path.display(), lessons = store.len(), "lesson log opened");
            Arc::new(store)
        }
        Err(err) => {
            warn!(path = %path.display(), error = %err, "lesson log unusable; keeping lessons in memory");
            Arc::new(MemoryLessonStore::new())
        }
    }
}

async fn run(args: &ArgMatches) -> Result<()> {
    let mut config = load_config(args)?;
    if let Some(cycles) = args.get_one::<u64>("cycles") {
        config = config.with_max_cycles(*cycles);
    }
    if let Some(tick_ms) = args.get_one::<u64>("tick-ms") {
        config = config.with_tick(Duration::from_millis(*tick_ms));
    }
    if let Some(seed) = args.get_one::<u64>("seed") {
        config.source.seed = Some(*seed);
    }

    let source = Arc::new(SyntheticSource::new(
        config.source.clone(),
        config.aggregation.window_secs,
    ));
    let store = open_store(&config);
    let mut control = ControlLoop::new(config, source, store, Arc::new(TracingOps))
        .context("Refusing to start")?;

    let shutdown = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "Ctrl-C handler unavailable");
            std::future::pending::<()>().await;
        }
    };
    let summary = control
        .run_with(shutdown, |report| println!("{}\n", render_report(report)))
        .await;

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn diagnose(args: &ArgMatches) -> Result<()> {
    let config = load_config(args)?;
    let raw = args
        .get_one::<String>("aggregate")
        .context("--aggregate is required")?;
    let text = if raw.trim_start().starts_with('{') {
        raw.clone()
    } else {
        std::fs::read_to_string(raw).with_context(|| format!("Failed to read {raw}"))?
    };
    let window: Aggregate = serde_json::from_str(&text).context("Invalid aggregate JSON")?;
    window.validate().context("Aggregate rejected")?;

    let lessons = match &config.history.path {
        Some(path) => JsonlLessonStore::open_with_capacity(path, config.control.lesson_window)
            .and_then(|store| store.recent(config.control.lesson_window))
            .with_context(|| format!("Failed to read lesson log {}", path.display()))?,
        None => Vec::new(),
    };

    let decision = DiagnosisEngine::from_config(&config).diagnose(&window, &lessons);
    let guardrail = Guardrail::new(config.guardrail.clone());
    let assessment = guardrail.assess(&decision, window.total_count);

    let output = serde_json::json!({
        "decision": decision,
        "disposition": assessment.disposition,
        "guard_reason": assessment.reason,
        "human_approval_required": guardrail.requires_approval(&decision),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn verify_log(args: &ArgMatches) -> Result<()> {
    let path = args
        .get_one::<PathBuf>("path")
        .context("--path is required")?;
    let entries = verify_file(path)
        .with_context(|| format!("Lesson log {} failed verification", path.display()))?;
    println!("{}: {entries} entries, chain intact", path.display());
    Ok(())
}

fn render_report(report: &CycleReport) -> String {
    let mut lines = vec![
        format!("--- AGENT CYCLE {} ---", report.cycle),
        format!("- Diagnosis: {}", report.diagnosis),
        format!("- Evidence: {}", report.evidence.join("; ")),
        format!("- Proposed Action: {}", report.proposed_action),
        format!("- Risk Assessment: {}", report.risk_assessment),
        format!("- Confidence Score: {:.2}", report.confidence_score),
    ];
    if report.human_approval_required {
        lines.push(
            "- Recommendation: Human approval required before acting (confidence below threshold)."
                .to_string(),
        );
    }
    let mut outcome = format!(
        "- Outcome: {} / {} (volume {})",
        report.disposition, report.outcome, report.volume
    );
    if let Some(detail) = &report.detail {
        outcome.push_str(&format!(": {detail}"));
    }
    lines.push(outcome);
    lines.join("\n")
}

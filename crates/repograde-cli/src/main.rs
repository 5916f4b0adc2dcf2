//! repograde - scripted rubric evaluation driver
//!
//! The `repograde` command runs the concurrency engine against a scripted
//! set of techniques, streams progress while it runs, and prints the merged
//! evaluation.
//!
//! ## Commands
//!
//! - `run`: execute a technique script and print the evaluation report
//! - `score`: normalise a JSON file of item scores
//! - `config`: print the effective engine configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use repograde_core::{
    run_evaluation, score_evaluation, CategoryPlan, ConcurrencyPolicy, EngineConfig,
    EvaluationContext, EvaluationReport, EventType, ItemScore, ProgressChannel, ProgressEmitter,
    ProgressEvent, ScoreSummary, HEARTBEAT_PROGRESS,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};

mod script;

use script::{ScriptFile, ScriptRunner};

/// Grace period for the subscriber to drain after the evaluation returns.
const DRAIN_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "repograde")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Concurrent rubric evaluation engine", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true, env = "REPOGRADE_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a technique script through the engine
    Run {
        /// Script describing categories and their techniques (TOML)
        #[arg(short, long)]
        script: PathBuf,

        /// Engine configuration file (TOML)
        #[arg(short, long, env = "REPOGRADE_CONFIG")]
        config: Option<PathBuf>,

        /// Override worker.max_concurrent
        #[arg(long, env = "REPOGRADE_MAX_CONCURRENT")]
        max_concurrent: Option<usize>,

        /// Override worker.technique_timeout_ms
        #[arg(long, env = "REPOGRADE_TIMEOUT_MS")]
        timeout_ms: Option<u64>,

        /// Evaluation id (random when omitted)
        #[arg(long)]
        evaluation_id: Option<String>,

        /// Print progress events to stderr while running
        #[arg(long)]
        events: bool,

        /// Emit the report as JSON instead of terminal text
        #[arg(long)]
        json: bool,
    },

    /// Normalise item scores read from a JSON file
    Score {
        /// JSON object keyed by item id, or a JSON array of item scores
        #[arg(short, long)]
        input: PathBuf,

        /// Rubric size used as the coverage denominator
        #[arg(long, default_value_t = repograde_core::TOTAL_RUBRIC_ITEMS)]
        rubric_items: usize,

        /// Emit JSON output instead of terminal text
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration as TOML
    Config {
        /// Engine configuration file (TOML)
        #[arg(short, long, env = "REPOGRADE_CONFIG")]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    repograde_core::init_tracing(cli.log_json, level);

    match cli.command {
        Commands::Run {
            script,
            config,
            max_concurrent,
            timeout_ms,
            evaluation_id,
            events,
            json,
        } => {
            let mut config = load_config(config.as_deref())?;
            apply_overrides(&mut config, max_concurrent, timeout_ms)?;
            cmd_run(&script, config, evaluation_id, events, json).await
        }
        Commands::Score {
            input,
            rubric_items,
            json,
        } => cmd_score(&input, rubric_items, json),
        Commands::Config { config } => cmd_config(config.as_deref()),
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("Failed to load config: {:?}", path)),
        None => Ok(EngineConfig::default()),
    }
}

fn apply_overrides(
    config: &mut EngineConfig,
    max_concurrent: Option<usize>,
    timeout_ms: Option<u64>,
) -> Result<()> {
    if let Some(limit) = max_concurrent {
        config.worker.max_concurrent = limit;
    }
    if let Some(timeout_ms) = timeout_ms {
        config.worker.technique_timeout_ms = timeout_ms;
    }
    config.validate().context("Invalid configuration")?;
    Ok(())
}

async fn cmd_run(
    script_path: &Path,
    config: EngineConfig,
    evaluation_id: Option<String>,
    show_events: bool,
    json: bool,
) -> Result<()> {
    let script = ScriptFile::load(script_path)?;
    let evaluation_id = evaluation_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let report = execute_script(script, config, &evaluation_id, show_events).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", render_report_text(&report));
    }
    Ok(())
}

/// Run `script` under `config`, draining the progress stream alongside.
async fn execute_script(
    script: ScriptFile,
    config: EngineConfig,
    evaluation_id: &str,
    show_events: bool,
) -> Result<EvaluationReport> {
    let channel = ProgressChannel::current(config.channel.clone())
        .context("Progress channel needs a Tokio runtime")?;
    channel.create_channel(evaluation_id);
    let mut stream = channel.subscribe(evaluation_id);

    let mut printer = tokio::spawn(async move {
        let mut seen = 0usize;
        while let Some(event) = stream.next().await {
            seen += 1;
            if show_events {
                eprintln!("{}", render_event_line(&event));
            }
        }
        seen
    });

    let mut context = EvaluationContext::new(evaluation_id, script.repository.clone());
    context.metadata = script.metadata.clone();
    let context = Arc::new(context);
    let plans: Vec<CategoryPlan> = script.plans();
    let runner = Arc::new(ScriptRunner::new(&script));
    info!(
        evaluation_id = %evaluation_id,
        categories = plans.len(),
        max_concurrent = config.worker.max_concurrent,
        "starting scripted evaluation"
    );

    let report = run_evaluation(
        plans,
        runner,
        ConcurrencyPolicy::from_config(&config.worker),
        context,
        ProgressEmitter::new(Arc::clone(&channel), evaluation_id),
        config.rubric_items,
    )
    .await;

    // The stream ends on the terminal event; close only after that so the
    // completion event is not lost.
    let seen = match tokio::time::timeout(DRAIN_GRACE, &mut printer).await {
        Ok(joined) => joined.context("Progress printer failed")?,
        Err(_) => {
            warn!(evaluation_id = %evaluation_id, "terminal event not observed, closing channel");
            channel.close_channel(evaluation_id);
            printer.await.context("Progress printer failed")?
        }
    };
    channel.close_channel(evaluation_id);
    info!(evaluation_id = %evaluation_id, events = seen, "progress stream drained");

    Ok(report)
}

fn render_event_line(event: &ProgressEvent) -> String {
    let mut line = format!("[{}]", event.event_type);
    if let Some(category) = &event.category_id {
        line.push_str(&format!(" {category}"));
    }
    if let Some(technique) = &event.technique_id {
        line.push_str(&format!("/{technique}"));
    }
    if event.progress_percent != HEARTBEAT_PROGRESS {
        line.push_str(&format!(" {:.1}%", event.progress_percent));
    }
    if let (Some(score), Some(max)) = (event.score, event.max_score) {
        line.push_str(&format!(" score={score:.1}/{max:.1}"));
    }
    if let Some(ms) = event.duration_ms {
        line.push_str(&format!(" ({ms}ms)"));
    }
    if let Some(error) = &event.error_message {
        line.push_str(&format!(" error: {error}"));
    } else if let Some(message) = &event.message {
        line.push_str(&format!(" {message}"));
    }
    if event.event_type == EventType::EvaluationError {
        line.push_str(" !");
    }
    line
}

fn render_report_text(report: &EvaluationReport) -> String {
    let summary = &report.summary;
    let mut out = String::new();
    out.push_str(&format!("evaluation {}\n", report.state.evaluation_id));
    out.push_str(&render_summary_text(summary));

    out.push_str("  categories:\n");
    for result in report.state.category_results.values() {
        out.push_str(&format!(
            "    {}: {}/{} succeeded",
            result.category_id,
            result.techniques_succeeded,
            result.total()
        ));
        if result.techniques_timed_out > 0 {
            out.push_str(&format!(", {} timed out", result.techniques_timed_out));
        }
        if let Some(notice) = &result.notice {
            out.push_str(&format!(" ({notice})"));
        }
        out.push('\n');
        for failure in &result.failed {
            out.push_str(&format!(
                "      x {}: {}\n",
                failure.technique_id, failure.error
            ));
        }
    }

    let usage = &report.state.usage;
    out.push_str(&format!(
        "  usage: {} tokens, ${:.4}",
        usage.total_tokens(),
        usage.cost_usd
    ));
    out
}

fn render_summary_text(summary: &ScoreSummary) -> String {
    let mut out = format!(
        "  score: {:.1}/100 (raw {:.1}/{:.1})\n  coverage: {} ({:.0}%)\n",
        summary.normalized_score,
        summary.raw_score,
        summary.max_possible,
        summary.coverage_summary,
        summary.coverage_rate * 100.0
    );
    if !summary.excluded_items.is_empty() {
        out.push_str(&format!(
            "  excluded: {}\n",
            summary.excluded_items.join(", ")
        ));
    }
    if !summary.data_missing_items.is_empty() {
        out.push_str(&format!(
            "  data missing: {}\n",
            summary.data_missing_items.join(", ")
        ));
    }
    out
}

/// Accepted shapes for `score --input`.
#[derive(Deserialize)]
#[serde(untagged)]
enum ScoreInput {
    Keyed(BTreeMap<String, ItemScore>),
    List(Vec<ItemScore>),
}

impl ScoreInput {
    fn into_map(self) -> BTreeMap<String, ItemScore> {
        match self {
            Self::Keyed(map) => map,
            Self::List(items) => items
                .into_iter()
                .map(|item| (item.item_id.clone(), item))
                .collect(),
        }
    }
}

fn cmd_score(input: &Path, rubric_items: usize, json: bool) -> Result<()> {
    let summary = score_file(input, rubric_items)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print!("{}", render_summary_text(&summary));
    }
    Ok(())
}

fn score_file(input: &Path, rubric_items: usize) -> Result<ScoreSummary> {
    if rubric_items == 0 {
        anyhow::bail!("--rubric-items must be greater than zero");
    }
    let content = std::fs::read_to_string(input)
        .with_context(|| format!("Failed to read scores file: {:?}", input))?;
    let scores: ScoreInput = serde_json::from_str(&content)
        .with_context(|| format!("Invalid item scores in {:?}", input))?;
    Ok(score_evaluation(&scores.into_map(), rubric_items))
}

fn cmd_config(path: Option<&Path>) -> Result<()> {
    let config = load_config(path)?;
    print!("{}", config.to_toml_string()?);
    Ok(())
}

//! Valkyrie - OSINT run orchestration and pattern synthesis
//!
//! A CLI tool that runs a project's entities through every applicable
//! OSINT tool, records normalized findings, and asks a local Ollama model
//! to synthesize patterns across them.
//!
//! Exit codes:
//!   0 - Success
//!   1 - Runtime error (bad config, unknown project, store failure, etc.)
//!   130 - Interrupted; partial results were saved

mod analysis;
mod cli;
mod config;
mod error;
mod llm;
mod models;
mod orchestrator;
mod registry;
mod report;
mod store;
mod tools;

use analysis::PatternAnalyzer;
use anyhow::{bail, Context, Result};
use chrono::Utc;
use cli::{Args, OutputFormat};
use config::{Config, CONFIG_FILE};
use indicatif::{ProgressBar, ProgressStyle};
use llm::ollama::{OllamaClient, OllamaSettings};
use models::{FindingSummary, ProjectRunSummary, RunCounts, Report, ReportMetadata};
use orchestrator::{Orchestrator, RunOptions};
use registry::ToolRegistry;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use store::{MemoryStore, Store};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse_args();

    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    init_logging(&args);

    info!("Valkyrie v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    match run(args).await {
        Ok(exit_code) => std::process::exit(exit_code),
        Err(e) => {
            error!("Run failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .valkyrie.toml.
fn handle_init_config() -> Result<()> {
    let path = std::path::Path::new(CONFIG_FILE);

    if path.exists() {
        eprintln!("⚠️  {} already exists. Remove it first or edit it manually.", CONFIG_FILE);
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content).with_context(|| format!("Failed to write {}", CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE);
    println!("   Edit it to customize the tool table, worker pool, model, and more.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args) {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level())
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

/// Run the complete workflow. Returns the exit code.
async fn run(args: Args) -> Result<i32> {
    let start_time = Instant::now();

    let mut config = load_config(&args)?;
    config.merge_with_args(&args);

    let registry =
        Arc::new(ToolRegistry::from_config(&config.tools).context("Invalid tool table")?);

    if registry.is_empty() {
        warn!("Tool table is empty; runs will not produce findings");
    }

    if args.list_tools {
        print_tools(&registry);
        return Ok(0);
    }

    let store_path = PathBuf::from(&config.general.store);
    let store = Arc::new(
        MemoryStore::load(&store_path)
            .with_context(|| format!("Failed to open workspace {}", store_path.display()))?,
    );

    // Step 1: Resolve the project and register new entities
    let project_id = resolve_project(&args, &store).await?;
    for spec in &args.add_entity {
        let entity = store.add_entity(project_id, spec.entity_type, spec.value.clone())?;
        println!("➕ Added {} ({})", entity.describe(), entity.id);
    }
    let project = store.get_project(project_id).await?;
    println!("🗂️  Project: {} ({})", project.name, project.id);

    // Step 2: Run the tools
    let mut interrupted = false;
    let run_summary = if args.skip_run {
        info!("Skipping tool run");
        None
    } else {
        let summary = run_tools(&args, &config, &registry, &store, project_id).await?;
        interrupted = summary.cancelled;

        store
            .save(&store_path)
            .with_context(|| format!("Failed to save workspace {}", store_path.display()))?;
        Some(summary)
    };

    // Step 3: Synthesize patterns
    let mut analysis_error = None;
    if args.analyze && !interrupted {
        println!("\n🧠 Synthesizing patterns...");
        println!("   Model: {}", config.analysis.model);
        println!("   Ollama: {}", config.analysis.ollama_url);

        let reasoning = Arc::new(OllamaClient::new(OllamaSettings::from(&config.analysis)));
        let analyzer = PatternAnalyzer::new(store.clone(), reasoning, &config.analysis);

        let spinner = spinner(&args, "Waiting for the model...");
        match analyzer.analyze(project_id).await {
            Ok(patterns) => {
                spinner.finish_and_clear();
                println!("   {} patterns synthesized", patterns.len());
            }
            Err(e) => {
                spinner.finish_and_clear();
                debug!("Pattern analysis failed: {:?}", e);
                eprintln!("   ⚠️  Pattern analysis failed: {}", e);
                analysis_error = Some(e.to_string());
            }
        }

        store
            .save(&store_path)
            .with_context(|| format!("Failed to save workspace {}", store_path.display()))?;
    }

    // Step 4: Build the report
    println!("\n📝 Generating report...");

    let entities = store.list_entities(project_id, true).await?;
    let findings = store.list_findings(project_id).await?;
    let patterns = store.list_patterns(project_id).await?;
    let summary = FindingSummary::from_findings(&findings);

    let report = Report {
        metadata: ReportMetadata {
            project_id,
            project_name: project.name.clone(),
            generated_at: Utc::now(),
            model_used: args.analyze.then(|| config.analysis.model.clone()),
            entities: entities.len(),
            total_findings: findings.len(),
            duration_seconds: start_time.elapsed().as_secs_f64(),
        },
        entities,
        run: run_summary.clone(),
        summary: summary.clone(),
        findings,
        patterns,
        analysis_error,
    };

    let output = match args.format {
        OutputFormat::Json => report::generate_json_report(&report)?,
        OutputFormat::Markdown => report::generate_markdown_report(&report),
    };

    let output_path = output_path(&args, &config);
    std::fs::write(&output_path, &output)
        .with_context(|| format!("Failed to write report to {}", output_path.display()))?;

    // Print summary
    println!("\n📊 Summary:");
    if let Some(ref run) = run_summary {
        let t = &run.totals;
        println!(
            "   Invocations: {} | ✅ {} | ❌ {} | ⏱️ {} | ⏭️ {}",
            t.total(),
            t.success,
            t.failure,
            t.timeout,
            t.skipped
        );
    }
    println!("   Total findings: {}", summary.total);
    println!(
        "   - 🔴 Critical: {} | 🟠 High: {} | 🟡 Medium: {} | 🟢 Low: {} | ⚪ Info: {}",
        summary.critical, summary.high, summary.medium, summary.low, summary.info
    );
    println!("   Patterns: {}", report.patterns.len());
    println!("   Duration: {:.1}s", report.metadata.duration_seconds);

    if interrupted {
        println!(
            "\n⛔ Interrupted. Partial results saved; report written to: {}",
            output_path.display()
        );
        return Ok(130);
    }

    println!("\n✅ Done! Report saved to: {}", output_path.display());
    Ok(0)
}

/// Find or create the project this invocation works on.
async fn resolve_project(args: &Args, store: &MemoryStore) -> Result<Uuid> {
    if let Some(ref name) = args.new_project {
        let project = store.add_project(name.clone())?;
        println!("🆕 Created project '{}' ({})", project.name, project.id);
        return Ok(project.id);
    }

    if let Some(project_id) = args.project {
        return Ok(project_id);
    }

    if let Some(entity_id) = args.entity {
        let entity = store
            .get_entity(entity_id)
            .await
            .with_context(|| format!("Unknown entity {}", entity_id))?;
        return Ok(entity.project_id);
    }

    bail!("No project selected")
}

/// Run one entity or the whole project, with Ctrl-C cancelling what has
/// not started yet.
async fn run_tools(
    args: &Args,
    config: &Config,
    registry: &Arc<ToolRegistry>,
    store: &Arc<MemoryStore>,
    project_id: Uuid,
) -> Result<ProjectRunSummary> {
    let options = RunOptions::from(&config.orchestrator);

    println!("\n🔎 Running tools...");
    println!("   Tools registered: {}", registry.len());
    println!("   Worker pool: {}", options.worker_pool);
    println!("   Default timeout: {}s", options.default_timeout.as_secs());
    if options.include_premium {
        println!("   Premium tools: enabled");
    }

    let orchestrator = Orchestrator::new(Arc::clone(registry), store.clone(), options);

    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\n⚠️  Interrupt received, finishing in-flight tools...");
                cancel.cancel();
            }
        })
    };

    let spinner = spinner(args, "Collecting...");
    let result = match args.entity {
        Some(entity_id) => {
            let started_at = Utc::now();
            let start = Instant::now();
            orchestrator
                .run_entity_by_id(entity_id, &cancel)
                .await
                .map(|summary| {
                    let mut totals = RunCounts::default();
                    totals.merge(&summary.counts);
                    ProjectRunSummary {
                        project_id,
                        started_at,
                        duration_ms: start.elapsed().as_millis() as u64,
                        entities: vec![summary],
                        totals,
                        cancelled: cancel.is_cancelled(),
                    }
                })
        }
        None => orchestrator.run_project(project_id, &cancel).await,
    };
    spinner.finish_and_clear();
    watcher.abort();

    let summary = result.context("Run failed")?;
    for entity in &summary.entities {
        let c = &entity.counts;
        println!(
            "   {} {}: {} tools, {} findings ({} failed, {} timed out, {} skipped)",
            entity.entity_type,
            entity.entity_value,
            c.total(),
            entity.finding_ids.len(),
            c.failure,
            c.timeout,
            c.skipped
        );
    }
    Ok(summary)
}

/// Print the tool table for --list-tools.
fn print_tools(registry: &ToolRegistry) {
    println!("🧰 {} tools registered:\n", registry.len());
    for tool in registry.tools() {
        let d = tool.descriptor();
        let types: Vec<String> = d
            .supported_entity_types
            .iter()
            .map(ToString::to_string)
            .collect();
        let mut flags = Vec::new();
        if d.premium_only {
            flags.push("premium");
        }
        if d.idempotent {
            flags.push("retryable");
        }
        println!(
            "   {:<22} {:<12} [{}]{}",
            d.name,
            d.category,
            types.join(", "),
            if flags.is_empty() {
                String::new()
            } else {
                format!(" ({})", flags.join(", "))
            }
        );
    }
}

/// A spinner, hidden in quiet mode.
fn spinner(args: &Args, message: &str) -> ProgressBar {
    if args.quiet {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("   {spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

/// Where the report goes; JSON output gets a .json extension by default.
fn output_path(args: &Args, config: &Config) -> PathBuf {
    if let Some(ref output) = args.output {
        return output.clone();
    }

    let path = PathBuf::from(&config.general.output);
    match args.format {
        OutputFormat::Json => path.with_extension("json"),
        OutputFormat::Markdown => path,
    }
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", CONFIG_FILE);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {}", e);
            Ok(Config::default())
        }
    }
}

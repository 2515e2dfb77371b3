use codepal::agent::AgentStatus;
use codepal::cli::{Cli, Commands, ConfigAction};
use codepal::config::{Config, ConfigValidator};
use codepal::engine::Engine;
use codepal::error::{CodePalError, Result};
use codepal::indexer::IndexOrigin;
use codepal::session::ConversationHistory;
use codepal::storage::format_size;
use std::path::{Path, PathBuf};

#[tokio::main]
async fn main() {
    let cli = Cli::parse_args();

    // Initialize logging
    init_logging(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Index { repo, force } => {
            let config = load_config(cli.config)?;
            cmd_index(&repo, config, force).await?;
        }
        Commands::Search {
            repo,
            query,
            k,
            json,
        } => {
            let config = load_config(cli.config)?;
            cmd_search(&repo, config, &query, k, json).await?;
        }
        Commands::Ask {
            repo,
            question,
            history,
            transcript,
            json,
            offline,
        } => {
            let config = load_config(cli.config)?;
            cmd_ask(&repo, config, &question, history, transcript, json, offline).await?;
        }
        Commands::Config { action } => {
            cmd_config(cli.config, action)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "codepal=debug" } else { "codepal=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn cmd_index(repo: &Path, config: Config, force: bool) -> Result<()> {
    let engine = Engine::open(repo, config)?;
    let handle = engine.index(force).await?;
    let report = &handle.report;

    match handle.origin {
        IndexOrigin::Loaded => println!(
            "✓ Index is current: {} chunks from {} files",
            handle.index.len(),
            handle.index.file_count()
        ),
        IndexOrigin::Built if handle.index.is_empty() => {
            println!("⚠ No indexable content found in {}", engine.repository().root().display())
        }
        IndexOrigin::Built => println!(
            "✓ Built index: {} chunks from {} of {} files in {} ms",
            report.chunk_count, report.files_indexed, report.files_seen, report.duration_ms
        ),
    }

    for skipped in &report.skipped {
        println!("  skipped {}: {}", skipped.path, skipped.reason);
    }
    println!("  Fingerprint: {}", &handle.fingerprint[..handle.fingerprint.len().min(16)]);
    if let Some(store) = engine.indexer().store() {
        let root = engine.repository().root();
        if report.persisted {
            println!(
                "  Stored at: {} ({})",
                store.dir_for(root).display(),
                format_size(store.stored_size(root))
            );
        }
    }

    Ok(())
}

async fn cmd_search(repo: &Path, config: Config, query: &str, k: usize, json: bool) -> Result<()> {
    let engine = Engine::open(repo, config)?;
    let results = engine.search(query, k).await?;

    if json {
        println!("{}", to_json(&results, "search results")?);
        return Ok(());
    }
    if results.is_empty() {
        println!("No results (is the repository empty?)");
        return Ok(());
    }
    for (rank, result) in results.iter().enumerate() {
        println!(
            "{}. {}:{}-{} (distance {:.4})",
            rank + 1,
            result.path,
            result.start_line,
            result.end_line,
            result.distance
        );
        for line in result.text.lines().take(3) {
            println!("     {}", line);
        }
    }
    Ok(())
}

async fn cmd_ask(
    repo: &Path,
    mut config: Config,
    question: &str,
    history_path: Option<PathBuf>,
    show_transcript: bool,
    json: bool,
    offline: bool,
) -> Result<()> {
    if offline {
        config.llm.provider = "offline".to_string();
    }
    let engine = Engine::open(repo, config)?;

    let history = match &history_path {
        Some(path) => ConversationHistory::load_or_new(path)?,
        None => ConversationHistory::new(),
    };
    let response = engine.ask(question, history).await?;

    if let Some(path) = &history_path {
        response.history.save(path)?;
    }

    if json {
        println!("{}", to_json(&response, "response")?);
    } else {
        if show_transcript {
            for inv in &response.transcript {
                let marker = if inv.result.is_error() { "✗" } else { "✓" };
                println!(
                    "{} step {}: {} {} ({} ms)",
                    marker, inv.step, inv.tool_name, inv.arguments, inv.duration_ms
                );
            }
            if !response.transcript.is_empty() {
                println!();
            }
        }
        println!("{}", response.answer);
    }

    if response.status == AgentStatus::Failed {
        std::process::exit(2);
    }
    Ok(())
}

fn cmd_config(config_path: Option<PathBuf>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show { section } => {
            let config = load_config(config_path)?;
            let value = serde_json::to_value(&config).map_err(|e| CodePalError::Json {
                source: e,
                context: "Failed to serialize config".to_string(),
            })?;

            let shown = match section {
                Some(section) => value.get(&section).cloned().ok_or_else(|| {
                    CodePalError::Config(format!("Unknown configuration section: {}", section))
                })?,
                None => value,
            };
            println!("{}", to_json(&shown, "config")?);
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            // Create parent directory
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| CodePalError::Io {
                    source: e,
                    context: format!("Failed to create config directory: {:?}", parent),
                })?;
            }

            let config = Config::default();
            config.save(&path)?;

            println!("✓ Configuration initialized at: {}", path.display());
        }
    }

    Ok(())
}

/// Explicit paths must exist; the default location falls back to defaults
fn load_config(config_path: Option<PathBuf>) -> Result<Config> {
    if let Some(path) = config_path {
        return Config::load(&path);
    }

    let path = Config::default_path()?;
    if path.exists() {
        return Config::load(&path);
    }

    tracing::debug!("Config file not found, using defaults. Run 'codepal config init' to create one.");
    let mut config = Config::default();
    config.apply_env_overrides();
    ConfigValidator::validate(&config)?;
    Ok(config)
}

fn to_json<T: serde::Serialize>(value: &T, what: &str) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|e| CodePalError::Json {
        source: e,
        context: format!("Failed to serialize {}", what),
    })
}

//! stkr: encrypted sticker pack downloader
//!
//! Commands:
//!   add <url> [--name]   - add a pack from its share link and download it
//!   preview <url>        - show a pack's title and stickers without adding it
//!   sync                 - (re)load every configured pack
//!   list                 - configured packs and how much of each is cached
//!   show <pack_id>       - stickers of one pack with their cached files
//!   remove <pack_id>     - forget a pack and delete its cached files
//!   clear-cache          - delete every cached pack
//!   doctor               - check CDN reachability and the cache directory
//!   config show          - display the effective configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use stkr_core::config::{expand_tilde, StkrConfig};
use stkr_core::PackReference;
use stkr_fetch::CdnClient;
use stkr_sync::{LoadOutcome, LoadReport, StickerEngine};
use tracing::{debug, info};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "stkr",
    version,
    about = "Encrypted sticker pack downloader",
    long_about = "stkr: fetch, decrypt and cache sticker packs from their share links"
)]
struct Cli {
    /// Path to the stkr configuration file
    #[arg(
        long,
        short = 'c',
        env = "STKR_CONFIG",
        default_value = "~/.config/stkr/config.toml"
    )]
    config: PathBuf,

    /// Log level or filter (overrides config `log.level`; RUST_LOG wins over both)
    #[arg(long, env = "STKR_LOG")]
    log: Option<String>,

    /// Log format (overrides config `log.format`)
    #[arg(long, env = "STKR_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Add a pack from its share link and download it
    Add {
        /// Share link containing pack_id=...&pack_key=...
        url: String,
        /// Display name for the pack
        #[arg(long, short = 'n')]
        name: Option<String>,
    },

    /// Show a pack's title, author and stickers without adding it
    Preview {
        /// Share link containing pack_id=...&pack_key=...
        url: String,
    },

    /// Load every configured pack
    Sync,

    /// List configured packs
    List,

    /// Show the stickers of one pack
    Show {
        pack_id: String,
    },

    /// Forget a pack and delete its cached files
    Remove {
        pack_id: String,
    },

    /// Delete every cached pack (configured packs are kept)
    #[command(name = "clear-cache")]
    ClearCache,

    /// Check CDN reachability, the cache directory and configured packs
    Doctor,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = expand_tilde(&cli.config);
    let config = StkrConfig::load(&config_path)
        .with_context(|| format!("loading config: {}", config_path.display()))?;

    let level = cli.log.clone().unwrap_or_else(|| config.log.level.clone());
    let format = cli.log_format.clone().unwrap_or_else(|| {
        if config.log.format.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    });
    init_logging(&level, &format);
    debug!(config = %config_path.display(), "stkr starting");

    match cli.command {
        Commands::Add { url, name } => cmd_add(config, &config_path, &url, name, cli.json).await,
        Commands::Preview { url } => cmd_preview(&config, &url, cli.json).await,
        Commands::Sync => cmd_sync(&config, cli.json).await,
        Commands::List => cmd_list(&config, cli.json).await,
        Commands::Show { pack_id } => cmd_show(&config, &pack_id, cli.json).await,
        Commands::Remove { pack_id } => cmd_remove(config, &config_path, &pack_id).await,
        Commands::ClearCache => cmd_clear_cache(&config).await,
        Commands::Doctor => cmd_doctor(&config).await,
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &config_path),
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn build_engine(config: &StkrConfig) -> Result<StickerEngine> {
    StickerEngine::from_config(config).context("setting up sticker engine")
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("serializing output")?
    );
    Ok(())
}

fn print_report(report: &LoadReport) {
    if report.placeholder {
        println!(
            "  {}  {}  placeholder ({} emoji, pack unavailable)",
            report.pack_id, report.title, report.stickers_total
        );
        return;
    }
    let mut line = format!(
        "  {}  {}  {}/{} stickers",
        report.pack_id,
        report.title,
        report.stickers_cached + report.stickers_fetched,
        report.stickers_total
    );
    if report.stickers_fetched > 0 {
        line.push_str(&format!(", {} downloaded", report.stickers_fetched));
    }
    if report.stickers_failed > 0 {
        line.push_str(&format!(", {} failed", report.stickers_failed));
    }
    println!("{line}");
}

fn print_outcome(pack_id: &str, outcome: &LoadOutcome) {
    match outcome {
        LoadOutcome::Loaded(report) => print_report(report),
        LoadOutcome::InFlight => println!("  {pack_id}  already loading"),
        LoadOutcome::Cancelled => println!("  {pack_id}  cancelled"),
    }
}

// ── `stkr add` ────────────────────────────────────────────────────────────────

async fn cmd_add(
    mut config: StkrConfig,
    config_path: &Path,
    url: &str,
    name: Option<String>,
    json: bool,
) -> Result<()> {
    let engine = build_engine(&config)?;
    let (reference, outcome) = engine
        .add_pack_from_url(url, name.clone())
        .await
        .context("adding pack")?;

    let added = config.upsert_pack(&reference, name);
    config
        .save(config_path)
        .with_context(|| format!("saving config: {}", config_path.display()))?;
    info!(pack_id = %reference.pack_id, added, "pack saved to config");

    if json {
        if let LoadOutcome::Loaded(report) = &outcome {
            return print_json(report);
        }
    }
    println!(
        "{} pack {}",
        if added { "Added" } else { "Updated" },
        reference.pack_id
    );
    print_outcome(&reference.pack_id, &outcome);
    Ok(())
}

// ── `stkr preview` ────────────────────────────────────────────────────────────

async fn cmd_preview(config: &StkrConfig, url: &str, json: bool) -> Result<()> {
    let engine = build_engine(config)?;
    let Some(preview) = engine.preview_pack(url).await.context("previewing pack")? else {
        anyhow::bail!("pack manifest could not be fetched or decoded");
    };

    if json {
        return print_json(&serde_json::json!({
            "pack_id": preview.reference.pack_id,
            "manifest": preview.manifest,
            "already_exists": preview.already_exists,
        }));
    }

    let m = &preview.manifest;
    println!("Title:    {}", m.title);
    println!("Author:   {}", if m.author.is_empty() { "-" } else { m.author.as_str() });
    println!("Stickers: {}", m.stickers.len());
    let emoji: Vec<&str> = m.stickers.iter().map(|s| s.emoji.as_str()).collect();
    println!("          {}", emoji.join(" "));
    if preview.already_exists {
        println!("(already added)");
    }
    Ok(())
}

// ── `stkr sync` ───────────────────────────────────────────────────────────────

async fn cmd_sync(config: &StkrConfig, json: bool) -> Result<()> {
    if config.packs.is_empty() {
        println!("No packs configured. Add one with: stkr add <share-url>");
        return Ok(());
    }

    let engine = build_engine(config)?;
    let references: Vec<PackReference> = config
        .packs
        .iter()
        .map(|p| p.reference())
        .collect::<Result<_, _>>()
        .context("invalid pack in config")?;

    let results =
        futures::future::join_all(references.iter().map(|r| engine.load_pack(r))).await;

    let mut reports = Vec::new();
    let mut failures = 0usize;
    for (reference, result) in references.iter().zip(results) {
        match result {
            Ok(outcome) => {
                if !json {
                    print_outcome(&reference.pack_id, &outcome);
                }
                if let LoadOutcome::Loaded(report) = outcome {
                    reports.push(report);
                }
            }
            Err(e) => {
                failures += 1;
                eprintln!("  {}  error: {e}", reference.pack_id);
            }
        }
    }

    if json {
        print_json(&reports)?;
    }
    if failures > 0 {
        anyhow::bail!("{failures} pack(s) could not be loaded");
    }
    Ok(())
}

// ── `stkr list` ───────────────────────────────────────────────────────────────

async fn cmd_list(config: &StkrConfig, json: bool) -> Result<()> {
    let engine = build_engine(config)?;
    let cache = engine.cache();

    let mut rows = Vec::new();
    for entry in &config.packs {
        let manifest = cache.load_manifest(&entry.pack_id).await;
        let (title, total, placeholder) = match &manifest {
            Some(m) => (m.title.clone(), m.stickers.len(), m.placeholder),
            None => (String::new(), 0, false),
        };
        let mut cached = 0usize;
        if let Some(m) = &manifest {
            for sticker in &m.stickers {
                if cache.has_sticker(&entry.pack_id, sticker.id).await {
                    cached += 1;
                }
            }
        }
        rows.push(serde_json::json!({
            "pack_id": entry.pack_id,
            "name": entry.name,
            "title": title,
            "stickers_total": total,
            "stickers_cached": cached,
            "placeholder": placeholder,
        }));

        if !json {
            let label = entry.name.as_deref().unwrap_or(title.as_str());
            let state = match &manifest {
                None => "not downloaded".to_string(),
                Some(_) if placeholder => "placeholder".to_string(),
                Some(_) => format!("{cached}/{total} cached"),
            };
            println!("  {}  {}  {}", entry.pack_id, label, state);
        }
    }

    if json {
        print_json(&rows)?;
    } else if rows.is_empty() {
        println!("No packs configured.");
    }
    Ok(())
}

// ── `stkr show` ───────────────────────────────────────────────────────────────

async fn cmd_show(config: &StkrConfig, pack_id: &str, json: bool) -> Result<()> {
    let pack_id = pack_id.to_ascii_lowercase();
    let entry = config
        .packs
        .iter()
        .find(|p| p.pack_id.eq_ignore_ascii_case(&pack_id))
        .with_context(|| format!("pack {pack_id} is not configured"))?;

    let engine = build_engine(config)?;
    let outcome = engine
        .load_pack(&entry.reference()?)
        .await
        .context("loading pack")?;
    let assets = engine.get_pack_assets(&entry.reference()?.pack_id);

    if json {
        return print_json(&assets);
    }

    print_outcome(&pack_id, &outcome);
    for asset in &assets {
        let path = asset
            .image_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "-".into());
        println!(
            "  {:>3}  {}  {:<4}  {}",
            asset.sticker_id, asset.emoji, asset.format, path
        );
    }
    Ok(())
}

// ── `stkr remove` ─────────────────────────────────────────────────────────────

async fn cmd_remove(mut config: StkrConfig, config_path: &Path, pack_id: &str) -> Result<()> {
    let pack_id = pack_id.to_ascii_lowercase();
    let in_config = config.remove_pack(&pack_id);
    if in_config {
        config
            .save(config_path)
            .with_context(|| format!("saving config: {}", config_path.display()))?;
    }

    let engine = build_engine(&config)?;
    let on_disk = engine
        .remove_pack(&pack_id)
        .await
        .context("removing cached pack")?;

    if in_config || on_disk {
        println!("Removed pack {pack_id}");
    } else {
        println!("Pack {pack_id} not found");
    }
    Ok(())
}

// ── `stkr clear-cache` ────────────────────────────────────────────────────────

async fn cmd_clear_cache(config: &StkrConfig) -> Result<()> {
    let engine = build_engine(config)?;
    let removed = engine.clear_cache().await.context("clearing cache")?;
    println!(
        "Removed {removed} cached pack(s) from {}",
        engine.cache().root().display()
    );
    Ok(())
}

// ── `stkr doctor` ─────────────────────────────────────────────────────────────

async fn cmd_doctor(config: &StkrConfig) -> Result<()> {
    let mut problems = 0usize;

    let client = CdnClient::new(&config.cdn).context("building CDN client")?;
    match stkr_fetch::check_reachable(&client).await {
        Ok(status) => println!("  ok    CDN {} (HTTP {status})", client.base_url()),
        Err(e) => {
            problems += 1;
            println!("  FAIL  CDN {}: {e}", client.base_url());
        }
    }

    let cache_dir = config.cache_dir();
    match tokio::fs::create_dir_all(&cache_dir).await {
        Ok(()) => {
            let probe = cache_dir.join(".stkr-doctor");
            match tokio::fs::write(&probe, b"ok").await {
                Ok(()) => {
                    let _ = tokio::fs::remove_file(&probe).await;
                    println!("  ok    cache {}", cache_dir.display());
                }
                Err(e) => {
                    problems += 1;
                    println!("  FAIL  cache {} not writable: {e}", cache_dir.display());
                }
            }
        }
        Err(e) => {
            problems += 1;
            println!("  FAIL  cache {}: {e}", cache_dir.display());
        }
    }

    for entry in &config.packs {
        let valid = entry
            .reference()
            .and_then(|r| stkr_crypto::parse_pack_key(&r.pack_key).map(|_| ()));
        match valid {
            Ok(()) => println!("  ok    pack {}", entry.pack_id),
            Err(e) => {
                problems += 1;
                println!("  FAIL  pack {}: {e}", entry.pack_id);
            }
        }
    }

    if problems > 0 {
        anyhow::bail!("{problems} problem(s) found");
    }
    Ok(())
}

// ── `stkr config show` ────────────────────────────────────────────────────────

fn cmd_config_show(config: &StkrConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!(
            "# Configuration: defaults (no file at {})",
            config_path.display()
        );
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

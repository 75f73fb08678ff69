//! rimline - research information metadata harvesting and matching
//!
//! Harvests works and authors from OpenAlex, an OAI-PMH repository and
//! per-DOI lookup services into a local document store, then links
//! repository records to the OpenAlex graph.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rimline_core::Shutdown;

mod cmd;
mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "rimline")]
#[command(about = "Harvest research metadata and match it against the OpenAlex graph")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Config file path (default: ./rimline.toml or ~/.config/rimline/config.toml)
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    /// Maximum concurrent item fetches per harvester
    #[arg(long, global = true)]
    max_at_once: Option<usize>,

    /// Maximum item starts per second per harvester (0 = unlimited)
    #[arg(long, global = true)]
    max_per_second: Option<u32>,
}

#[derive(Subcommand)]
enum Command {
    /// Harvest records into the store
    Harvest(cmd::harvest::HarvestArgs),
    /// Link repository records to graph records
    Match(cmd::matching::MatchArgs),
    /// Show per-collection document counts
    Status,
    /// Show current configuration
    Config,
}

/// Route SIGINT/SIGTERM to the shutdown flag. A second signal exits at once.
fn install_signal_handler(shutdown: &Shutdown) -> Result<()> {
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        let flag = shutdown.flag();
        // SAFETY: the handler only touches an atomic and calls exit
        unsafe {
            signal_hook::low_level::register(signal, move || {
                if flag.swap(true, Ordering::SeqCst) {
                    std::process::exit(130);
                }
            })
        }
        .context("Failed to register signal handler")?;
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let command = cli.command;

    // Progress context (TTY auto-detect)
    let progress = Arc::new(rimline_core::ProgressContext::new());

    // Logging:
    //   TTY:     quiet (warn) unless --debug, progress bars show activity
    //   non-TTY: info unless --debug, logs are the only progress indicator
    let is_tty = progress.is_tty();
    let multi = if is_tty { Some(progress.multi()) } else { None };
    let quiet = if is_tty { !cli.debug } else { false };
    rimline_core::init_logging(quiet, cli.debug, multi).context("Failed to initialize logging")?;

    // Load configuration
    let mut config = if let Some(path) = cli.config {
        Config::from_file(&path)?
    } else {
        Config::load()?
    };

    // CLI overrides
    if let Some(n) = cli.max_at_once {
        config.throttle.max_at_once = n;
    }
    if let Some(n) = cli.max_per_second {
        config.throttle.max_per_second = n;
    }

    if let Command::Config = command {
        print_config(&config);
        return Ok(());
    }

    let shutdown = Shutdown::new();
    install_signal_handler(&shutdown)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    runtime.block_on(async move {
        let ctx = cmd::Context::open(config, progress, shutdown).await?;
        match command {
            Command::Harvest(args) => cmd::harvest::run(args, &ctx).await,
            Command::Match(args) => cmd::matching::run(args, &ctx).await,
            Command::Status => cmd::status::run(&ctx).await,
            Command::Config => Ok(()),
        }
    })
}

fn print_config(config: &Config) {
    use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Setting").fg(Color::Cyan),
            Cell::new("Value").fg(Color::Cyan),
        ]);

    let list = |items: &[String]| {
        if items.is_empty() {
            "-".to_string()
        } else {
            items.join(", ")
        }
    };

    table.add_row(vec!["Store directory", &config.store.dir.display().to_string()]);
    table.add_row(vec![
        "Throttle",
        &format!(
            "{} at once, {}/s, flush every {}",
            config.throttle.max_at_once, config.throttle.max_per_second, config.throttle.flush_size
        ),
    ]);
    table.add_row(vec!["Request timeout", &format!("{}s", config.http.timeout)]);
    table.add_row(vec![
        "Max retries",
        &format!(
            "{} (base delay {}ms)",
            config.http.max_retries, config.http.retry_base_delay_ms
        ),
    ]);
    table.add_row(vec!["OA base URL", &config.openalex.base_url]);
    table.add_row(vec![
        "OA mailto",
        config.openalex.mailto.as_deref().unwrap_or("not set"),
    ]);
    table.add_row(vec![
        "OA API key",
        if config.openalex.api_key.is_some() {
            "configured"
        } else {
            "not set"
        },
    ]);
    table.add_row(vec!["OA institutions", &list(&config.openalex.institutions)]);
    let years: Vec<String> = config.openalex.years.iter().map(|y| y.to_string()).collect();
    table.add_row(vec!["OA years", &list(&years)]);
    table.add_row(vec![
        "OAI base URL",
        if config.oai.base_url.is_empty() {
            "not set"
        } else {
            config.oai.base_url.as_str()
        },
    ]);
    table.add_row(vec!["OAI sets", &list(&config.oai.sets)]);
    for lookup in &config.lookups {
        let auth = if lookup.auth.is_some() { " (oauth)" } else { "" };
        table.add_row(vec![
            format!("Lookup {}", lookup.name).as_str(),
            &format!("{}{auth}", lookup.base_url),
        ]);
    }
    table.add_row(vec![
        "Name threshold",
        &format!("{:.2}", config.matching.name_threshold),
    ]);
    table.add_row(vec![
        "Ambiguous surnames",
        &config.matching.ambiguous_surnames.len().to_string(),
    ]);
    table.add_row(vec!["Backfill", &config.matching.backfill.to_string()]);

    eprintln!("\n{table}");
}

//! Subcommands and the per-process context they share

pub mod harvest;
pub mod matching;
pub mod status;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use rimline_core::{
    GraphBackfill, HarvestSummary, Harvester, HttpTransport, NoBackfill, ReqwestTransport,
    SharedProgress, Shutdown, fmt_num,
};
use rimline_openalex::{OpenAlexBackfill, OpenAlexClient};
use rimline_store::{DocumentStore, JsonlStore};

use crate::config::Config;

/// Store, transport and settings for one invocation.
pub struct Context {
    pub config: Config,
    pub progress: SharedProgress,
    pub shutdown: Shutdown,
    pub store: Arc<dyn DocumentStore>,
    pub transport: Arc<dyn HttpTransport>,
}

impl Context {
    pub async fn open(config: Config, progress: SharedProgress, shutdown: Shutdown) -> Result<Self> {
        let store = JsonlStore::open(&config.store.dir)
            .await
            .with_context(|| format!("Failed to open store at {}", config.store.dir.display()))?;
        let transport = ReqwestTransport::new(
            Duration::from_secs(config.http.timeout),
            &config.http.user_agent,
        )?;
        log::debug!("Store: {}", config.store.dir.display());
        Ok(Self {
            config,
            progress,
            shutdown,
            store: Arc::new(store),
            transport: Arc::new(transport),
        })
    }

    /// A harvester wired to this process's store, limits, shutdown flag and bars.
    pub fn harvester(&self) -> Harvester {
        Harvester::new(Arc::clone(&self.store), self.config.harvest_settings())
            .with_shutdown(self.shutdown.clone())
            .with_progress(Arc::clone(&self.progress))
    }

    pub fn openalex(&self) -> Arc<OpenAlexClient> {
        Arc::new(OpenAlexClient::new(
            Arc::clone(&self.transport),
            self.config.openalex_settings(),
        ))
    }

    pub fn backfill(&self, enabled: bool) -> Arc<dyn GraphBackfill> {
        if enabled {
            Arc::new(OpenAlexBackfill::new(self.openalex(), self.harvester()))
        } else {
            Arc::new(NoBackfill)
        }
    }
}

/// Print a key-value summary table on stderr
pub fn print_summary(title: &str, rows: &[(&str, String)]) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new(title).fg(Color::Cyan),
            Cell::new("Value").fg(Color::Cyan),
        ]);
    for (label, value) in rows {
        table.add_row(vec![Cell::new(label), Cell::new(value)]);
    }
    eprintln!("\n{table}");
}

pub fn print_harvest(summary: &HarvestSummary) {
    let mut rows = vec![
        ("Collection", summary.collection.clone()),
        ("State", format!("{:?}", summary.state)),
        (
            "Items",
            format!(
                "{}/{} fetched ({} skipped, {} stubbed)",
                fmt_num(summary.fetched),
                fmt_num(summary.items),
                fmt_num(summary.skipped),
                fmt_num(summary.stubbed)
            ),
        ),
        (
            "Records",
            format!(
                "{} ({} new, {} updated)",
                fmt_num(summary.records),
                fmt_num(summary.new_keys),
                fmt_num(summary.updated_keys)
            ),
        ),
        ("Time", format!("{:.1}s", summary.elapsed.as_secs_f64())),
    ];
    if summary.interrupted {
        rows.push(("Interrupted", "yes".to_string()));
    }
    print_summary(&summary.name, &rows);
}

//! Status subcommand - per-collection document counts

use anyhow::Result;
use comfy_table::{Cell, CellAlignment, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use rimline_core::fmt_num;
use rimline_store::{DocumentStore, Filter};

use super::Context;

/// Marker field of stub documents written for permanent lookup misses.
const STUB_FIELD: &str = "_stub";

#[derive(Debug, Clone, PartialEq, Eq)]
struct CollectionStatus {
    name: String,
    documents: usize,
    stubs: usize,
}

async fn collect(store: &dyn DocumentStore) -> Result<Vec<CollectionStatus>> {
    let mut out = Vec::new();
    for name in store.collections().await? {
        let documents = store.count(&name).await?;
        let stubs = store
            .find_many(&name, &Filter::all().exists(STUB_FIELD), &[STUB_FIELD])
            .await?
            .len();
        out.push(CollectionStatus {
            name,
            documents,
            stubs,
        });
    }
    Ok(out)
}

pub async fn run(ctx: &Context) -> Result<()> {
    let statuses = collect(ctx.store.as_ref()).await?;
    if statuses.is_empty() {
        eprintln!("Store at {} is empty", ctx.config.store.dir.display());
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Collection").fg(Color::Cyan),
            Cell::new("Documents").fg(Color::Cyan),
            Cell::new("Stubs").fg(Color::Cyan),
        ]);
    for status in &statuses {
        table.add_row(vec![
            Cell::new(&status.name),
            Cell::new(fmt_num(status.documents)).set_alignment(CellAlignment::Right),
            Cell::new(fmt_num(status.stubs)).set_alignment(CellAlignment::Right),
        ]);
    }
    eprintln!("\n{table}");
    Ok(())
}

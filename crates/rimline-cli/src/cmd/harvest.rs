//! Harvest subcommand - fetch records into the store

use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::{Args, Subcommand, ValueEnum};
use futures_util::future::join_all;
use rimline_core::{HarvestSummary, normalize_doi};
use rimline_openalex::{Entity, IdType, OpenAlexHarvest, id_queries};
use rimline_sources::{LookupHarvest, OaiHarvest};

use super::{Context, print_harvest};
use crate::config::LookupConfig;

#[derive(Args, Debug)]
pub struct HarvestArgs {
    #[command(subcommand)]
    pub source: HarvestSource,
}

#[derive(Subcommand, Debug)]
pub enum HarvestSource {
    /// Harvest OpenAlex entities (works by institution and year, others
    /// derived from stored works)
    Openalex(OpenAlexArgs),
    /// Harvest an OAI-PMH repository
    Oai(OaiArgs),
    /// Run per-DOI lookups for stored works
    Lookup(LookupArgs),
    /// Works, derived entities, repository and lookups in order
    All(AllArgs),
}

#[derive(Args, Debug)]
pub struct OpenAlexArgs {
    /// Entity type to harvest
    #[arg(short, long, value_enum, default_value = "works")]
    pub entity: OpenAlexEntity,

    /// Explicit identifiers instead of the default item list (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub ids: Vec<String>,

    /// Kind of identifier passed to --ids
    #[arg(long, value_parser = parse_id_type, default_value = "openalex")]
    pub id_type: IdType,
}

#[derive(Args, Debug)]
pub struct OaiArgs {
    /// Restrict to these sets (comma-separated, overrides config)
    #[arg(long, value_delimiter = ',')]
    pub set: Vec<String>,

    /// Lower datestamp bound (YYYY-MM-DD, overrides config)
    #[arg(long)]
    pub from: Option<String>,
}

#[derive(Args, Debug)]
pub struct LookupArgs {
    /// Configured lookup to run (default: all)
    pub name: Option<String>,

    /// Look up these DOIs instead of the stored works (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub doi: Vec<String>,
}

#[derive(Args, Debug)]
pub struct AllArgs {
    /// Skip the OAI-PMH repository
    #[arg(long)]
    pub no_oai: bool,

    /// Skip the per-DOI lookups
    #[arg(long)]
    pub no_lookups: bool,
}

#[derive(Clone, ValueEnum, Debug)]
pub enum OpenAlexEntity {
    Works,
    Authors,
    Sources,
    Institutions,
    Publishers,
    Topics,
    Funders,
}

impl From<OpenAlexEntity> for Entity {
    fn from(e: OpenAlexEntity) -> Self {
        match e {
            OpenAlexEntity::Works => Entity::Works,
            OpenAlexEntity::Authors => Entity::Authors,
            OpenAlexEntity::Sources => Entity::Sources,
            OpenAlexEntity::Institutions => Entity::Institutions,
            OpenAlexEntity::Publishers => Entity::Publishers,
            OpenAlexEntity::Topics => Entity::Topics,
            OpenAlexEntity::Funders => Entity::Funders,
        }
    }
}

fn parse_id_type(s: &str) -> Result<IdType, String> {
    IdType::from_name(s).ok_or_else(|| format!("Unknown id type: {s} (openalex, doi, orcid, ror)"))
}

pub async fn run(args: HarvestArgs, ctx: &Context) -> Result<()> {
    match args.source {
        HarvestSource::Openalex(oa_args) => harvest_openalex(oa_args, ctx).await,
        HarvestSource::Oai(oai_args) => harvest_oai(oai_args, ctx).await,
        HarvestSource::Lookup(lookup_args) => harvest_lookups(lookup_args, ctx).await,
        HarvestSource::All(all_args) => harvest_all(all_args, ctx).await,
    }
}

/// Print the summary of a finished run; log and count a failed one.
fn report(outcomes: Vec<(String, Result<HarvestSummary>)>) -> usize {
    let mut failed = 0;
    for (name, outcome) in outcomes {
        match outcome {
            Ok(summary) => {
                print_harvest(&summary);
                if summary.skipped > 0 {
                    log::warn!("{name}: {} item(s) skipped after errors", summary.skipped);
                }
            }
            Err(e) => {
                log::error!("{name}: {e:#}");
                failed += 1;
            }
        }
    }
    failed
}

async fn run_openalex(ctx: &Context, entity: Entity) -> (String, Result<HarvestSummary>) {
    let source = OpenAlexHarvest::new(ctx.openalex(), entity);
    let outcome = ctx.harvester().run(&source, Vec::new()).await;
    (format!("openalex {entity}"), outcome)
}

async fn harvest_openalex(args: OpenAlexArgs, ctx: &Context) -> Result<()> {
    let entity: Entity = args.entity.into();
    log::info!("Harvesting OpenAlex {entity}");

    let items = if args.ids.is_empty() {
        Vec::new()
    } else {
        let queries = id_queries(entity, args.id_type, &args.ids)?;
        if queries.is_empty() {
            anyhow::bail!("None of the {} identifiers are valid", args.ids.len());
        }
        queries
    };

    let source = OpenAlexHarvest::new(ctx.openalex(), entity);
    let summary = ctx.harvester().run(&source, items).await?;
    print_harvest(&summary);

    if summary.skipped > 0 {
        anyhow::bail!("{} queries failed", summary.skipped);
    }
    Ok(())
}

fn oai_source(ctx: &Context, args: Option<OaiArgs>) -> OaiHarvest {
    let mut settings = ctx.config.oai_settings();
    if let Some(args) = args {
        if !args.set.is_empty() {
            settings.sets = args.set;
        }
        if args.from.is_some() {
            settings.from = args.from;
        }
    }
    OaiHarvest::new(Arc::clone(&ctx.transport), settings, ctx.config.retry_policy())
}

async fn harvest_oai(args: OaiArgs, ctx: &Context) -> Result<()> {
    log::info!("Harvesting OAI-PMH repository {}", ctx.config.oai.base_url);
    let source = oai_source(ctx, Some(args));
    let summary = ctx.harvester().run(&source, Vec::new()).await?;
    print_harvest(&summary);

    if summary.skipped > 0 {
        anyhow::bail!("{} set(s) failed", summary.skipped);
    }
    Ok(())
}

async fn run_lookup(ctx: &Context, lookup: &LookupConfig, dois: Vec<String>) -> (String, Result<HarvestSummary>) {
    let name = format!("lookup {}", lookup.name);
    let settings = match lookup.settings() {
        Ok(settings) => settings,
        Err(e) => return (name, Err(e)),
    };
    let source = LookupHarvest::new(Arc::clone(&ctx.transport), settings, ctx.config.retry_policy());
    let outcome = ctx.harvester().run(&source, dois).await;
    (name, outcome)
}

async fn harvest_lookups(args: LookupArgs, ctx: &Context) -> Result<()> {
    let lookups: Vec<&LookupConfig> = match &args.name {
        Some(name) => vec![
            ctx.config
                .lookup(name)
                .with_context(|| format!("No lookup named {name:?} in config"))?,
        ],
        None => ctx.config.lookups.iter().collect(),
    };
    if lookups.is_empty() {
        anyhow::bail!("No [[lookups]] configured");
    }

    let mut dois = Vec::with_capacity(args.doi.len());
    for raw in &args.doi {
        dois.push(normalize_doi(raw)?);
    }

    let outcomes = join_all(lookups.iter().map(|l| run_lookup(ctx, l, dois.clone()))).await;
    let failed = report(outcomes);
    if failed > 0 {
        anyhow::bail!("{failed} lookup(s) failed");
    }
    Ok(())
}

async fn harvest_all(args: AllArgs, ctx: &Context) -> Result<()> {
    log::info!("Harvesting all sources");
    log::info!("  Store: {}", ctx.config.store.dir.display());

    let mut outcomes = Vec::new();

    // Derived entities read the works collection, so works go first
    outcomes.push(run_openalex(ctx, Entity::Works).await);

    if !ctx.shutdown.is_requested() {
        let derived = Entity::derived().iter().map(|&e| run_openalex(ctx, e));
        outcomes.extend(join_all(derived).await);
    }

    if !args.no_oai && !ctx.shutdown.is_requested() {
        if ctx.config.oai.base_url.is_empty() {
            log::info!("OAI-PMH skipped (no [oai] base_url configured)");
        } else {
            let source = oai_source(ctx, None);
            outcomes.push(("oai".to_string(), ctx.harvester().run(&source, Vec::new()).await));
        }
    }

    if !args.no_lookups && !ctx.shutdown.is_requested() {
        let lookups = ctx.config.lookups.iter().map(|l| run_lookup(ctx, l, Vec::new()));
        outcomes.extend(join_all(lookups).await);
    }

    if ctx.shutdown.is_requested() {
        log::warn!("Shutdown requested, remaining harvesters not started");
    }

    let total = outcomes.len();
    let failed = report(outcomes);
    if failed > 0 {
        anyhow::bail!("{failed} of {total} harvester(s) failed");
    }
    eprintln!("\nAll harvesters completed.");
    Ok(())
}

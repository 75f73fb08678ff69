//! Match subcommand - link repository records to the graph

use std::sync::Arc;

use anyhow::Result;
use clap::{Args, Subcommand};
use rimline_core::fmt_num;
use rimline_match::{AuthorMatchReport, AuthorMatcher, WorkMatchReport, WorkMatcher};

use super::{Context, print_summary};

#[derive(Args, Debug)]
pub struct MatchArgs {
    #[command(subcommand)]
    pub target: MatchTarget,

    /// Match against stored graph records only, never fetch missing ones
    #[arg(long, global = true)]
    pub no_backfill: bool,
}

#[derive(Subcommand, Debug)]
pub enum MatchTarget {
    /// Repository authors to graph authors (ORCID, Scopus, name)
    Authors,
    /// Repository works to graph works (DOI, OpenAlex ID, repository ID)
    Works,
}

pub async fn run(args: MatchArgs, ctx: &Context) -> Result<()> {
    let settings = ctx.config.match_settings();
    let backfill = ctx.backfill(settings.backfill && !args.no_backfill);
    let spinner = ctx.progress.spinner("match");

    match args.target {
        MatchTarget::Authors => {
            spinner.set_message("authors");
            let report = AuthorMatcher::new(Arc::clone(&ctx.store), backfill, settings)
                .run()
                .await?;
            spinner.finish_and_clear();
            report.log();
            print_authors(&report);
        }
        MatchTarget::Works => {
            spinner.set_message("works");
            let report = WorkMatcher::new(Arc::clone(&ctx.store), backfill, settings)
                .run()
                .await?;
            spinner.finish_and_clear();
            report.log();
            print_works(&report);
        }
    }
    Ok(())
}

fn print_authors(report: &AuthorMatchReport) {
    print_summary(
        "Author matching",
        &[
            (
                "Authors",
                format!(
                    "{} ({} previously matched)",
                    fmt_num(report.authors),
                    fmt_num(report.previously_matched)
                ),
            ),
            ("Candidates", fmt_num(report.candidates)),
            ("ORCID", fmt_num(report.by_orcid)),
            ("Scopus", fmt_num(report.by_scopus)),
            ("Name", fmt_num(report.by_name)),
            ("Backfilled ORCIDs", fmt_num(report.orcids_backfilled)),
            (
                "Unmatched",
                format!(
                    "{} ({} ambiguous surnames)",
                    fmt_num(report.unmatched),
                    fmt_num(report.ambiguous)
                ),
            ),
            ("Time", format!("{:.1}s", report.elapsed.as_secs_f64())),
        ],
    );
}

fn print_works(report: &WorkMatchReport) {
    print_summary(
        "Work matching",
        &[
            (
                "Works",
                format!(
                    "{} repository, {} graph",
                    fmt_num(report.repository_works),
                    fmt_num(report.graph_works)
                ),
            ),
            ("DOI", fmt_num(report.by_doi)),
            ("OpenAlex ID", fmt_num(report.by_graph_id)),
            ("Repository ID", fmt_num(report.by_repository_id)),
            ("Backfilled DOIs", fmt_num(report.backfill_requested)),
            (
                "Unmatched",
                format!(
                    "{} ({} without identifiers)",
                    fmt_num(report.unmatched),
                    fmt_num(report.unmatchable)
                ),
            ),
            ("Time", format!("{:.1}s", report.elapsed.as_secs_f64())),
        ],
    );
}

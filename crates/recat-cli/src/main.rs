use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use recat_pipeline::{AliasTable, PipelineConfig};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "recat")]
#[command(about = "Real-estate catalog cleanup and enrichment")]
struct Cli {
    /// Root of the record store (one directory per developer namespace).
    #[arg(long, default_value = "public/data")]
    data_root: PathBuf,

    /// Alias rules file overriding the built-in duplicate table.
    #[arg(long)]
    rules: Option<PathBuf>,

    /// Namespaces to process instead of the default set.
    #[arg(long)]
    namespace: Vec<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Consolidate duplicate entities and standardize field names.
    Cleanup,
    /// Synthesize bilingual fields, enrich from listing documents, and
    /// archive nameless records.
    Fix,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();
    let mut config = PipelineConfig::new(cli.data_root);
    if !cli.namespace.is_empty() {
        config.namespaces = cli.namespace;
    }
    if let Some(rules) = cli.rules {
        config.aliases = AliasTable::from_rules_file(&rules)?;
    }

    match cli.command.unwrap_or(Commands::Cleanup) {
        Commands::Cleanup => {
            let summary = recat_pipeline::run_cleanup(&config)?;
            for ns in &summary.namespaces {
                println!(
                    "{}: removed={} merged={} standardized={}",
                    ns.namespace, ns.removed, ns.merged, ns.standardized
                );
            }
            println!(
                "cleanup complete: run_id={} removed={} merged={} standardized={}",
                summary.run_id, summary.removed, summary.merged, summary.standardized
            );
        }
        Commands::Fix => {
            let summary = recat_pipeline::run_fix(&config)?;
            for ns in &summary.namespaces {
                println!(
                    "{}: candidates={} fixed={} archived={}",
                    ns.namespace, ns.candidates, ns.fixed, ns.archived
                );
            }
            println!(
                "fix complete: run_id={} fixed={} archived={}",
                summary.run_id, summary.fixed, summary.archived
            );
        }
    }

    Ok(())
}

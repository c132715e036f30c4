//! `veriform show`: render a stored run's final fields.

use anyhow::{Context, Result};
use colored::Colorize;
use veriform_store::contracts::read_final;
use veriform_store::RunPaths;

use crate::StorageArgs;

#[derive(clap::Args)]
pub struct ShowArgs {
    /// Run id to display
    run_id: String,

    /// Also list each field's evidence quotes
    #[arg(long)]
    evidence: bool,

    #[command(flatten)]
    storage: StorageArgs,
}

pub fn execute(args: ShowArgs) -> Result<()> {
    let run = RunPaths::new(&args.storage.runs_dir, &args.run_id);
    let result = read_final(&run)
        .with_context(|| format!("no final artifact for run {}", args.run_id))?;

    println!("{} {}", "run".bold(), result.run_id);
    println!("schema: {:?}", result.schema_source);
    println!();
    crate::run::print_fields(&result);

    if args.evidence {
        println!();
        for (key, field) in &result.fields {
            for ev in &field.evidence {
                println!(
                    "{:>20}  {} p{}  {}",
                    key.as_str(),
                    ev.doc_id.dimmed(),
                    ev.page,
                    format!("{:?}", ev.quoted_text).dimmed()
                );
            }
        }
    }

    Ok(())
}

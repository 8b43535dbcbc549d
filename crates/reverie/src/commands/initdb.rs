//! `reverie init-db` - create or migrate the metadata database.

use anyhow::Context as _;
use clap::Args;

use reverie_memory::MetadataStore;

use super::{CliError, CmdResult, Context};

#[derive(Args)]
pub struct InitDbArgs {}

pub fn run(_args: InitDbArgs, ctx: &Context) -> CmdResult {
    let store = MetadataStore::open(&ctx.db_path)
        .with_context(|| format!("opening {}", ctx.db_path))
        .map_err(CliError::Runtime)?;

    // Opening runs migrations; report what we ended up with.
    let personas = store
        .count_personas()
        .context("reading persona count")
        .map_err(CliError::Runtime)?;
    let memories = store
        .count_memories()
        .context("reading memory count")
        .map_err(CliError::Runtime)?;

    println!("database ready: {}", ctx.db_path);
    println!("  personas: {}", personas);
    println!("  memories: {}", memories);
    Ok(())
}

use anyhow::{Context as _, Result};
use kitchen::FetchOutcome;
use std::fs;

use crate::Context;
use crate::engine::package;
use crate::progress;
use crate::ui;

pub fn run(ctx: &Context) -> Result<()> {
    let settings = ctx.settings()?;
    let paths = settings.kitchen_paths();

    let spinner = progress::spinner("Packaging kitchen...", ctx.quiet);
    let result = package(&settings, &paths);
    spinner.finish_and_clear();
    let packaged = result.context("Failed to package kitchen")?;

    if ctx.quiet {
        return Ok(());
    }

    match &packaged.fetch {
        FetchOutcome::Fetched { tool } => ui::success(&format!("Cookbooks fetched with {tool}")),
        FetchOutcome::Skipped { reason } => ui::dim(&format!("Cookbook fetch skipped: {reason}")),
    }

    let archive = &packaged.archive;
    let size = fs::metadata(&archive.path).map(|m| m.len()).unwrap_or(0);
    ui::success(&format!(
        "Packaged {} files into {} ({})",
        archive.file_count(),
        archive.path.display(),
        ui::format_size(size)
    ));
    for root in &archive.roots {
        ui::dim(&root.display().to_string());
    }
    Ok(())
}

use anyhow::{Context as _, Result};
use colored::Colorize;

use crate::Context;
use crate::cli::DeployArgs;
use crate::engine::{Coordinator, DeployReport, ExecutionPlan, RunMode};
use crate::progress::TransferBar;
use crate::ui;

pub fn run(ctx: &Context, args: DeployArgs, mode: RunMode) -> Result<()> {
    let settings = ctx.settings()?;
    let hosts = settings.hosts(&args.target.hosts)?;
    let stage = args.stage.unwrap_or_else(|| settings.stage.clone());
    let transport = settings.ssh_transport();
    let transfer_mode = settings.transfer_mode();

    if !ctx.quiet {
        let title = match mode {
            RunMode::Apply => "chef-solo",
            RunMode::WhyRun => "chef-solo (why-run)",
        };
        ui::header(title);
        ui::kv("Stage", &stage);
        ui::kv("Hosts", &hosts.len().to_string());
        ui::kv("Transfer", transfer_mode.name());
    }

    let bar = TransferBar::new(hosts.len(), ctx.quiet);
    let mut coordinator = Coordinator::new(&settings, &transport).with_stage_name(stage);
    let result = coordinator.run(hosts, mode, &bar);
    bar.finish();

    let report = result.context("chef-solo deployment failed")?;
    if !ctx.quiet {
        print_report(&report, ctx.verbose);
    }
    Ok(())
}

fn print_report(report: &DeployReport, verbose: u8) {
    for warning in &report.discovery.warnings {
        ui::warn(&warning.to_string());
    }

    println!();
    ui::kv("Working dir", &report.remote.working_dir);
    ui::kv(
        "Archive",
        &format!(
            "{} ({} files)",
            report.packaged.archive.path.display(),
            report.packaged.archive.file_count()
        ),
    );
    if let Some(url) = &report.transfer.relay_url {
        ui::kv("Relay", url);
    }
    if verbose > 0 {
        ui::kv("Targets", &report.plan.targets().join(", "));
    }

    match &report.plan {
        ExecutionPlan::Uniform { hosts, .. } => {
            ui::success(&format!("chef-solo finished on {} hosts", hosts.len()));
        }
        ExecutionPlan::Branching(commands) => {
            for command in commands.iter().filter(|c| !c.enabled) {
                ui::dim(&format!("{} skipped (empty run list)", command.host));
            }
            ui::success(&format!(
                "chef-solo finished on {} of {} hosts {}",
                report.plan.targets().len(),
                commands.len(),
                "(per-host run lists)".dimmed()
            ));
        }
    }
}

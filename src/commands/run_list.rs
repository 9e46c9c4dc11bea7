use anyhow::Result;
use colored::Colorize;
use kitchen::{Host, RunListResolver};
use serde::Serialize;

use crate::Context;
use crate::cli::RunListArgs;
use crate::ui;

#[derive(Debug, Serialize)]
struct HostRunList<'a> {
    host: &'a str,
    run_list: &'a [String],
}

#[derive(Debug, Serialize)]
struct RunListReport<'a> {
    hosts: Vec<HostRunList<'a>>,
    unique: bool,
    warnings: Vec<String>,
}

pub fn run(ctx: &Context, args: RunListArgs) -> Result<()> {
    let settings = ctx.settings()?;
    let paths = settings.kitchen_paths();
    let mut hosts = settings.hosts(&args.target.hosts)?;

    let resolver = RunListResolver::new(&paths, settings.chef.roles_auto_discovery);
    let discovery = resolver.discover(&mut hosts);
    let report = RunListReport {
        hosts: host_run_lists(&hosts),
        unique: resolver.is_unique(&hosts),
        warnings: discovery.warnings.iter().map(ToString::to_string).collect(),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    resolver.ensure(&hosts)?;
    Ok(())
}

fn host_run_lists(hosts: &[Host]) -> Vec<HostRunList<'_>> {
    hosts
        .iter()
        .map(|h| HostRunList {
            host: &h.name,
            run_list: h.run_list(),
        })
        .collect()
}

fn print_report(report: &RunListReport<'_>) {
    ui::header("Run lists");
    for entry in &report.hosts {
        ui::kv(entry.host, &ui::run_list(entry.run_list));
    }

    for warning in &report.warnings {
        ui::warn(warning);
    }

    println!();
    if report.unique {
        ui::info("All hosts share one run list");
    } else {
        ui::info(&format!(
            "Run lists differ {}",
            "(chef-solo runs per host)".dimmed()
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kitchen::AttributeSet;

    #[test]
    fn test_report_json_shape() {
        let mut host = Host::new("web1");
        host.attributes = Some(AttributeSet::with_run_list(vec!["recipe[foo]".to_string()]));
        let hosts = vec![host, Host::new("web2")];

        let report = RunListReport {
            hosts: host_run_lists(&hosts),
            unique: false,
            warnings: vec![],
        };
        let value = serde_json::to_value(&report).unwrap();

        assert_eq!(
            value,
            serde_json::json!({
                "hosts": [
                    {"host": "web1", "run_list": ["recipe[foo]"]},
                    {"host": "web2", "run_list": []}
                ],
                "unique": false,
                "warnings": []
            })
        );
    }
}

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

use crate::paths::ENV_CONFIG;

#[derive(Parser)]
#[command(name = "paratrooper")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Deploy a chef kitchen to your hosts and run chef-solo", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file (default: ./paratrooper.toml)
    #[arg(short, long, global = true, env = ENV_CONFIG)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Package the kitchen, upload it and run chef-solo on every host
    #[command(visible_alias = "solo")]
    Apply(DeployArgs),

    /// Same as apply, but run chef-solo in why-run mode
    WhyRun(DeployArgs),

    /// Show the run list discovered for each host
    RunList(RunListArgs),

    /// Build the kitchen archive locally without contacting any host
    Package,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Args, Default)]
pub struct TargetArgs {
    /// Only target this host (repeatable)
    #[arg(long = "host", value_name = "NAME")]
    pub hosts: Vec<String>,
}

#[derive(Debug, Args, Default)]
pub struct DeployArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Override the configured stage name
    #[arg(long)]
    pub stage: Option<String>,
}

#[derive(Debug, Args)]
pub struct RunListArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Print JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_solo_alias() {
        let cli = Cli::try_parse_from(["paratrooper", "solo", "--host", "web1"]).unwrap();
        match cli.command {
            Command::Apply(args) => assert_eq!(args.target.hosts, vec!["web1"]),
            _ => panic!("expected apply"),
        }
    }

    #[test]
    fn test_why_run_with_stage_and_hosts() {
        let cli = Cli::try_parse_from([
            "paratrooper",
            "-vv",
            "why-run",
            "--stage",
            "staging",
            "--host",
            "web1",
            "--host",
            "web2",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::WhyRun(args) => {
                assert_eq!(args.stage.as_deref(), Some("staging"));
                assert_eq!(args.target.hosts, vec!["web1", "web2"]);
            }
            _ => panic!("expected why-run"),
        }
    }

    #[test]
    fn test_run_list_json() {
        let cli =
            Cli::try_parse_from(["paratrooper", "run-list", "--json", "-c", "x.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("x.toml")));
        assert!(matches!(cli.command, Command::RunList(RunListArgs { json: true, .. })));
    }
}

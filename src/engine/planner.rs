//! Execution planner - how chef-solo is started across the fleet

use fleet::solo::{SOLO_JSON, SOLO_RB};
use fleet::{RemoteShell, Transport, fan_out, remote_path};
use kitchen::{Host, RunListResolver};

/// What chef-solo is asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Converge the node
    Apply,
    /// Report what would change
    WhyRun,
}

/// Options that shape the chef-solo command line.
#[derive(Debug, Clone)]
pub struct ChefInvocation<'a> {
    pub chef_solo: &'a str,
    pub working_dir: &'a str,
    pub legacy_mode: bool,
    pub debug: bool,
}

impl ChefInvocation<'_> {
    pub fn command(&self, mode: RunMode) -> String {
        let mut command = format!(
            "{} -c {} -j {}",
            self.chef_solo,
            remote_path(self.working_dir, SOLO_RB),
            remote_path(self.working_dir, SOLO_JSON)
        );
        if self.legacy_mode {
            command.push_str(" --legacy-mode");
        }
        match mode {
            RunMode::Apply if self.debug => command.push_str(" -l debug"),
            RunMode::Apply => {}
            RunMode::WhyRun => command.push_str(" -l fatal --why-run"),
        }
        command
    }
}

/// One host's gated command in a branching plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostCommand {
    pub host: String,
    pub command: String,
    /// False when the host's run list is empty
    pub enabled: bool,
}

/// How chef-solo is launched on the targeted hosts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionPlan {
    /// Every host shares a run list: one elevated command for all
    Uniform { hosts: Vec<String>, command: String },
    /// Run lists differ: each host runs only if it has work
    Branching(Vec<HostCommand>),
}

impl ExecutionPlan {
    pub fn build(resolver: &RunListResolver<'_>, hosts: &[Host], command: &str) -> Self {
        if resolver.is_unique(hosts) {
            return Self::Uniform {
                hosts: hosts.iter().map(|h| h.name.clone()).collect(),
                command: command.to_string(),
            };
        }

        Self::Branching(
            hosts
                .iter()
                .map(|h| HostCommand {
                    host: h.name.clone(),
                    command: command.to_string(),
                    enabled: !h.run_list().is_empty(),
                })
                .collect(),
        )
    }

    pub fn is_uniform(&self) -> bool {
        matches!(self, Self::Uniform { .. })
    }

    /// Hosts that will run chef-solo.
    pub fn targets(&self) -> Vec<&str> {
        match self {
            Self::Uniform { hosts, .. } => hosts.iter().map(String::as_str).collect(),
            Self::Branching(commands) => commands
                .iter()
                .filter(|c| c.enabled)
                .map(|c| c.host.as_str())
                .collect(),
        }
    }

    /// Run the plan with elevated privileges.
    pub fn execute<T: Transport + ?Sized>(&self, shell: &RemoteShell<'_, T>) -> fleet::Result<()> {
        match self {
            Self::Uniform { hosts, command } => {
                let hosts: Vec<&str> = hosts.iter().map(String::as_str).collect();
                shell.sudo(&hosts, command)
            }
            Self::Branching(commands) => {
                for skipped in commands.iter().filter(|c| !c.enabled) {
                    log::info!("[{}] empty run list, skipping chef-solo", skipped.host);
                }

                let _elevation = shell.elevate();
                let enabled: Vec<&HostCommand> = commands.iter().filter(|c| c.enabled).collect();
                let hosts: Vec<&str> = enabled.iter().map(|c| c.host.as_str()).collect();
                fan_out(&hosts, hosts.len(), |host| {
                    let command = enabled
                        .iter()
                        .find(|c| c.host == host)
                        .map(|c| c.command.as_str())
                        .unwrap_or_default();
                    log::info!("[{host}] {}", shell.command_line(command));
                    shell.run_on(host, command)
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet::Privilege;
    use fleet::mock::MockTransport;
    use kitchen::{AttributeSet, KitchenPaths};

    fn invocation() -> ChefInvocation<'static> {
        ChefInvocation {
            chef_solo: "chef-solo",
            working_dir: "/home/deploy/chef-solo",
            legacy_mode: false,
            debug: false,
        }
    }

    fn host(name: &str, run_list: &[&str]) -> Host {
        let mut host = Host::new(name);
        host.attributes = Some(AttributeSet::with_run_list(
            run_list.iter().map(ToString::to_string).collect(),
        ));
        host
    }

    #[test]
    fn test_apply_command() {
        assert_eq!(
            invocation().command(RunMode::Apply),
            "chef-solo -c /home/deploy/chef-solo/solo.rb -j /home/deploy/chef-solo/solo.json"
        );
    }

    #[test]
    fn test_apply_command_legacy_and_debug() {
        let mut invocation = invocation();
        invocation.legacy_mode = true;
        invocation.debug = true;
        assert_eq!(
            invocation.command(RunMode::Apply),
            "chef-solo -c /home/deploy/chef-solo/solo.rb -j /home/deploy/chef-solo/solo.json --legacy-mode -l debug"
        );
    }

    #[test]
    fn test_why_run_ignores_debug() {
        let mut invocation = invocation();
        invocation.debug = true;
        assert_eq!(
            invocation.command(RunMode::WhyRun),
            "chef-solo -c /home/deploy/chef-solo/solo.rb -j /home/deploy/chef-solo/solo.json -l fatal --why-run"
        );
    }

    #[test]
    fn test_uniform_without_auto_discovery() {
        let paths = KitchenPaths::default();
        let resolver = RunListResolver::new(&paths, false);
        let hosts = vec![host("a", &["recipe[foo]"]), host("b", &["recipe[bar]"])];

        let plan = ExecutionPlan::build(&resolver, &hosts, "chef-solo");
        assert!(plan.is_uniform());
        assert_eq!(plan.targets(), vec!["a", "b"]);
    }

    #[test]
    fn test_branching_when_run_lists_differ() {
        let paths = KitchenPaths::default();
        let resolver = RunListResolver::new(&paths, true);
        let hosts = vec![
            host("a", &["recipe[foo]"]),
            host("b", &["recipe[bar]"]),
            host("c", &[]),
        ];

        let plan = ExecutionPlan::build(&resolver, &hosts, "chef-solo");
        assert!(!plan.is_uniform());
        assert_eq!(plan.targets(), vec!["a", "b"]);
    }

    #[test]
    fn test_branching_executes_only_enabled_hosts_elevated() {
        let transport = MockTransport::new();
        let shell = RemoteShell::new(&transport, Privilege::default());
        let plan = ExecutionPlan::Branching(vec![
            HostCommand {
                host: "a".to_string(),
                command: "chef-solo".to_string(),
                enabled: true,
            },
            HostCommand {
                host: "b".to_string(),
                command: "chef-solo".to_string(),
                enabled: false,
            },
        ]);

        plan.execute(&shell).unwrap();

        assert_eq!(transport.commands_for("a"), vec!["sudo chef-solo"]);
        assert!(transport.commands_for("b").is_empty());
        assert!(!shell.is_elevated());
    }

    #[test]
    fn test_uniform_executes_everywhere() {
        let transport = MockTransport::new();
        let shell = RemoteShell::new(&transport, Privilege::default());
        let plan = ExecutionPlan::Uniform {
            hosts: vec!["a".to_string(), "b".to_string()],
            command: "chef-solo".to_string(),
        };

        plan.execute(&shell).unwrap();

        assert_eq!(transport.hosts_running("chef-solo"), vec!["a", "b"]);
    }
}

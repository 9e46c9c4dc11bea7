//! Deployment pipeline
//!
//! Stages run strictly in order:
//! Discovering → Packaging → Transferring → ConfigGenerating → Executing → Done.
//! Any failure moves the coordinator to [`Stage::Aborted`] and the error
//! names the stage it happened in. Nothing is rolled back.

use std::fmt;
use thiserror::Error;

use fleet::{
    RemoteConfigGenerator, RemoteShell, SoloConfig, TransferDispatcher, TransferProgress,
    TransferReport, Transport, remote_path, shell_escape,
};
use kitchen::{
    ArchiveBuilder, ArchiveSummary, AttributeSet, CookbookSource, Discovery, FetchOutcome, Host,
    KitchenPaths, RunListResolver,
};

use super::planner::{ChefInvocation, ExecutionPlan, RunMode};
use crate::config::{RemoteSection, Settings};

/// Pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Discovering,
    Packaging,
    Transferring,
    ConfigGenerating,
    Executing,
    Done,
    Aborted,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Discovering => "discovering",
            Self::Packaging => "packaging",
            Self::Transferring => "transferring",
            Self::ConfigGenerating => "generating config",
            Self::Executing => "executing",
            Self::Done => "done",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Underlying cause of an abort.
#[derive(Debug, Error)]
pub enum Failure {
    #[error(transparent)]
    Kitchen(#[from] kitchen::Error),
    #[error(transparent)]
    Fleet(#[from] fleet::Error),
}

/// A deployment that stopped at `stage`.
#[derive(Debug, Error)]
#[error("deployment aborted while {stage}")]
pub struct PipelineError {
    pub stage: Stage,
    #[source]
    pub source: Failure,
}

/// Remote settings after defaults were filled in from the first host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSettings {
    pub working_dir: String,
    pub use_sudo: bool,
}

/// Result of the packaging stage.
#[derive(Debug)]
pub struct Packaged {
    pub fetch: FetchOutcome,
    pub archive: ArchiveSummary,
}

/// Everything a completed deployment did.
#[derive(Debug)]
pub struct DeployReport {
    pub discovery: Discovery,
    pub remote: RemoteSettings,
    pub packaged: Packaged,
    pub transfer: TransferReport,
    pub plan: ExecutionPlan,
}

/// Check the manifest policy, fetch cookbooks and build the archive.
pub fn package(settings: &Settings, paths: &KitchenPaths) -> kitchen::Result<Packaged> {
    let source = CookbookSource::discover(settings.cookbooks.manage_tool, paths)?;
    let fetch = if settings.cookbooks.download {
        source.fetch()?
    } else {
        FetchOutcome::Skipped {
            reason: "cookbook download disabled".to_string(),
        }
    };
    if let FetchOutcome::Skipped { reason } = &fetch {
        log::debug!("Cookbook fetch skipped: {reason}");
    }

    let archive = ArchiveBuilder::new(paths).build(&settings.archive_path())?;
    Ok(Packaged { fetch, archive })
}

/// Fill in the working directory and sudo usage from the first host.
pub fn resolve_remote<T: Transport + ?Sized>(
    shell: &RemoteShell<'_, T>,
    remote: &RemoteSection,
    hosts: &[&str],
) -> fleet::Result<RemoteSettings> {
    let first = hosts.first().copied();

    let working_dir = match (&remote.working_dir, first) {
        (Some(dir), _) => dir.clone(),
        (None, Some(host)) => remote_path(shell.capture(host, "echo $HOME")?.trim(), "chef-solo"),
        (None, None) => "chef-solo".to_string(),
    };

    let use_sudo = match (remote.use_sudo, first) {
        (Some(use_sudo), _) => use_sudo,
        (None, Some(host)) => {
            let uid = shell.capture(host, "id -u")?;
            match uid.trim().parse::<u32>() {
                Ok(uid) => uid != 0,
                Err(_) => {
                    log::warn!("[{host}] unexpected `id -u` output {uid:?}, using sudo");
                    true
                }
            }
        }
        (None, None) => true,
    };

    log::debug!("Remote working dir {working_dir}, sudo: {use_sudo}");
    Ok(RemoteSettings {
        working_dir,
        use_sudo,
    })
}

/// `solo.rb` contents for a kitchen unpacked in `working_dir`.
pub fn solo_config(settings: &Settings, paths: &KitchenPaths, working_dir: &str) -> SoloConfig {
    let remote = |p: std::path::PathBuf| remote_path(working_dir, &p.to_string_lossy());

    SoloConfig {
        file_cache_path: settings.remote.cache_dir.clone(),
        cookbook_path: paths.cookbook_paths().into_iter().map(remote).collect(),
        role_path: remote(paths.roles_path()),
        environment: settings.chef.environment.clone(),
        environment_path: remote(paths.environments_path()),
        data_bag_path: remote(paths.data_bags_path()),
        verbose_logging: settings.chef.verbose_logging,
        ohai_plugin_path: settings.ohai_plugin_path(),
        encrypted_data_bag_secret: paths
            .has_data_bag_secret()
            .then(|| remote(paths.data_bag_secret_path())),
    }
}

fn prepare_working_dir<T: Transport + ?Sized>(
    shell: &RemoteShell<'_, T>,
    hosts: &[&str],
    working_dir: &str,
    cache_dir: &str,
) -> fleet::Result<()> {
    let working_dir = shell_escape(working_dir);
    shell.sudo(hosts, &format!("rm -rf {working_dir}"))?;
    shell.run(hosts, &format!("mkdir -p {working_dir}"))?;
    shell.sudo(hosts, &format!("mkdir -p {}", shell_escape(cache_dir)))
}

/// Runs a deployment through every stage.
pub struct Coordinator<'a, T: Transport + ?Sized> {
    settings: &'a Settings,
    transport: &'a T,
    stage_name: String,
    stage: Stage,
}

impl<'a, T: Transport + ?Sized> Coordinator<'a, T> {
    pub fn new(settings: &'a Settings, transport: &'a T) -> Self {
        Self {
            settings,
            transport,
            stage_name: settings.stage.clone(),
            stage: Stage::Discovering,
        }
    }

    /// Override the stage name used for relay object keys.
    pub fn with_stage_name(mut self, name: impl Into<String>) -> Self {
        self.stage_name = name.into();
        self
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    fn enter(&mut self, stage: Stage) {
        log::info!("Stage: {stage}");
        self.stage = stage;
    }

    fn check<V, E: Into<Failure>>(&mut self, result: Result<V, E>) -> Result<V, PipelineError> {
        result.map_err(|e| {
            let stage = self.stage;
            self.stage = Stage::Aborted;
            PipelineError {
                stage,
                source: e.into(),
            }
        })
    }

    pub fn run(
        &mut self,
        mut hosts: Vec<Host>,
        mode: RunMode,
        progress: &dyn TransferProgress,
    ) -> Result<DeployReport, PipelineError> {
        let settings = self.settings;
        let stage_name = self.stage_name.clone();
        let paths = settings.kitchen_paths();
        let resolver = RunListResolver::new(&paths, settings.chef.roles_auto_discovery);
        let mut shell = RemoteShell::new(self.transport, settings.privilege());

        self.enter(Stage::Discovering);
        let discovery = resolver.discover(&mut hosts);
        self.check(resolver.ensure(&hosts))?;
        let names: Vec<&str> = hosts.iter().map(|h| h.name.as_str()).collect();
        let remote = self.check(resolve_remote(&shell, &settings.remote, &names))?;
        shell.set_use_sudo(remote.use_sudo);
        let working_dir = remote.working_dir.as_str();

        self.enter(Stage::Packaging);
        let packaged = self.check(package(settings, &paths))?;
        log::info!(
            "Packaged {} entries into {}",
            packaged.archive.entries.len(),
            packaged.archive.path.display()
        );

        self.enter(Stage::Transferring);
        self.check(prepare_working_dir(
            &shell,
            &names,
            working_dir,
            &settings.remote.cache_dir,
        ))?;
        let transfer_mode = settings.transfer_mode();
        let transfer = self.check(
            TransferDispatcher::new(&transfer_mode, &stage_name).dispatch(
                &shell,
                &names,
                &packaged.archive.path,
                working_dir,
                progress,
            ),
        )?;

        self.enter(Stage::ConfigGenerating);
        let solo = solo_config(settings, &paths, working_dir);
        let empty = AttributeSet::default();
        let nodes: Vec<(&str, &AttributeSet)> = hosts
            .iter()
            .map(|h| (h.name.as_str(), h.attributes.as_ref().unwrap_or(&empty)))
            .collect();
        self.check(RemoteConfigGenerator::new(&solo, working_dir).place(&shell, &nodes))?;

        self.enter(Stage::Executing);
        let command = ChefInvocation {
            chef_solo: &settings.remote.chef_solo,
            working_dir,
            legacy_mode: settings.chef.legacy_mode,
            debug: settings.chef.debug,
        }
        .command(mode);
        let plan = ExecutionPlan::build(&resolver, &hosts, &command);
        if !plan.is_uniform() {
            log::info!("Run lists differ, running chef-solo per host");
        }
        self.check(plan.execute(&shell))?;

        self.enter(Stage::Done);
        Ok(DeployReport {
            discovery,
            remote,
            packaged,
            transfer,
            plan,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet::NoProgress;
    use fleet::mock::MockTransport;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    const WD: &str = "/home/deploy/chef-solo";

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn kitchen() -> TempDir {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "config/site-cookbooks/base/recipes/default.rb", "log 'hi'\n");
        write(dir.path(), "config/roles/web.json", "{}");
        dir
    }

    fn settings(dir: &TempDir, extra: &str, hosts: &[(&str, &[&str])]) -> Settings {
        let mut toml = format!(
            "[kitchen]\nroot = {:?}\narchive = {:?}\n{extra}\n",
            dir.path().display().to_string(),
            dir.path().join("stage/kitchen.tar").display().to_string(),
        );
        for (name, roles) in hosts {
            toml.push_str(&format!("[[hosts]]\nname = {name:?}\nroles = {roles:?}\n"));
        }
        Settings::parse(&toml).unwrap()
    }

    fn transport() -> MockTransport {
        MockTransport::new()
            .with_output("echo $HOME", "/home/deploy\n")
            .with_output("id -u", "1000\n")
    }

    #[test]
    fn test_uniform_apply_runs_every_stage() {
        let dir = kitchen();
        write(dir.path(), "config/solo.json", r#"{"run_list": ["recipe[base]"]}"#);
        let settings = settings(&dir, "", &[("web1", &[]), ("web2", &[])]);
        let transport = transport();
        let hosts = settings.hosts(&[]).unwrap();

        let mut coordinator = Coordinator::new(&settings, &transport);
        let report = coordinator.run(hosts, RunMode::Apply, &NoProgress).unwrap();

        assert_eq!(coordinator.stage(), Stage::Done);
        assert!(report.plan.is_uniform());
        assert_eq!(
            report.remote,
            RemoteSettings {
                working_dir: WD.to_string(),
                use_sudo: true,
            }
        );
        assert_eq!(
            transport.commands_for("web1"),
            vec![
                "echo $HOME".to_string(),
                "id -u".to_string(),
                format!("sudo rm -rf {WD}"),
                format!("mkdir -p {WD}"),
                "sudo mkdir -p /var/chef/cache".to_string(),
                format!("cd {WD} && tar -xf kitchen.tar"),
                format!("sudo chef-solo -c {WD}/solo.rb -j {WD}/solo.json"),
            ]
        );
        assert_eq!(
            transport.commands_for("web2").first().map(String::as_str),
            Some("sudo rm -rf /home/deploy/chef-solo")
        );
        assert_eq!(transport.upload_count(), 2);

        let solo_rb = transport.file("web2", &format!("{WD}/solo.rb")).unwrap();
        assert!(solo_rb.contains(&format!(
            "cookbook_path [\"{WD}/config/site-cookbooks\", \"{WD}/config/vendor/cookbooks\"]"
        )));
        assert!(!solo_rb.contains("encrypted_data_bag_secret"));

        let solo_json = transport.file("web1", &format!("{WD}/solo.json")).unwrap();
        assert_eq!(solo_json, r#"{"run_list":["recipe[base]"]}"#);

        assert!(dir.path().join("stage/kitchen.tar").exists());
    }

    #[test]
    fn test_branching_runs_only_hosts_with_work() {
        let dir = kitchen();
        write(dir.path(), "config/nodes/a.json", r#"{"run_list": ["recipe[foo]"]}"#);
        write(dir.path(), "config/nodes/b.json", r#"{"run_list": ["recipe[bar]"]}"#);
        let settings = settings(
            &dir,
            "[chef]\nroles_auto_discovery = true",
            &[("a", &[]), ("b", &[]), ("c", &[])],
        );
        let transport = transport();

        let report = Coordinator::new(&settings, &transport)
            .run(settings.hosts(&[]).unwrap(), RunMode::Apply, &NoProgress)
            .unwrap();

        assert!(!report.plan.is_uniform());
        assert_eq!(report.discovery.hosts_without_attributes(), vec!["c"]);
        assert_eq!(transport.hosts_running("chef-solo -c"), vec!["a", "b"]);
        assert!(transport.commands_for("c").iter().all(|c| !c.contains("chef-solo -c")));
        assert_eq!(
            transport.file("c", &format!("{WD}/solo.json")).as_deref(),
            Some(r#"{"run_list":[]}"#)
        );
    }

    #[test]
    fn test_role_discovery_appends_existing_roles() {
        let dir = kitchen();
        write(dir.path(), "config/solo.json", r#"{"run_list": ["recipe[base]"]}"#);
        let settings = settings(
            &dir,
            "[chef]\nroles_auto_discovery = true",
            &[("web1", &["web", "missing"]), ("web2", &["web"])],
        );
        let transport = transport();

        let report = Coordinator::new(&settings, &transport)
            .run(settings.hosts(&[]).unwrap(), RunMode::Apply, &NoProgress)
            .unwrap();

        assert!(report.plan.is_uniform());
        let solo_json = transport.file("web1", &format!("{WD}/solo.json")).unwrap();
        assert_eq!(solo_json, r#"{"run_list":["recipe[base]","role[web]"]}"#);
    }

    #[test]
    fn test_empty_run_lists_abort_before_remote_work() {
        let dir = kitchen();
        let settings = settings(&dir, "", &[("web1", &[]), ("web2", &[])]);
        let transport = transport();

        let mut coordinator = Coordinator::new(&settings, &transport);
        let err = coordinator
            .run(settings.hosts(&[]).unwrap(), RunMode::Apply, &NoProgress)
            .unwrap_err();

        assert_eq!(err.stage, Stage::Discovering);
        assert!(matches!(
            err.source,
            Failure::Kitchen(kitchen::Error::EmptyRunLists)
        ));
        assert!(
            err.source
                .to_string()
                .contains("must specify at least one recipe or role")
        );
        assert_eq!(coordinator.stage(), Stage::Aborted);
        assert!(transport.events().is_empty());
    }

    #[test]
    fn test_missing_kitchen_content_aborts_packaging() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "config/solo.json", r#"{"run_list": ["recipe[base]"]}"#);
        let settings = settings(&dir, "", &[("web1", &[])]);
        let transport = transport();

        let err = Coordinator::new(&settings, &transport)
            .run(settings.hosts(&[]).unwrap(), RunMode::Apply, &NoProgress)
            .unwrap_err();

        assert_eq!(err.stage, Stage::Packaging);
        assert!(matches!(
            err.source,
            Failure::Kitchen(kitchen::Error::NoKitchenContent { .. })
        ));
        assert!(transport.hosts_running("rm -rf").is_empty());
        assert_eq!(transport.upload_count(), 0);
    }

    #[test]
    fn test_conflicting_manifests_abort_packaging() {
        let dir = kitchen();
        write(dir.path(), "config/solo.json", r#"{"run_list": ["recipe[base]"]}"#);
        write(dir.path(), "Berksfile", "");
        write(dir.path(), "Cheffile", "");
        let settings = settings(&dir, "", &[("web1", &[])]);
        let transport = transport();

        let err = Coordinator::new(&settings, &transport)
            .run(settings.hosts(&[]).unwrap(), RunMode::Apply, &NoProgress)
            .unwrap_err();

        assert_eq!(err.stage, Stage::Packaging);
        assert!(matches!(
            err.source,
            Failure::Kitchen(kitchen::Error::ConflictingManifests)
        ));
    }

    #[test]
    fn test_chef_failure_reports_executing_stage() {
        let dir = kitchen();
        write(dir.path(), "config/solo.json", r#"{"run_list": ["recipe[base]"]}"#);
        let settings = settings(&dir, "", &[("web1", &[])]);
        let transport = transport().fail_on("chef-solo -c");

        let mut coordinator = Coordinator::new(&settings, &transport);
        let err = coordinator
            .run(settings.hosts(&[]).unwrap(), RunMode::Apply, &NoProgress)
            .unwrap_err();

        assert_eq!(err.stage, Stage::Executing);
        assert!(matches!(
            err.source,
            Failure::Fleet(fleet::Error::RemoteCommand { .. })
        ));
        assert_eq!(coordinator.stage(), Stage::Aborted);
    }

    #[test]
    fn test_configured_remote_settings_skip_probing() {
        let dir = kitchen();
        write(dir.path(), "config/solo.json", r#"{"run_list": ["recipe[base]"]}"#);
        write(dir.path(), "config/data_bag_key", "secret");
        let settings = settings(
            &dir,
            "[remote]\nworking_dir = \"/srv/chef\"\nuse_sudo = false\n[chef]\nlegacy_mode = true",
            &[("web1", &[])],
        );
        let transport = transport();

        Coordinator::new(&settings, &transport)
            .run(settings.hosts(&[]).unwrap(), RunMode::WhyRun, &NoProgress)
            .unwrap();

        let commands = transport.commands_for("web1");
        assert_eq!(commands.first().map(String::as_str), Some("rm -rf /srv/chef"));
        assert!(!commands.iter().any(|c| c == "id -u" || c == "echo $HOME"));
        assert_eq!(
            commands.last().map(String::as_str),
            Some("chef-solo -c /srv/chef/solo.rb -j /srv/chef/solo.json --legacy-mode -l fatal --why-run")
        );

        let solo_rb = transport.file("web1", "/srv/chef/solo.rb").unwrap();
        assert!(solo_rb.contains("encrypted_data_bag_secret \"/srv/chef/config/data_bag_key\"\n"));
    }

    #[test]
    fn test_root_login_disables_sudo() {
        let transport = MockTransport::new()
            .with_output("echo $HOME", "/root\n")
            .with_output("id -u", "0\n");
        let shell = RemoteShell::new(&transport, fleet::Privilege::default());

        let remote = resolve_remote(&shell, &RemoteSection::default(), &["web1", "web2"]).unwrap();

        assert_eq!(
            remote,
            RemoteSettings {
                working_dir: "/root/chef-solo".to_string(),
                use_sudo: false,
            }
        );
        assert!(transport.commands_for("web2").is_empty());
    }

    #[test]
    fn test_relay_uses_stage_override() {
        let dir = kitchen();
        write(dir.path(), "config/solo.json", r#"{"run_list": ["recipe[base]"]}"#);
        let settings = settings(
            &dir,
            "[transfer.relay]\nbucket = \"artifacts\"\naccess_key_id = \"AKIA\"\nsecret_access_key = \"s\"",
            &[("web1", &[])],
        );
        let transport = transport();

        let report = Coordinator::new(&settings, &transport)
            .with_stage_name("canary")
            .run(settings.hosts(&[]).unwrap(), RunMode::Apply, &NoProgress)
            .unwrap();

        let url = report.transfer.relay_url.unwrap();
        assert!(url.starts_with("s3://artifacts/canary/kitchen-"));
        assert_eq!(transport.upload_count(), 0);
        assert_eq!(transport.local_commands().len(), 1);
    }
}

//! Stage sequencing across the module inventory.
//!
//! Each stage is a full pass over the inventory. A module's failure is
//! recorded in the stage's [`StageReport`] and never stops the pass.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;

use crate::cache::{CacheError, LocalCache};
use crate::config::Config;
use crate::forge::{ProvisionError, Provisioner};
use crate::push::{PushError, PushFanout};
use crate::translate::{BridgeOutcome, TranslationError, Translator};
use crate::types::{ModuleName, ModuleRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Setup,
    CloneAll,
    PullAll,
    HgToGit,
    CreateMissingRepos,
    PushToRemotes,
}

impl Stage {
    /// Order of a full run.
    pub const ALL: [Stage; 6] = [
        Stage::Setup,
        Stage::CloneAll,
        Stage::PullAll,
        Stage::HgToGit,
        Stage::CreateMissingRepos,
        Stage::PushToRemotes,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Stage::Setup => "setup",
            Stage::CloneAll => "clone_all",
            Stage::PullAll => "pull_all",
            Stage::HgToGit => "hg_to_git",
            Stage::CreateMissingRepos => "create_missing_repos",
            Stage::PushToRemotes => "push_to_remotes",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Stage::Setup => "create cache directories and empty bare git repositories",
            Stage::CloneAll => "clone every module missing from the hg cache",
            Stage::PullAll => "pull and update every cloned module",
            Stage::HgToGit => "bookmark branches and push them into the git cache",
            Stage::CreateMissingRepos => "create or fix the mirror repositories on the forge",
            Stage::PushToRemotes => "mirror-push every translated module to its remotes",
        }
    }

    /// Failing one of these excludes the module from the rest of a run.
    fn is_blocking(self) -> bool {
        matches!(self, Stage::CloneAll | Stage::PullAll | Stage::HgToGit)
    }

    /// Stages touching the module's directories run under its lock.
    fn needs_lock(self) -> bool {
        !matches!(self, Stage::CreateMissingRepos)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().replace('-', "_");
        match normalized.as_str() {
            "setup" => Ok(Stage::Setup),
            "clone_all" | "clone" => Ok(Stage::CloneAll),
            "pull_all" | "pull" => Ok(Stage::PullAll),
            "hg_to_git" | "translate_all" | "translate" => Ok(Stage::HgToGit),
            "create_missing_repos" | "provision" => Ok(Stage::CreateMissingRepos),
            "push_to_remotes" | "push_all" | "push" => Ok(Stage::PushToRemotes),
            _ => Err(format!("unknown stage '{}'", s.trim())),
        }
    }
}

fn join_push_errors(errors: &[PushError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Why a module failed a stage.
#[derive(Error, Debug)]
pub enum StageError {
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Translation(#[from] TranslationError),
    #[error("{0}")]
    Provision(#[from] ProvisionError),
    #[error("{}", join_push_errors(.0))]
    Push(Vec<PushError>),
}

#[derive(Debug)]
pub struct ModuleFailure {
    pub module: ModuleName,
    pub error: StageError,
}

/// Outcome of one stage pass.
#[derive(Debug)]
pub struct StageReport {
    pub stage: Stage,
    pub processed: usize,
    pub changed: usize,
    pub skipped: usize,
    pub failures: Vec<ModuleFailure>,
    /// The pass stopped early on an interrupt; the rest was skipped.
    pub interrupted: bool,
}

impl StageReport {
    fn new(stage: Stage) -> Self {
        Self {
            stage,
            processed: 0,
            changed: 0,
            skipped: 0,
            failures: Vec::new(),
            interrupted: false,
        }
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failed_modules(&self) -> impl Iterator<Item = &ModuleName> {
        self.failures.iter().map(|f| &f.module)
    }
}

impl fmt::Display for StageReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} modules, {} changed, {} skipped, {} failed",
            self.stage,
            self.processed,
            self.changed,
            self.skipped,
            self.failures.len()
        )?;
        if !self.failures.is_empty() {
            let names: Vec<&str> = self.failed_modules().map(ModuleName::as_str).collect();
            write!(f, " ({})", names.join(", "))?;
        }
        if self.interrupted {
            write!(f, " [interrupted]")?;
        }
        Ok(())
    }
}

/// What a stage did to one module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Changed,
    Unchanged,
    Skipped,
}

type StepFn = fn(&mut Pipeline, &ModuleRecord) -> Result<Step, StageError>;

/// Per-module step of each stage.
fn step_for(stage: Stage) -> StepFn {
    match stage {
        Stage::Setup => Pipeline::setup_module,
        Stage::CloneAll => Pipeline::clone_module,
        Stage::PullAll => Pipeline::pull_module,
        Stage::HgToGit => Pipeline::translate_module,
        Stage::CreateMissingRepos => Pipeline::provision_module,
        Stage::PushToRemotes => Pipeline::push_module,
    }
}

/// Drives the stages over an inventory.
pub struct Pipeline {
    config: Config,
    cache: LocalCache,
    provisioner: Option<Provisioner>,
    shutdown: Arc<AtomicBool>,
}

impl Pipeline {
    pub fn new(config: Config, cache: LocalCache, provisioner: Option<Provisioner>) -> Self {
        Self {
            config,
            cache,
            provisioner,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Stop passes between modules once `shutdown` is set.
    pub fn with_shutdown(mut self, shutdown: Arc<AtomicBool>) -> Self {
        self.shutdown = shutdown;
        self
    }

    fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &LocalCache {
        &self.cache
    }

    pub fn can_provision(&self) -> bool {
        self.provisioner.is_some()
    }

    /// Run one stage over every module.
    ///
    /// Only a failure to create the cache roots aborts the pass.
    pub fn run_stage(
        &mut self,
        stage: Stage,
        modules: &[ModuleRecord],
    ) -> Result<StageReport, CacheError> {
        self.run_stage_excluding(stage, modules, &HashSet::new())
    }

    /// Run every stage in order. A module that fails a blocking stage is
    /// skipped by every later stage of this run.
    pub fn run_all(&mut self, modules: &[ModuleRecord]) -> Result<Vec<StageReport>, CacheError> {
        let mut excluded = HashSet::new();
        let mut reports = Vec::with_capacity(Stage::ALL.len());

        for stage in Stage::ALL {
            if stage == Stage::CreateMissingRepos && !self.can_provision() {
                log::info!("no forge token configured, not provisioning repositories");
                continue;
            }

            let report = self.run_stage_excluding(stage, modules, &excluded)?;
            if stage.is_blocking() {
                excluded.extend(report.failed_modules().cloned());
            }
            log::info!("{}", report);
            let interrupted = report.interrupted;
            reports.push(report);
            if interrupted {
                break;
            }
        }

        Ok(reports)
    }

    fn run_stage_excluding(
        &mut self,
        stage: Stage,
        modules: &[ModuleRecord],
        excluded: &HashSet<ModuleName>,
    ) -> Result<StageReport, CacheError> {
        log::info!("running {} over {} modules", stage, modules.len());

        match stage {
            Stage::Setup => self.cache.ensure_roots()?,
            Stage::CreateMissingRepos => {
                if let Some(provisioner) = self.provisioner.as_mut() {
                    log::info!("provisioning on {}", provisioner.forge_name());
                    provisioner.begin_pass();
                }
            }
            _ => {}
        }

        let step = step_for(stage);
        let mut report = StageReport::new(stage);

        for record in modules {
            report.processed += 1;
            if self.is_shutting_down() {
                if !report.interrupted {
                    log::warn!("{} interrupted before {}", stage, record.name);
                    report.interrupted = true;
                }
                report.skipped += 1;
                continue;
            }
            if excluded.contains(&record.name) {
                log::debug!("{}: skipping {} after an earlier failure", stage, record.name);
                report.skipped += 1;
                continue;
            }

            let result = if stage.needs_lock() {
                match self.cache.lock(&record.name) {
                    Ok(_lock) => step(self, record),
                    Err(e) => Err(e.into()),
                }
            } else {
                step(self, record)
            };

            match result {
                Ok(Step::Changed) => report.changed += 1,
                Ok(Step::Unchanged) => {}
                Ok(Step::Skipped) => report.skipped += 1,
                Err(error) => {
                    log::warn!("{} failed for {}: {}", stage, record.name, error);
                    report.failures.push(ModuleFailure {
                        module: record.name.clone(),
                        error,
                    });
                }
            }
        }

        Ok(report)
    }

    fn setup_module(&mut self, record: &ModuleRecord) -> Result<Step, StageError> {
        Ok(changed_if(self.cache.init_target(&record.name)?))
    }

    fn clone_module(&mut self, record: &ModuleRecord) -> Result<Step, StageError> {
        Ok(changed_if(self.cache.clone_or_skip(record)?))
    }

    fn pull_module(&mut self, record: &ModuleRecord) -> Result<Step, StageError> {
        if self.cache.pull(&record.name)? {
            Ok(Step::Changed)
        } else {
            log::debug!("{} is not cloned, nothing to pull", record.name);
            Ok(Step::Skipped)
        }
    }

    fn translate_module(&mut self, record: &ModuleRecord) -> Result<Step, StageError> {
        if !self.cache.has_source(&record.name) {
            log::debug!("{} is not cloned, nothing to translate", record.name);
            return Ok(Step::Skipped);
        }
        match Translator::new(&self.cache).translate(&record.name)? {
            BridgeOutcome::Transferred => Ok(Step::Changed),
            BridgeOutcome::UpToDate => Ok(Step::Unchanged),
        }
    }

    fn provision_module(&mut self, record: &ModuleRecord) -> Result<Step, StageError> {
        let homepage = self.config.inventory.homepage(&record.name);
        let Some(provisioner) = self.provisioner.as_mut() else {
            return Ok(Step::Skipped);
        };
        let action = provisioner.ensure_repo(&record.name, &homepage)?;
        Ok(changed_if(action.is_mutation()))
    }

    fn push_module(&mut self, record: &ModuleRecord) -> Result<Step, StageError> {
        let results = PushFanout::new(&self.config, &self.cache).push_all(&record.name);

        let mut errors = Vec::new();
        for result in results {
            match result {
                Ok(_) => {}
                Err(PushError::NotTranslated(name)) => {
                    log::warn!("{} has no refs yet, not pushing", name);
                    return Ok(Step::Skipped);
                }
                Err(e) => errors.push(e),
            }
        }

        if errors.is_empty() {
            Ok(Step::Changed)
        } else {
            Err(StageError::Push(errors))
        }
    }
}

fn changed_if(changed: bool) -> Step {
    if changed { Step::Changed } else { Step::Unchanged }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CachePaths;
    use crate::forge::fake::FakeForge;
    use crate::vcs::fake::{FakeRunner, has_arg};
    use crate::vcs::test_support::commit_ref;
    use crate::vcs::{CommandOutput, GitCli, HgCli, Invocation};
    use std::collections::HashMap;
    use std::io;
    use std::path::Path;
    use std::rc::Rc;
    use tempfile::{TempDir, tempdir};

    fn config(temp: &TempDir, token: Option<&str>) -> Config {
        let mut env: HashMap<&str, String> = HashMap::new();
        env.insert("BB_OWNER", "acme".into());
        env.insert("HG_CACHE", temp.path().join("hg").display().to_string());
        env.insert("GIT_CACHE", temp.path().join("git").display().to_string());
        env.insert("MIRROR_LOCK_DIR", temp.path().join("locks").display().to_string());
        if let Some(token) = token {
            env.insert("FORGE_TOKEN", token.into());
        }
        Config::from_lookup(|key| env.get(key).cloned()).unwrap()
    }

    fn records(names: &[&str]) -> Vec<ModuleRecord> {
        names
            .iter()
            .map(|n| ModuleRecord::new(n.parse().unwrap(), format!("https://bitbucket.org/acme/{}", n)))
            .collect()
    }

    /// hg/git stand-in: clones create `.hg`, urls containing "broken" fail,
    /// bridge pushes give the target a ref.
    fn emulator(inv: &Invocation) -> io::Result<CommandOutput> {
        let args: Vec<String> = inv
            .args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        if has_arg(inv, "clone") {
            if args[2].contains("broken") {
                return Ok(CommandOutput::with_code(255));
            }
            let hg_dir = Path::new(&args[3]).join(".hg");
            std::fs::create_dir_all(&hg_dir)?;
            std::fs::write(hg_dir.join("hgrc"), format!("[paths]\ndefault = {}\n", args[2]))?;
        } else if inv.program == "hg" && has_arg(inv, "push") {
            let target = Path::new(args.last().unwrap());
            commit_ref(target, "refs/heads/develop", "bridged");
        } else if has_arg(inv, "branches") {
            let mut out = CommandOutput::with_code(0);
            out.stdout = "default\n".into();
            return Ok(out);
        }
        Ok(CommandOutput::with_code(0))
    }

    fn pipeline(config: Config, runner: Rc<FakeRunner>, forge: Option<FakeForge>) -> Pipeline {
        let cache = LocalCache::new(
            CachePaths::from_config(&config),
            HgCli::new(runner.clone()),
            GitCli::new(runner),
        );
        let provisioner = forge.map(|f| Provisioner::new(Box::new(f)));
        Pipeline::new(config, cache, provisioner)
    }

    #[test]
    fn stage_names_and_aliases() {
        for stage in Stage::ALL {
            assert_eq!(stage.name().parse::<Stage>().unwrap(), stage);
        }
        assert_eq!("translate_all".parse::<Stage>().unwrap(), Stage::HgToGit);
        assert_eq!("push-all".parse::<Stage>().unwrap(), Stage::PushToRemotes);
        assert_eq!("clone-all".parse::<Stage>().unwrap(), Stage::CloneAll);
        assert!("frobnicate".parse::<Stage>().is_err());
    }

    #[test]
    fn every_stage_runs_its_own_step() {
        let temp = tempdir().unwrap();
        let runner = Rc::new(FakeRunner::new(emulator));
        let forge = FakeForge::new();
        let mut pipeline = pipeline(config(&temp, Some("t0ken")), runner, Some(forge.clone()));
        let modules = records(&["trytond-a"]);

        let changed: Vec<(Stage, usize)> = Stage::ALL
            .into_iter()
            .map(|stage| (stage, pipeline.run_stage(stage, &modules).unwrap().changed))
            .collect();

        assert!(changed.iter().all(|(_, n)| *n == 1), "{:?}", changed);
        assert_eq!(forge.state.borrow().creates.len(), 1);
    }

    #[test]
    fn setup_is_idempotent() {
        let temp = tempdir().unwrap();
        let mut pipeline = pipeline(config(&temp, None), Rc::new(FakeRunner::succeeding()), None);
        let modules = records(&["trytond-sale", "trytond-stock"]);

        let first = pipeline.run_stage(Stage::Setup, &modules).unwrap();
        assert_eq!(first.changed, 2);
        assert!(first.is_success());

        let git_root = temp.path().join("git");
        let snapshot: Vec<_> = std::fs::read_dir(&git_root)
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();

        let second = pipeline.run_stage(Stage::Setup, &modules).unwrap();
        assert_eq!(second.changed, 0);
        assert!(second.is_success());
        let again: Vec<_> = std::fs::read_dir(&git_root)
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(snapshot.len(), again.len());
    }

    #[test]
    fn clone_failure_is_isolated() {
        let temp = tempdir().unwrap();
        let mut pipeline = pipeline(config(&temp, None), Rc::new(FakeRunner::new(emulator)), None);
        let modules = records(&["trytond-a", "trytond-broken", "trytond-c"]);

        let report = pipeline.run_stage(Stage::CloneAll, &modules).unwrap();

        assert_eq!(report.processed, 3);
        assert_eq!(report.changed, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].module.as_str(), "trytond-broken");
        assert!(matches!(
            report.failures[0].error,
            StageError::Cache(CacheError::Clone { .. })
        ));
        assert!(pipeline.cache().has_source(&"trytond-a".parse().unwrap()));
        assert!(pipeline.cache().has_source(&"trytond-c".parse().unwrap()));
        assert!(!temp.path().join("hg").join("trytond-broken").exists());
    }

    #[test]
    fn full_run_skips_failed_modules_downstream() {
        let temp = tempdir().unwrap();
        let runner = Rc::new(FakeRunner::new(emulator));
        let mut pipeline = pipeline(config(&temp, None), runner.clone(), None);
        let modules = records(&["trytond-a", "trytond-broken"]);

        let reports = pipeline.run_all(&modules).unwrap();
        let stages: Vec<Stage> = reports.iter().map(|r| r.stage).collect();
        assert_eq!(
            stages,
            vec![
                Stage::Setup,
                Stage::CloneAll,
                Stage::PullAll,
                Stage::HgToGit,
                Stage::PushToRemotes
            ]
        );

        let total_failures: usize = reports.iter().map(|r| r.failures.len()).sum();
        assert_eq!(total_failures, 1);
        for report in &reports[2..] {
            assert_eq!(report.skipped, 1, "{}", report);
        }

        let mirror_pushes: Vec<String> = runner
            .rendered_calls()
            .into_iter()
            .filter(|c| c.contains("--mirror"))
            .collect();
        assert_eq!(mirror_pushes.len(), 1);
        assert!(mirror_pushes[0].ends_with("git@github.com:acme/trytond-a.git"));
    }

    #[test]
    fn untranslated_modules_are_not_pushed() {
        let temp = tempdir().unwrap();
        let runner = Rc::new(FakeRunner::succeeding());
        let mut pipeline = pipeline(config(&temp, None), runner.clone(), None);
        let modules = records(&["trytond-a"]);

        pipeline.run_stage(Stage::Setup, &modules).unwrap();
        let report = pipeline.run_stage(Stage::PushToRemotes, &modules).unwrap();

        assert_eq!(report.skipped, 1);
        assert!(report.is_success());
        assert!(runner.calls.borrow().is_empty());
    }

    #[test]
    fn push_failure_is_reported_per_module() {
        let temp = tempdir().unwrap();
        let runner = Rc::new(FakeRunner::new(|_| Ok(CommandOutput::with_code(128))));
        let mut pipeline = pipeline(config(&temp, None), runner, None);
        let modules = records(&["trytond-a", "trytond-b"]);
        pipeline.run_stage(Stage::Setup, &modules).unwrap();
        commit_ref(&temp.path().join("git").join("trytond-a"), "refs/heads/develop", "x");

        let report = pipeline.run_stage(Stage::PushToRemotes, &modules).unwrap();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.skipped, 1);
        assert!(matches!(&report.failures[0].error, StageError::Push(errors) if errors.len() == 1));
    }

    #[test]
    fn provisioning_runs_before_push_with_token() {
        let temp = tempdir().unwrap();
        let forge = FakeForge::new();
        let mut pipeline = pipeline(
            config(&temp, Some("t0ken")),
            Rc::new(FakeRunner::new(emulator)),
            Some(forge.clone()),
        );
        let modules = records(&["trytond-a", "python-b"]);

        let reports = pipeline.run_all(&modules).unwrap();
        let provision = reports
            .iter()
            .position(|r| r.stage == Stage::CreateMissingRepos)
            .unwrap();
        let push = reports
            .iter()
            .position(|r| r.stage == Stage::PushToRemotes)
            .unwrap();
        assert!(provision < push);
        assert_eq!(reports[provision].changed, 2);

        let state = forge.state.borrow();
        assert_eq!(state.creates.len(), 2);
        assert_eq!(state.creates[0].homepage, "https://bitbucket.org/acme/trytond-a");
    }

    #[test]
    fn provisioning_pass_is_idempotent() {
        let temp = tempdir().unwrap();
        let forge = FakeForge::new();
        let mut pipeline = pipeline(
            config(&temp, Some("t0ken")),
            Rc::new(FakeRunner::succeeding()),
            Some(forge.clone()),
        );
        let modules = records(&["trytond-a", "python-b"]);

        pipeline.run_stage(Stage::CreateMissingRepos, &modules).unwrap();
        let mutations = forge.state.borrow().mutations();
        let second = pipeline.run_stage(Stage::CreateMissingRepos, &modules).unwrap();

        assert_eq!(second.changed, 0);
        assert_eq!(forge.state.borrow().mutations(), mutations);
        assert_eq!(forge.state.borrow().list_calls, 2);
    }

    #[test]
    fn lock_contention_is_a_module_failure() {
        let temp = tempdir().unwrap();
        let config = config(&temp, None);
        let runner = Rc::new(FakeRunner::succeeding());
        let cache = LocalCache::new(
            CachePaths::from_config(&config),
            HgCli::new(runner.clone()),
            GitCli::new(runner),
        )
        .with_lock_timeout(std::time::Duration::from_millis(20));
        let held = crate::cache::ModuleLock::acquire(
            &CachePaths::from_config(&config).lock_path(&"trytond-a".parse().unwrap()),
            std::time::Duration::ZERO,
        )
        .unwrap();
        let mut pipeline = Pipeline::new(config, cache, None);

        let report = pipeline
            .run_stage(Stage::Setup, &records(&["trytond-a", "trytond-b"]))
            .unwrap();
        assert_eq!(report.failures.len(), 1);
        assert!(matches!(
            report.failures[0].error,
            StageError::Cache(CacheError::LockFailed(_))
        ));
        assert_eq!(report.changed, 1);
        drop(held);
    }

    #[test]
    fn shutdown_stops_between_modules() {
        let temp = tempdir().unwrap();
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = shutdown.clone();
        // The first clone "receives" the interrupt.
        let runner = Rc::new(FakeRunner::new(move |inv| {
            flag.store(true, Ordering::SeqCst);
            emulator(inv)
        }));
        let mut pipeline =
            pipeline(config(&temp, None), runner.clone(), None).with_shutdown(shutdown);
        let modules = records(&["trytond-a", "trytond-b", "trytond-c"]);

        let reports = pipeline.run_all(&modules).unwrap();

        let stages: Vec<Stage> = reports.iter().map(|r| r.stage).collect();
        assert_eq!(stages, vec![Stage::Setup, Stage::CloneAll]);
        let clone = &reports[1];
        assert!(clone.interrupted);
        assert_eq!(clone.changed, 1);
        assert_eq!(clone.skipped, 2);
        assert_eq!(runner.calls.borrow().len(), 1);
        assert!(clone.to_string().ends_with("[interrupted]"));
    }

    #[test]
    fn report_lists_failed_modules() {
        let mut report = StageReport::new(Stage::CloneAll);
        report.processed = 3;
        report.changed = 2;
        report.failures.push(ModuleFailure {
            module: "trytond-b".parse().unwrap(),
            error: StageError::Cache(CacheError::LockFailed("trytond-b".parse().unwrap())),
        });
        assert_eq!(
            report.to_string(),
            "clone_all: 3 modules, 2 changed, 0 skipped, 1 failed (trytond-b)"
        );
    }
}

//! Mercurial CLI wrapper.

use std::path::Path;
use std::rc::Rc;

use super::{CommandOutput, CommandRunner, Invocation, VcsError, validate_arg};

/// Mercurial CLI wrapper.
///
/// Every command runs quietly; repository-scoped commands use `--cwd`.
#[derive(Clone)]
pub struct HgCli {
    hg_path: String,
    runner: Rc<dyn CommandRunner>,
}

impl HgCli {
    /// Create a wrapper around the system `hg`.
    pub fn new(runner: Rc<dyn CommandRunner>) -> Self {
        Self {
            hg_path: "hg".into(),
            runner,
        }
    }

    /// Use a specific `hg` binary.
    pub fn with_binary(mut self, hg_path: impl Into<String>) -> Self {
        self.hg_path = hg_path.into();
        self
    }

    pub fn binary(&self) -> &str {
        &self.hg_path
    }

    fn command(&self) -> Invocation {
        Invocation::new(&self.hg_path)
    }

    fn in_repo(&self, repo: &Path) -> Invocation {
        self.command().path_flag("--cwd", repo)
    }

    fn run(&self, invocation: &Invocation) -> Result<CommandOutput, VcsError> {
        Ok(self.runner.run(invocation)?)
    }

    fn run_checked(&self, invocation: &Invocation) -> Result<CommandOutput, VcsError> {
        let output = self.run(invocation)?;
        if !output.success() {
            return Err(VcsError::failed(invocation, &output));
        }
        Ok(output)
    }

    /// Full clone of `url` into `dest`.
    ///
    /// A destination directory created by a failed clone is removed so that
    /// later stages never see a half-populated working copy.
    pub fn clone_repo(&self, url: &str, dest: &Path) -> Result<(), VcsError> {
        validate_arg(url, "url")?;

        let dest_existed = dest.exists();

        if let Some(parent) = dest.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let invocation = self.command().args(["clone", "-q"]).arg(url).arg(dest);
        let result = self.run_checked(&invocation);

        if result.is_err() && !dest_existed && dest.exists() {
            if let Err(e) = std::fs::remove_dir_all(dest) {
                log::warn!(
                    "failed to remove partial clone {}: {}",
                    dest.display(),
                    e
                );
            }
        }

        result.map(|_| ())
    }

    /// `hg pull -u`: fetch new changesets and update the working copy.
    pub fn pull_update(&self, repo: &Path) -> Result<(), VcsError> {
        let invocation = self.in_repo(repo).args(["pull", "-u", "-q"]);
        self.run_checked(&invocation).map(|_| ())
    }

    /// Names of the open named branches, in Mercurial's listing order.
    pub fn branches(&self, repo: &Path) -> Result<Vec<String>, VcsError> {
        let invocation = self.in_repo(repo).args(["branches", "-T", "{branch}\\n"]);
        let output = self.run_checked(&invocation)?;

        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect())
    }

    /// Create or move `bookmark` to the head of named branch `branch`.
    ///
    /// A bare name given to `-r` is looked up as a revision number, bookmark
    /// or tag before it is tried as a branch, so the branch goes through a
    /// revset instead.
    pub fn bookmark_branch_head(
        &self,
        repo: &Path,
        branch: &str,
        bookmark: &str,
    ) -> Result<(), VcsError> {
        validate_arg(branch, "branch")?;
        validate_arg(bookmark, "bookmark")?;

        let invocation = self
            .in_repo(repo)
            .args(["bookmark", "-f", "-r"])
            .arg(branch_head_revset(branch))
            .arg(bookmark);
        self.run_checked(&invocation).map(|_| ())
    }

    /// Push the repository to `dest`.
    ///
    /// The raw output is returned because `hg push` uses exit code 1 for
    /// "nothing to push"; callers decide what counts as failure.
    pub fn push(&self, repo: &Path, dest: &Path) -> Result<CommandOutput, VcsError> {
        let invocation = self.in_repo(repo).args(["push", "-q"]).arg(dest);
        let output = self.run(&invocation)?;
        log::debug!("{} exited with {:?}", invocation, output.code);
        Ok(output)
    }

    /// `hg version`, used by `doctor`.
    pub fn version(&self) -> Result<String, VcsError> {
        let output = self.run_checked(&self.command().args(["version", "-q"]))?;
        Ok(output.stdout.trim().to_string())
    }

    /// Whether the hg-git extension can be loaded.
    pub fn has_hggit(&self) -> bool {
        let invocation = self
            .command()
            .args(["--config", "extensions.hggit=", "help", "-e", "hggit"]);
        matches!(self.run(&invocation), Ok(out) if out.success())
    }
}

/// `max(branch("literal:<branch>"))`, quoted for the revset parser.
fn branch_head_revset(branch: &str) -> String {
    let mut quoted = String::with_capacity(branch.len());
    for c in branch.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    format!("max(branch(\"literal:{}\"))", quoted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vcs::fake::{FakeRunner, has_arg};
    use std::path::PathBuf;

    fn hg_with(runner: &Rc<FakeRunner>) -> HgCli {
        HgCli::new(runner.clone())
    }

    #[test]
    fn clone_builds_quiet_clone_command() {
        let runner = Rc::new(FakeRunner::succeeding());
        let temp = tempfile::tempdir().unwrap();
        let dest = temp.path().join("hg").join("trytond-sale");

        hg_with(&runner)
            .clone_repo("https://bitbucket.org/acme/trytond-sale", &dest)
            .unwrap();

        let calls = runner.rendered_calls();
        assert_eq!(
            calls,
            vec![format!(
                "hg clone -q https://bitbucket.org/acme/trytond-sale {}",
                dest.display()
            )]
        );
        assert!(dest.parent().unwrap().is_dir(), "parent should be created");
    }

    #[test]
    fn failed_clone_removes_partial_directory() {
        let runner = Rc::new(FakeRunner::new(|inv| {
            // Simulate hg creating the destination before aborting.
            let dest = PathBuf::from(inv.args.last().unwrap());
            std::fs::create_dir_all(dest.join(".hg")).unwrap();
            Ok(CommandOutput::with_code(255))
        }));
        let temp = tempfile::tempdir().unwrap();
        let dest = temp.path().join("trytond-sale");

        let err = hg_with(&runner)
            .clone_repo("https://example.invalid/repo", &dest)
            .unwrap_err();

        assert!(matches!(err, VcsError::Failed { code: Some(255), .. }));
        assert!(!dest.exists(), "partial clone must be removed");
    }

    #[test]
    fn clone_rejects_flag_like_url() {
        let runner = Rc::new(FakeRunner::succeeding());
        let temp = tempfile::tempdir().unwrap();

        let result = hg_with(&runner).clone_repo("--config=x", &temp.path().join("m"));
        assert!(matches!(result, Err(VcsError::InvalidInput(_))));
        assert!(runner.calls.borrow().is_empty());
    }

    #[test]
    fn branches_parses_template_output() {
        let runner = Rc::new(FakeRunner::new(|inv| {
            assert!(has_arg(inv, "branches"));
            let mut out = CommandOutput::with_code(0);
            out.stdout = "default\n3.8\n\n  4.0  \n".to_string();
            Ok(out)
        }));

        let branches = hg_with(&runner).branches(Path::new("hg/m")).unwrap();
        assert_eq!(branches, vec!["default", "3.8", "4.0"]);
        assert_eq!(
            runner.rendered_calls(),
            vec!["hg --cwd=hg/m branches -T {branch}\\n"]
        );
    }

    #[test]
    fn bookmark_targets_branch_head_revset() {
        let runner = Rc::new(FakeRunner::succeeding());
        hg_with(&runner)
            .bookmark_branch_head(Path::new("hg/m"), "default", "develop_bookmark")
            .unwrap();
        assert_eq!(
            runner.rendered_calls(),
            vec![r#"hg --cwd=hg/m bookmark -f -r max(branch("literal:default")) develop_bookmark"#]
        );
    }

    #[test]
    fn numeric_and_quoted_branch_names_stay_branches() {
        assert_eq!(branch_head_revset("42"), r#"max(branch("literal:42"))"#);
        assert_eq!(
            branch_head_revset(r#"fix "x"\y"#),
            r#"max(branch("literal:fix \"x\"\\y"))"#
        );
    }

    #[test]
    fn push_returns_raw_exit_code() {
        let runner = Rc::new(FakeRunner::new(|_| Ok(CommandOutput::with_code(1))));
        let out = hg_with(&runner)
            .push(Path::new("hg/m"), Path::new("/abs/git/m"))
            .unwrap();
        assert_eq!(out.code, Some(1));
        assert_eq!(
            runner.rendered_calls(),
            vec!["hg --cwd=hg/m push -q /abs/git/m"]
        );
    }

    #[test]
    fn pull_failure_is_error() {
        let runner = Rc::new(FakeRunner::new(|_| Ok(CommandOutput::with_code(255))));
        let err = hg_with(&runner).pull_update(Path::new("hg/m")).unwrap_err();
        assert!(matches!(err, VcsError::Failed { code: Some(255), .. }));
    }

    #[test]
    fn custom_binary() {
        let runner = Rc::new(FakeRunner::succeeding());
        let hg = hg_with(&runner).with_binary("/opt/hg/bin/hg");
        assert_eq!(hg.binary(), "/opt/hg/bin/hg");
        hg.pull_update(Path::new("m")).unwrap();
        assert_eq!(runner.calls.borrow()[0].program, "/opt/hg/bin/hg");
    }
}

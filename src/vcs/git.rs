//! Git operations using a hybrid CLI + libgit2 approach.
//!
//! **CLI (with hardening) for network operations:**
//! - `push_mirror` - uses the user's ssh agent and credential helpers
//!
//! **libgit2 for local operations:**
//! - `init_bare` - create the bare target repositories
//! - `list_refs` - read the ref set of a target repository
//! - `repository_exists` - simple path validation

use std::path::Path;
use std::rc::Rc;

use git2::Repository;

use super::{CommandRunner, Invocation, VcsError, validate_arg};
use crate::types::RemoteTarget;

/// One reference of a repository, `name -> target`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct RefEntry {
    pub name: String,
    /// Object id, or the target name of a symbolic reference.
    pub target: String,
}

/// Git CLI wrapper with security hardening.
#[derive(Clone)]
pub struct GitCli {
    git_path: String,
    runner: Rc<dyn CommandRunner>,
}

impl GitCli {
    /// Create a new GitCli instance using the system git.
    pub fn new(runner: Rc<dyn CommandRunner>) -> Self {
        Self {
            git_path: "git".into(),
            runner,
        }
    }

    /// Use a specific `git` binary.
    pub fn with_binary(mut self, git_path: impl Into<String>) -> Self {
        self.git_path = git_path.into();
        self
    }

    pub fn binary(&self) -> &str {
        &self.git_path
    }

    /// Create a hardened command.
    ///
    /// `core.hooksPath=` disables hook execution.
    fn command(&self) -> Invocation {
        Invocation::new(&self.git_path).args(["-c", "core.hooksPath="])
    }

    /// Initialize an empty bare repository at `path`.
    pub fn init_bare(&self, path: &Path) -> Result<(), VcsError> {
        Repository::init_bare(path)?;
        Ok(())
    }

    /// Mirror-push every ref of `git_dir` to `remote`.
    ///
    /// The remote ref set becomes exactly the local one, deletions included.
    pub fn push_mirror(&self, git_dir: &Path, remote: &RemoteTarget) -> Result<(), VcsError> {
        validate_arg(&remote.url, "remote")?;

        let invocation = self
            .command()
            .path_flag("--git-dir", git_dir)
            .args(["push", "-q", "--mirror"])
            .arg(&remote.url);

        let output = self.runner.run(&invocation)?;
        if !output.success() {
            return Err(VcsError::failed(&invocation, &output));
        }

        Ok(())
    }

    /// `git --version`, used by `doctor`.
    pub fn version(&self) -> Result<String, VcsError> {
        let invocation = Invocation::new(&self.git_path).arg("--version");
        let output = self.runner.run(&invocation)?;
        if !output.success() {
            return Err(VcsError::failed(&invocation, &output));
        }
        Ok(output.stdout.trim().to_string())
    }
}

/// Open an existing repository at the given path.
pub fn open_repository(path: &Path) -> Result<Repository, VcsError> {
    let repo = Repository::open(path).map_err(|e| {
        if e.code() == git2::ErrorCode::NotFound {
            VcsError::NotFound(path.display().to_string())
        } else {
            VcsError::Git(e)
        }
    })?;
    Ok(repo)
}

/// Sorted list of every reference (excluding `HEAD`) in the repository.
pub fn list_refs(path: &Path) -> Result<Vec<RefEntry>, VcsError> {
    let repo = open_repository(path)?;
    let mut refs = Vec::new();

    for reference in repo.references()? {
        let reference = reference?;
        let Some(name) = reference.name() else {
            continue;
        };
        let target = match reference.target() {
            Some(oid) => oid.to_string(),
            None => reference.symbolic_target().unwrap_or_default().to_string(),
        };
        refs.push(RefEntry {
            name: name.to_string(),
            target,
        });
    }

    refs.sort();
    Ok(refs)
}

/// Check if a path contains a valid git repository.
pub fn repository_exists(path: &Path) -> bool {
    Repository::open(path).is_ok()
}

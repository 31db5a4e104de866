//! Local cache manager
//!
//! Owns the two on-disk trees: Mercurial working copies and bare git
//! repositories. Every operation is safe to re-run and safe to resume after
//! the process was killed half way.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use super::hgrc::{configure_git_bridge, has_default_path};
use super::{CachePaths, ModuleLock};
use crate::types::{ModuleName, ModuleRecord};
use crate::vcs::{GitCli, HgCli, VcsError, repository_exists};

/// Errors returned by cache operations.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Cloning the source repository failed.
    #[error("clone of {module} failed: {source}")]
    Clone {
        module: ModuleName,
        #[source]
        source: VcsError,
    },
    /// Pulling into an existing working copy failed.
    #[error("pull of {module} failed: {source}")]
    Pull {
        module: ModuleName,
        #[source]
        source: VcsError,
    },
    /// Creating a bare target repository failed.
    #[error("failed to initialize {}: {source}", path.display())]
    Init {
        path: PathBuf,
        #[source]
        source: VcsError,
    },
    /// Another process holds the module's lock.
    #[error("{0} is locked by another process")]
    LockFailed(ModuleName),
    /// An underlying IO operation failed.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Cache manager for source working copies and bare target repositories.
pub struct LocalCache {
    paths: CachePaths,
    hg: HgCli,
    git: GitCli,
    lock_timeout: Duration,
}

impl LocalCache {
    pub fn new(paths: CachePaths, hg: HgCli, git: GitCli) -> Self {
        Self {
            paths,
            hg,
            git,
            lock_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn paths(&self) -> &CachePaths {
        &self.paths
    }

    pub fn hg(&self) -> &HgCli {
        &self.hg
    }

    pub fn git(&self) -> &GitCli {
        &self.git
    }

    /// Create the cache roots and the lock directory if absent.
    pub fn ensure_roots(&self) -> Result<(), CacheError> {
        std::fs::create_dir_all(self.paths.hg_root())?;
        std::fs::create_dir_all(self.paths.git_root())?;
        std::fs::create_dir_all(self.paths.lock_dir())?;
        Ok(())
    }

    /// Create an empty bare repository for `name` unless one exists.
    ///
    /// Returns `true` when a repository was created. A directory left behind
    /// by an interrupted init is initialized again in place.
    pub fn init_target(&self, name: &ModuleName) -> Result<bool, CacheError> {
        let path = self.paths.target_dir(name);
        if repository_exists(&path) {
            return Ok(false);
        }

        self.git
            .init_bare(&path)
            .map_err(|source| CacheError::Init {
                path: path.clone(),
                source,
            })?;
        log::info!("initialized bare repository {}", path.display());
        Ok(true)
    }

    /// Whether a complete working copy exists for `name`.
    pub fn has_source(&self, name: &ModuleName) -> bool {
        self.paths.source_dir(name).join(".hg").is_dir()
            && has_default_path(&self.paths.hgrc_path(name))
    }

    /// Whether the bare target repository exists for `name`.
    pub fn has_target(&self, name: &ModuleName) -> bool {
        repository_exists(&self.paths.target_dir(name))
    }

    /// Clone the source repository unless a working copy already exists.
    ///
    /// Returns `true` when a clone was performed. The clone is made in a
    /// staging directory and renamed into place once it is configured, so a
    /// process killed half way leaves nothing that looks cloned. Leftovers of
    /// such a run are removed before cloning again.
    pub fn clone_or_skip(&self, record: &ModuleRecord) -> Result<bool, CacheError> {
        let name = &record.name;
        if self.has_source(name) {
            log::debug!("{} already cloned", name);
            return Ok(false);
        }

        let dest = self.paths.source_dir(name);
        if dest.exists() {
            log::warn!(
                "{} holds no complete working copy, removing before cloning",
                dest.display()
            );
            std::fs::remove_dir_all(&dest)?;
        }
        let staging = self.paths.partial_source_dir(name);
        if staging.exists() {
            log::warn!("removing interrupted clone {}", staging.display());
            std::fs::remove_dir_all(&staging)?;
        }

        log::info!("cloning {} from {}", name, record.source_url);
        self.hg
            .clone_repo(&record.source_url, &staging)
            .map_err(|source| CacheError::Clone {
                module: name.clone(),
                source,
            })?;

        let published = configure_git_bridge(&staging.join(".hg").join("hgrc"))
            .and_then(|()| std::fs::rename(&staging, &dest));
        if let Err(e) = published {
            let _ = std::fs::remove_dir_all(&staging);
            return Err(CacheError::Clone {
                module: name.clone(),
                source: VcsError::Io(e),
            });
        }

        Ok(true)
    }

    /// Enable hg-git and the bookmark suffix in the working copy's hgrc.
    ///
    /// Writes only when something changes.
    pub fn configure_bridge(&self, name: &ModuleName) -> io::Result<()> {
        configure_git_bridge(&self.paths.hgrc_path(name))
    }

    /// Pull and update the working copy. Returns `false` if there is none.
    pub fn pull(&self, name: &ModuleName) -> Result<bool, CacheError> {
        if !self.has_source(name) {
            return Ok(false);
        }

        self.hg
            .pull_update(&self.paths.source_dir(name))
            .map_err(|source| CacheError::Pull {
                module: name.clone(),
                source,
            })?;
        Ok(true)
    }

    /// Take the exclusive lock on a module's pair of directories.
    pub fn lock(&self, name: &ModuleName) -> Result<ModuleLock, CacheError> {
        let lock_path = self.paths.lock_path(name);
        match ModuleLock::acquire(&lock_path, self.lock_timeout) {
            Ok(lock) => Ok(lock),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                Err(CacheError::LockFailed(name.clone()))
            }
            Err(e) => Err(CacheError::Io(e)),
        }
    }
}

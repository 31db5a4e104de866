//! Cache directory path management
//!
//! This module provides the `CachePaths` struct which manages all filesystem paths
//! for the cache directory layout:
//!
//! ```text
//! <hg_cache>/
//! └── <module>/            # Mercurial working copy (.hg/hgrc enables hg-git)
//! <git_cache>/
//! └── <module>/            # Bare git repository
//! <lock_dir>/
//! └── <module>.lock        # flock-based locking
//! ```

use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::types::ModuleName;

/// Manages all filesystem paths for the cache directory layout
#[derive(Debug, Clone)]
pub struct CachePaths {
    hg_root: PathBuf,
    git_root: PathBuf,
    lock_dir: PathBuf,
}

impl CachePaths {
    /// Creates a new CachePaths from the three roots
    pub fn new(
        hg_root: impl Into<PathBuf>,
        git_root: impl Into<PathBuf>,
        lock_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            hg_root: hg_root.into(),
            git_root: git_root.into(),
            lock_dir: lock_dir.into(),
        }
    }

    /// Creates a CachePaths from the pipeline configuration
    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.hg_cache, &config.git_cache, &config.lock_dir)
    }

    /// Returns the root of the Mercurial working copies
    pub fn hg_root(&self) -> &Path {
        &self.hg_root
    }

    /// Returns the root of the bare git repositories
    pub fn git_root(&self) -> &Path {
        &self.git_root
    }

    /// Returns the lock directory
    pub fn lock_dir(&self) -> &Path {
        &self.lock_dir
    }

    /// Returns the working copy directory: `{hg_root}/{module}`
    pub fn source_dir(&self, name: &ModuleName) -> PathBuf {
        self.hg_root.join(name.as_str())
    }

    /// Returns the staging directory a clone is made in before it is moved
    /// into place: `{hg_root}/.{module}.partial`
    ///
    /// Module names never start with `.`, so this cannot name a module.
    pub fn partial_source_dir(&self, name: &ModuleName) -> PathBuf {
        self.hg_root.join(format!(".{}.partial", name.as_str()))
    }

    /// Returns the hgrc of a working copy: `{hg_root}/{module}/.hg/hgrc`
    pub fn hgrc_path(&self, name: &ModuleName) -> PathBuf {
        self.source_dir(name).join(".hg").join("hgrc")
    }

    /// Returns the bare repository directory: `{git_root}/{module}`
    pub fn target_dir(&self, name: &ModuleName) -> PathBuf {
        self.git_root.join(name.as_str())
    }

    /// Returns the lock file path: `{lock_dir}/{module}.lock`
    pub fn lock_path(&self, name: &ModuleName) -> PathBuf {
        self.lock_dir.join(format!("{}.lock", name.as_str()))
    }
}

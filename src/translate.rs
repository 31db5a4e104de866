//! Branch translation: Mercurial named branches to git branches.
//!
//! hg-git exports bookmarks, not named branches, so every branch gets a
//! bookmark carrying the configured suffix (which hg-git strips again):
//! `default` becomes `develop_bookmark` (git `develop`), any other branch `B`
//! becomes `B_bookmark` (git `B`). The working copy is then pushed into the
//! bare target repository through the bridge.

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::cache::{BOOKMARK_SUFFIX, CacheError, LocalCache};
use crate::types::ModuleName;
use crate::vcs::{VcsError, validate_arg};

/// The Mercurial branch every repository has.
pub const DEFAULT_BRANCH: &str = "default";
/// Git branch the default branch is exported as.
pub const DEFAULT_GIT_BRANCH: &str = "develop";

/// Bookmark standing for `branch`.
pub fn bookmark_name(branch: &str) -> String {
    if branch == DEFAULT_BRANCH {
        format!("{}{}", DEFAULT_GIT_BRANCH, BOOKMARK_SUFFIX)
    } else {
        format!("{}{}", branch, BOOKMARK_SUFFIX)
    }
}

/// Bookmark name to branch, recomputed from the current branch set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BranchBookmarkMap {
    entries: BTreeMap<String, String>,
}

impl BranchBookmarkMap {
    /// Build the map for `branches`.
    ///
    /// Branches that cannot be passed to `hg` safely are skipped, as is a
    /// branch whose bookmark is already taken (`develop` loses to `default`).
    pub fn from_branches<S: AsRef<str>>(branches: &[S]) -> Self {
        let mut entries = BTreeMap::new();

        let names: Vec<&str> = branches.iter().map(|b| b.as_ref()).collect();
        let ordered = names
            .iter()
            .filter(|b| **b == DEFAULT_BRANCH)
            .chain(names.iter().filter(|b| **b != DEFAULT_BRANCH))
            .copied();

        for branch in ordered {
            if let Err(e) = validate_arg(branch, "branch") {
                log::warn!("skipping branch {:?}: {}", branch, e);
                continue;
            }
            let bookmark = bookmark_name(branch);
            if let Some(owner) = entries.get(&bookmark) {
                if owner != branch {
                    log::warn!(
                        "branch {} would overwrite bookmark {} of branch {}, skipping",
                        branch,
                        bookmark,
                        owner
                    );
                }
                continue;
            }
            entries.insert(bookmark, branch.to_string());
        }

        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    fn get(&self, bookmark: &str) -> Option<&str> {
        self.entries.get(bookmark).map(String::as_str)
    }

    /// `(bookmark, branch)` pairs in bookmark order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(b, r)| (b.as_str(), r.as_str()))
    }
}

/// Result of a bridge push that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeOutcome {
    Transferred,
    /// `hg push` exits 1 when there was nothing to push.
    UpToDate,
}

/// Exit code policy of `hg push`: 0 and 1 succeed, anything else fails.
pub fn classify_bridge_push(code: Option<i32>) -> Option<BridgeOutcome> {
    match code {
        Some(0) => Some(BridgeOutcome::Transferred),
        Some(1) => Some(BridgeOutcome::UpToDate),
        _ => None,
    }
}

#[derive(Error, Debug)]
pub enum TranslationError {
    #[error("{0} has no working copy")]
    MissingSource(ModuleName),
    #[error("failed to configure the git bridge for {module}: {source}")]
    Configure {
        module: ModuleName,
        #[source]
        source: io::Error,
    },
    #[error("failed to prepare the target repository of {module}: {source}")]
    Target {
        module: ModuleName,
        #[source]
        source: CacheError,
    },
    #[error("failed to list branches of {module}: {source}")]
    Branches {
        module: ModuleName,
        #[source]
        source: VcsError,
    },
    #[error("failed to set bookmark {bookmark} in {module}: {source}")]
    Bookmark {
        module: ModuleName,
        bookmark: String,
        #[source]
        source: VcsError,
    },
    #[error("bridge push of {module} failed (exit code: {code:?}): {stderr}")]
    Push {
        module: ModuleName,
        code: Option<i32>,
        stderr: String,
    },
    #[error("bridge push of {module} could not run: {source}")]
    Spawn {
        module: ModuleName,
        #[source]
        source: VcsError,
    },
}

/// Converts one working copy into its bare target repository.
pub struct Translator<'a> {
    cache: &'a LocalCache,
}

impl<'a> Translator<'a> {
    pub fn new(cache: &'a LocalCache) -> Self {
        Self { cache }
    }

    fn target_path(&self, name: &ModuleName) -> Result<PathBuf, TranslationError> {
        std::path::absolute(self.cache.paths().target_dir(name)).map_err(|source| {
            TranslationError::Spawn {
                module: name.clone(),
                source: VcsError::Io(source),
            }
        })
    }

    /// Bookmark every named branch and push through hg-git.
    ///
    /// Safe to repeat: bookmarks are force-moved and an unchanged repository
    /// pushes nothing.
    pub fn translate(&self, name: &ModuleName) -> Result<BridgeOutcome, TranslationError> {
        if !self.cache.has_source(name) {
            return Err(TranslationError::MissingSource(name.clone()));
        }

        self.cache
            .configure_bridge(name)
            .map_err(|source| TranslationError::Configure {
                module: name.clone(),
                source,
            })?;
        self.cache
            .init_target(name)
            .map_err(|source| TranslationError::Target {
                module: name.clone(),
                source,
            })?;

        let hg = self.cache.hg();
        let repo = self.cache.paths().source_dir(name);

        let branches = hg
            .branches(&repo)
            .map_err(|source| TranslationError::Branches {
                module: name.clone(),
                source,
            })?;
        let map = BranchBookmarkMap::from_branches(branches.as_slice());
        log::debug!("{}: {} branches, {} bookmarks", name, branches.len(), map.len());

        for (bookmark, branch) in map.iter() {
            hg.bookmark_branch_head(&repo, branch, bookmark)
                .map_err(|source| TranslationError::Bookmark {
                    module: name.clone(),
                    bookmark: bookmark.to_string(),
                    source,
                })?;
        }

        let target = self.target_path(name)?;
        let output = hg
            .push(&repo, &target)
            .map_err(|source| TranslationError::Spawn {
                module: name.clone(),
                source,
            })?;

        match classify_bridge_push(output.code) {
            Some(outcome) => {
                log::info!("translated {} ({:?})", name, outcome);
                Ok(outcome)
            }
            None => Err(TranslationError::Push {
                module: name.clone(),
                code: output.code,
                stderr: output.stderr.trim().to_string(),
            }),
        }
    }
}

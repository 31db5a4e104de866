//! Mirror pushes of translated repositories.

use thiserror::Error;

use crate::cache::LocalCache;
use crate::config::Config;
use crate::types::{ModuleName, RemoteTarget};
use crate::vcs::{VcsError, list_refs};

#[derive(Error, Debug)]
pub enum PushError {
    #[error("push of {module} to {remote} failed: {source}")]
    Remote {
        module: ModuleName,
        remote: RemoteTarget,
        #[source]
        source: VcsError,
    },
    /// A mirror push of an empty repository would delete every remote ref.
    #[error("{0} has not been translated yet")]
    NotTranslated(ModuleName),
    #[error("cannot read refs of {module}: {source}")]
    Refs {
        module: ModuleName,
        #[source]
        source: VcsError,
    },
}

/// Pushes a module's bare repository to each of its remotes.
pub struct PushFanout<'a> {
    config: &'a Config,
    cache: &'a LocalCache,
}

impl<'a> PushFanout<'a> {
    pub fn new(config: &'a Config, cache: &'a LocalCache) -> Self {
        Self { config, cache }
    }

    /// Whether the target repository holds at least one ref.
    pub fn is_translated(&self, name: &ModuleName) -> Result<bool, PushError> {
        if !self.cache.has_target(name) {
            return Ok(false);
        }
        let refs = list_refs(&self.cache.paths().target_dir(name)).map_err(|source| {
            PushError::Refs {
                module: name.clone(),
                source,
            }
        })?;
        Ok(!refs.is_empty())
    }

    /// Mirror-push `name` to the default remote and every configured extra.
    ///
    /// One result per remote, in order; a failing remote does not stop the
    /// others. An untranslated module yields a single `NotTranslated` error
    /// and nothing is pushed.
    pub fn push_all(&self, name: &ModuleName) -> Vec<Result<RemoteTarget, PushError>> {
        match self.is_translated(name) {
            Ok(true) => {}
            Ok(false) => return vec![Err(PushError::NotTranslated(name.clone()))],
            Err(e) => return vec![Err(e)],
        }

        let git_dir = self.cache.paths().target_dir(name);
        self.config
            .remotes_for(name)
            .into_iter()
            .map(|remote| {
                log::info!("pushing {} to {}", name, remote);
                match self.cache.git().push_mirror(&git_dir, &remote) {
                    Ok(()) => Ok(remote),
                    Err(source) => {
                        log::warn!("push of {} to {} failed: {}", name, remote, source);
                        Err(PushError::Remote {
                            module: name.clone(),
                            remote,
                            source,
                        })
                    }
                }
            })
            .collect()
    }
}

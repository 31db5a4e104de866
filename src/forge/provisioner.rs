//! Create-if-missing and metadata reconciliation of mirror repositories.

use std::collections::HashMap;

use super::{Forge, NewRepo, ProvisionError, RemoteRepo, RepoPatch};
use crate::types::ModuleName;

/// What [`Provisioner::ensure_repo`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionAction {
    Created,
    Updated(RepoPatch),
    Unchanged,
}

impl ProvisionAction {
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

/// Ensures one repository per module exists on the forge.
///
/// The forge listing is fetched at most once per pass and kept up to date
/// with the repositories created or corrected during the pass. A failed
/// listing is cached too, so every module of the pass reports it.
pub struct Provisioner {
    forge: Box<dyn Forge>,
    existing: Option<Result<HashMap<String, RemoteRepo>, ProvisionError>>,
}

impl Provisioner {
    pub fn new(forge: Box<dyn Forge>) -> Self {
        Self {
            forge,
            existing: None,
        }
    }

    pub fn forge_name(&self) -> &'static str {
        self.forge.name()
    }

    /// Forget the cached listing; the next call starts a new pass.
    pub fn begin_pass(&mut self) {
        self.existing = None;
    }

    fn existing(&mut self) -> Result<&mut HashMap<String, RemoteRepo>, ProvisionError> {
        let forge = &self.forge;
        let listing = self.existing.get_or_insert_with(|| {
            log::info!("listing existing repositories on {}", forge.name());
            forge.list_existing().map(|repos| {
                repos
                    .into_iter()
                    .map(|repo| (repo.name.to_ascii_lowercase(), repo))
                    .collect()
            })
        });

        match listing {
            Ok(map) => Ok(map),
            Err(e) => Err(e.clone()),
        }
    }

    /// Make sure `name` exists with wiki and issues disabled and the given
    /// homepage (where the forge has one).
    pub fn ensure_repo(
        &mut self,
        name: &ModuleName,
        homepage: &str,
    ) -> Result<ProvisionAction, ProvisionError> {
        let check_homepage = self.forge.supports_homepage();
        let key = name.as_str().to_ascii_lowercase();

        let current = self.existing()?.get(&key).cloned();

        match current {
            None => {
                log::info!("creating {} on {}", name, self.forge.name());
                let created = self.forge.create(&NewRepo::mirror_of(name.as_str(), homepage))?;
                self.existing()?.insert(key, created);
                Ok(ProvisionAction::Created)
            }
            Some(repo) => match RepoPatch::needed(&repo, homepage, check_homepage) {
                None => Ok(ProvisionAction::Unchanged),
                Some(patch) => {
                    log::info!("updating {} on {}: {:?}", name, self.forge.name(), patch);
                    self.forge.update(&repo, &patch)?;

                    let mut fixed = repo;
                    if let Some(homepage) = &patch.homepage {
                        fixed.homepage = Some(homepage.clone());
                    }
                    fixed.has_wiki &= !patch.disable_wiki;
                    fixed.has_issues &= !patch.disable_issues;
                    self.existing()?.insert(key, fixed);

                    Ok(ProvisionAction::Updated(patch))
                }
            },
        }
    }
}

//! Inventory of source modules.
//!
//! The forge listing is paged through lazily: a page is requested only when
//! the previous one has been consumed, and iteration stops once the number of
//! processed entries reaches the total the server reported on the first page.

mod bitbucket;

use std::collections::{HashSet, VecDeque};

use serde::Deserialize;
use thiserror::Error;

use crate::config::InventoryConfig;
use crate::types::{ModuleName, ModuleRecord, ParseError};

pub use bitbucket::{BitbucketClient, BitbucketRepository};

/// SCM kind handled by the pipeline.
const HG_SCM: &str = "hg";
/// Project key marking deprecated modules.
const DEPRECATED_PROJECT: &str = "DEP";
/// Clone link tag used for checkouts.
const CLONE_TRANSPORT: &str = "https";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    #[error("inventory endpoint unreachable (page {page}): {reason}")]
    Unreachable { page: u32, reason: String },
    #[error("inventory endpoint returned HTTP {status} for page {page}")]
    Status { page: u32, status: u16 },
    #[error("malformed inventory page {page}: {reason}")]
    Malformed { page: u32, reason: String },
}

/// One page of the listing. Entries stay undecoded so that a single bad
/// entry can be skipped without rejecting the page.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RepositoryPage {
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub values: Vec<serde_json::Value>,
}

/// Source of listing pages; page numbers start at 1.
pub trait PageSource {
    fn fetch_page(&self, page: u32) -> Result<RepositoryPage, DiscoveryError>;
}

/// Why a listing entry was not turned into a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Deprecated,
    Scm(String),
    Prefix,
    NoCloneLink,
    InvalidName(ParseError),
}

/// Per-entry filter policy.
#[derive(Debug, Clone)]
pub struct InventoryPolicy {
    pub scm: String,
    pub deprecated_project: String,
    pub prefixes: Vec<String>,
    pub transport: String,
}

impl InventoryPolicy {
    pub fn from_config(config: &InventoryConfig) -> Self {
        Self {
            scm: HG_SCM.to_string(),
            deprecated_project: DEPRECATED_PROJECT.to_string(),
            prefixes: config.prefixes.clone(),
            transport: CLONE_TRANSPORT.to_string(),
        }
    }

    pub fn select(&self, repo: &BitbucketRepository) -> Result<ModuleRecord, SkipReason> {
        if repo.project_key() == Some(self.deprecated_project.as_str()) {
            return Err(SkipReason::Deprecated);
        }
        if repo.scm != self.scm {
            return Err(SkipReason::Scm(repo.scm.clone()));
        }
        if !self.prefixes.iter().any(|p| repo.name.starts_with(p.as_str())) {
            return Err(SkipReason::Prefix);
        }

        let url = repo
            .clone_url(&self.transport)
            .ok_or(SkipReason::NoCloneLink)?;
        let name: ModuleName = repo.name.parse().map_err(SkipReason::InvalidName)?;

        Ok(ModuleRecord::new(name, url))
    }
}

/// The module inventory of one source owner.
pub struct Inventory<S> {
    source: S,
    policy: InventoryPolicy,
}

impl<S: PageSource> Inventory<S> {
    pub fn new(source: S, policy: InventoryPolicy) -> Self {
        Self { source, policy }
    }

    /// Lazily list the matching modules, restarting from page 1.
    pub fn list_modules(&self) -> Modules<'_, S> {
        Modules {
            source: &self.source,
            policy: &self.policy,
            page: 0,
            size: None,
            processed: 0,
            buffer: VecDeque::new(),
            seen: HashSet::new(),
            done: false,
        }
    }

    /// Collect the full inventory, failing on the first page error.
    pub fn collect(&self) -> Result<Vec<ModuleRecord>, DiscoveryError> {
        self.list_modules().collect()
    }
}

/// Iterator returned by [`Inventory::list_modules`].
pub struct Modules<'a, S> {
    source: &'a S,
    policy: &'a InventoryPolicy,
    page: u32,
    size: Option<u64>,
    processed: u64,
    buffer: VecDeque<(u32, serde_json::Value)>,
    seen: HashSet<ModuleName>,
    done: bool,
}

impl<S: PageSource> Modules<'_, S> {
    fn accept(&mut self, page: u32, value: serde_json::Value) -> Option<ModuleRecord> {
        let repo: BitbucketRepository = match serde_json::from_value(value) {
            Ok(repo) => repo,
            Err(e) => {
                log::warn!("skipping malformed inventory entry on page {}: {}", page, e);
                return None;
            }
        };

        match self.policy.select(&repo) {
            Ok(record) => {
                if self.seen.insert(record.name.clone()) {
                    Some(record)
                } else {
                    log::debug!("skipping duplicate inventory entry {}", record.name);
                    None
                }
            }
            Err(reason @ (SkipReason::NoCloneLink | SkipReason::InvalidName(_))) => {
                log::warn!("skipping {}: {:?}", repo.name, reason);
                None
            }
            Err(reason) => {
                log::debug!("filtered {}: {:?}", repo.name, reason);
                None
            }
        }
    }
}

impl<S: PageSource> Iterator for Modules<'_, S> {
    type Item = Result<ModuleRecord, DiscoveryError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((page, value)) = self.buffer.pop_front() {
                self.processed += 1;
                match self.accept(page, value) {
                    Some(record) => return Some(Ok(record)),
                    None => continue,
                }
            }

            if self.done {
                return None;
            }
            if let Some(size) = self.size {
                if self.processed >= size {
                    self.done = true;
                    return None;
                }
            }

            self.page += 1;
            let page = match self.source.fetch_page(self.page) {
                Ok(page) => page,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            };

            if self.size.is_none() {
                match page.size {
                    Some(size) => self.size = Some(size),
                    None => {
                        self.done = true;
                        return Some(Err(DiscoveryError::Malformed {
                            page: self.page,
                            reason: "missing size".to_string(),
                        }));
                    }
                }
            }

            if page.values.is_empty() {
                log::warn!(
                    "inventory page {} is empty after {} of {} entries",
                    self.page,
                    self.processed,
                    self.size.unwrap_or_default()
                );
                self.done = true;
                return None;
            }

            let number = self.page;
            self.buffer
                .extend(page.values.into_iter().map(|value| (number, value)));
        }
    }
}

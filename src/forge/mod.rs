//! Destination forges.
//!
//! A [`Forge`] is the minimal capability the provisioner needs from a hosting
//! service: list what exists, create, and correct metadata.

mod github;
mod gitlab;
mod provisioner;

use thiserror::Error;

use crate::config::{ForgeConfig, ForgeKind};
use crate::http::HttpError;

pub use github::GitHubForge;
pub use gitlab::GitLabForge;
pub use provisioner::{ProvisionAction, Provisioner};

#[cfg(test)]
pub(crate) use provisioner::fake;

/// Page size for listing calls; a shorter page is the last one.
pub(crate) const PER_PAGE: usize = 100;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProvisionError {
    #[error("{forge} rejected the credentials (HTTP {status})")]
    Auth { forge: &'static str, status: u16 },
    #[error("{forge} API returned HTTP {status}: {body}")]
    Api {
        forge: &'static str,
        status: u16,
        body: String,
    },
    #[error("{forge} API unreachable: {reason}")]
    Transport { forge: &'static str, reason: String },
    #[error("unexpected {forge} API response: {reason}")]
    Decode { forge: &'static str, reason: String },
    #[error("no token configured for {0}")]
    MissingToken(&'static str),
}

impl ProvisionError {
    pub(crate) fn from_http(forge: &'static str, err: HttpError) -> Self {
        match err {
            HttpError::Status { status, .. } if status == 401 || status == 403 => {
                Self::Auth { forge, status }
            }
            HttpError::Status { status, body } => Self::Api {
                forge,
                status,
                body,
            },
            HttpError::Transport(reason) => Self::Transport { forge, reason },
            HttpError::Decode(reason) => Self::Decode { forge, reason },
        }
    }
}

/// An existing repository on the forge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRepo {
    pub name: String,
    /// Forge-specific address used for updates (`org/name` or a project id).
    pub handle: String,
    pub homepage: Option<String>,
    pub has_wiki: bool,
    pub has_issues: bool,
}

/// Parameters of a repository to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRepo {
    pub name: String,
    pub description: String,
    pub homepage: String,
}

impl NewRepo {
    pub fn mirror_of(name: &str, homepage: &str) -> Self {
        Self {
            name: name.to_string(),
            description: format!("Mirror of {}", name),
            homepage: homepage.to_string(),
        }
    }
}

/// Metadata corrections for an existing repository.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoPatch {
    pub homepage: Option<String>,
    pub disable_wiki: bool,
    pub disable_issues: bool,
}

impl RepoPatch {
    /// The corrections `repo` needs, or `None` if it is already conforming.
    pub fn needed(repo: &RemoteRepo, homepage: &str, check_homepage: bool) -> Option<Self> {
        let patch = Self {
            homepage: (check_homepage && repo.homepage.as_deref() != Some(homepage))
                .then(|| homepage.to_string()),
            disable_wiki: repo.has_wiki,
            disable_issues: repo.has_issues,
        };
        (patch != Self::default()).then_some(patch)
    }
}

pub trait Forge {
    /// Short name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Whether repositories carry a homepage field worth reconciling.
    fn supports_homepage(&self) -> bool;

    /// Every repository in the configured organization.
    fn list_existing(&self) -> Result<Vec<RemoteRepo>, ProvisionError>;

    /// Create a public repository with wiki and issues disabled.
    fn create(&self, repo: &NewRepo) -> Result<RemoteRepo, ProvisionError>;

    fn update(&self, repo: &RemoteRepo, patch: &RepoPatch) -> Result<(), ProvisionError>;
}

/// Build the forge client selected by the configuration.
pub fn forge_from_config(
    config: &ForgeConfig,
    agent: ureq::Agent,
) -> Result<Box<dyn Forge>, ProvisionError> {
    match config.kind {
        ForgeKind::GitHub => {
            let token = config
                .token
                .clone()
                .ok_or(ProvisionError::MissingToken(github::NAME))?;
            Ok(Box::new(GitHubForge::new(
                agent,
                &config.api_url,
                &config.org,
                token,
            )))
        }
        ForgeKind::GitLab => {
            let token = config
                .token
                .clone()
                .ok_or(ProvisionError::MissingToken(gitlab::NAME))?;
            Ok(Box::new(GitLabForge::new(
                agent,
                &config.api_url,
                &config.org,
                token,
            )))
        }
    }
}

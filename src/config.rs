//! Runtime configuration sourced from the environment.
//!
//! Every component takes the pieces of [`Config`] it needs at construction,
//! so several isolated pipelines can coexist in one process (tests do this).

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::types::{ModuleName, RemoteTarget};

const DEFAULT_BB_OWNER: &str = "trytonspain";
const DEFAULT_BB_API_URL: &str = "https://api.bitbucket.org/2.0";
const DEFAULT_BB_WEB_URL: &str = "https://bitbucket.org";
const DEFAULT_PAGELEN: u32 = 100;
const DEFAULT_PREFIXES: &str = "trytond-,python-";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid additional remotes: {0}")]
    Remotes(#[from] serde_json::Error),
}

/// Destination forge flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForgeKind {
    GitHub,
    GitLab,
}

impl ForgeKind {
    fn default_api_url(self) -> &'static str {
        match self {
            Self::GitHub => "https://api.github.com",
            Self::GitLab => "https://gitlab.com/api/v4",
        }
    }

    fn default_ssh_host(self) -> &'static str {
        match self {
            Self::GitHub => "github.com",
            Self::GitLab => "gitlab.com",
        }
    }

    fn token_env(self) -> &'static str {
        match self {
            Self::GitHub => "GITHUB_TOKEN",
            Self::GitLab => "GITLAB_TOKEN",
        }
    }
}

impl FromStr for ForgeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "github" => Ok(Self::GitHub),
            "gitlab" => Ok(Self::GitLab),
            other => Err(format!("unknown forge '{}'", other)),
        }
    }
}

impl fmt::Display for ForgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GitHub => write!(f, "github"),
            Self::GitLab => write!(f, "gitlab"),
        }
    }
}

/// Where and how the module inventory is read.
#[derive(Debug, Clone)]
pub struct InventoryConfig {
    pub api_url: String,
    pub web_url: String,
    pub owner: String,
    pub pagelen: u32,
    /// Accepted module name prefixes.
    pub prefixes: Vec<String>,
}

impl InventoryConfig {
    /// Browsable URL of a source repository, used as the mirror's homepage.
    pub fn homepage(&self, name: &ModuleName) -> String {
        format!(
            "{}/{}/{}",
            self.web_url.trim_end_matches('/'),
            self.owner,
            name
        )
    }
}

/// Destination forge settings.
#[derive(Clone)]
pub struct ForgeConfig {
    pub kind: ForgeKind,
    pub org: String,
    pub api_url: String,
    pub ssh_host: String,
    pub token: Option<String>,
}

impl ForgeConfig {
    /// The implicit remote every module is pushed to.
    pub fn default_remote(&self, name: &ModuleName) -> RemoteTarget {
        RemoteTarget::new(format!("git@{}:{}/{}.git", self.ssh_host, self.org, name))
    }
}

impl fmt::Debug for ForgeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForgeConfig")
            .field("kind", &self.kind)
            .field("org", &self.org)
            .field("api_url", &self.api_url)
            .field("ssh_host", &self.ssh_host)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Extra remotes per module, on top of the default forge remote.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct AdditionalRemotes(HashMap<String, Vec<String>>);

impl AdditionalRemotes {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    pub fn for_module(&self, name: &ModuleName) -> Vec<RemoteTarget> {
        self.0
            .get(name.as_str())
            .map(|urls| urls.iter().map(RemoteTarget::new).collect())
            .unwrap_or_default()
    }
}

/// Full pipeline configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub inventory: InventoryConfig,
    pub forge: ForgeConfig,
    /// Root of the Mercurial working copies.
    pub hg_cache: PathBuf,
    /// Root of the bare git repositories.
    pub git_cache: PathBuf,
    pub lock_dir: PathBuf,
    pub additional_remotes: AdditionalRemotes,
    pub http_timeout: Duration,
    /// How long a stage waits for another process to release a module.
    pub lock_timeout: Duration,
    /// `hg` executable.
    pub hg_binary: String,
    /// `git` executable.
    pub git_binary: String,
}

impl Config {
    /// Build the configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let owner = get("BB_OWNER").unwrap_or_else(|| DEFAULT_BB_OWNER.to_string());
        let pagelen = match get("BB_PAGELEN") {
            Some(raw) => parse_positive("BB_PAGELEN", &raw)? as u32,
            None => DEFAULT_PAGELEN,
        };
        let prefixes = get("MODULE_PREFIXES")
            .unwrap_or_else(|| DEFAULT_PREFIXES.to_string())
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(String::from)
            .collect();

        let inventory = InventoryConfig {
            api_url: get("BB_API_URL").unwrap_or_else(|| DEFAULT_BB_API_URL.to_string()),
            web_url: get("BB_WEB_URL").unwrap_or_else(|| DEFAULT_BB_WEB_URL.to_string()),
            owner: owner.clone(),
            pagelen,
            prefixes,
        };

        let kind = match get("FORGE") {
            Some(raw) => raw.parse().map_err(|reason| ConfigError::Invalid {
                key: "FORGE",
                value: raw.clone(),
                reason,
            })?,
            None => ForgeKind::GitHub,
        };

        let forge = ForgeConfig {
            kind,
            org: get("FORGE_ORG")
                .or_else(|| get("GITHUB_ORG"))
                .unwrap_or(owner),
            api_url: get("FORGE_API_URL").unwrap_or_else(|| kind.default_api_url().to_string()),
            ssh_host: get("FORGE_SSH_HOST")
                .unwrap_or_else(|| kind.default_ssh_host().to_string()),
            token: get("FORGE_TOKEN").or_else(|| get(kind.token_env())),
        };

        let additional_remotes = match (get("ADDITIONAL_REMOTES"), get("ADDITIONAL_REMOTES_FILE")) {
            (Some(json), _) => AdditionalRemotes::from_json(&json)?,
            (None, Some(path)) => AdditionalRemotes::from_file(Path::new(&path))?,
            (None, None) => AdditionalRemotes::default(),
        };

        let http_timeout = match get("HTTP_TIMEOUT_SECS") {
            Some(raw) => Duration::from_secs(parse_positive("HTTP_TIMEOUT_SECS", &raw)?),
            None => Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
        };

        let lock_timeout = match get("LOCK_TIMEOUT_SECS") {
            Some(raw) => Duration::from_secs(parse_positive("LOCK_TIMEOUT_SECS", &raw)?),
            None => Duration::from_secs(DEFAULT_LOCK_TIMEOUT_SECS),
        };

        Ok(Self {
            inventory,
            forge,
            hg_cache: get("HG_CACHE").map(PathBuf::from).unwrap_or_else(|| "hg".into()),
            git_cache: get("GIT_CACHE").map(PathBuf::from).unwrap_or_else(|| "git".into()),
            lock_dir: get("MIRROR_LOCK_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(default_lock_dir),
            additional_remotes,
            http_timeout,
            lock_timeout,
            hg_binary: get("HG_BINARY").unwrap_or_else(|| "hg".to_string()),
            git_binary: get("GIT_BINARY").unwrap_or_else(|| "git".to_string()),
        })
    }

    /// Remote list for a module: the forge default first, then configured extras.
    pub fn remotes_for(&self, name: &ModuleName) -> Vec<RemoteTarget> {
        let mut remotes = vec![self.forge.default_remote(name)];
        remotes.extend(self.additional_remotes.for_module(name));
        remotes
    }
}

/// Uses `dirs::cache_dir()`, falling back to `.cache` when unknown.
fn default_lock_dir() -> PathBuf {
    let cache_dir = dirs::cache_dir().unwrap_or_else(|| PathBuf::from(".cache"));
    cache_dir.join("hgmirror").join("locks")
}

fn parse_positive(key: &'static str, raw: &str) -> Result<u64, ConfigError> {
    match raw.trim().parse::<u64>() {
        Ok(0) => Err(ConfigError::Invalid {
            key,
            value: raw.to_string(),
            reason: "must be greater than zero".to_string(),
        }),
        Ok(n) => Ok(n),
        Err(e) => Err(ConfigError::Invalid {
            key,
            value: raw.to_string(),
            reason: e.to_string(),
        }),
    }
}

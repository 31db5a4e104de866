//! GitHub REST v3 client.

use serde::{Deserialize, Serialize};

use super::{Forge, NewRepo, PER_PAGE, ProvisionError, RemoteRepo, RepoPatch};
use crate::http::{self, HttpError};

pub(crate) const NAME: &str = "github";

#[derive(Debug, Deserialize)]
struct GitHubRepo {
    name: String,
    full_name: String,
    #[serde(default)]
    homepage: Option<String>,
    #[serde(default)]
    has_wiki: bool,
    #[serde(default)]
    has_issues: bool,
}

impl From<GitHubRepo> for RemoteRepo {
    fn from(repo: GitHubRepo) -> Self {
        Self {
            name: repo.name,
            handle: repo.full_name,
            // GitHub reports a cleared homepage as "".
            homepage: repo.homepage.filter(|h| !h.is_empty()),
            has_wiki: repo.has_wiki,
            has_issues: repo.has_issues,
        }
    }
}

#[derive(Debug, Serialize)]
struct CreateBody<'a> {
    name: &'a str,
    description: &'a str,
    homepage: &'a str,
    private: bool,
    has_wiki: bool,
    has_issues: bool,
}

#[derive(Debug, Default, Serialize)]
struct EditBody<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    homepage: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    has_wiki: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    has_issues: Option<bool>,
}

/// Repositories of one GitHub organization.
pub struct GitHubForge {
    agent: ureq::Agent,
    api_url: String,
    org: String,
    token: String,
}

impl GitHubForge {
    pub fn new(agent: ureq::Agent, api_url: &str, org: &str, token: String) -> Self {
        Self {
            agent,
            api_url: api_url.trim_end_matches('/').to_string(),
            org: org.to_string(),
            token,
        }
    }

    fn list_url(&self, page: usize) -> String {
        format!(
            "{}/orgs/{}/repos?per_page={}&page={}",
            self.api_url,
            http::encode_segment(&self.org),
            PER_PAGE,
            page
        )
    }

    fn create_url(&self) -> String {
        format!("{}/orgs/{}/repos", self.api_url, http::encode_segment(&self.org))
    }

    fn repo_url(&self, full_name: &str) -> String {
        format!("{}/repos/{}", self.api_url, full_name)
    }

    fn authorized(&self, request: ureq::Request) -> ureq::Request {
        request
            .set("Authorization", &format!("Bearer {}", self.token))
            .set("Accept", "application/vnd.github+json")
            .set("X-GitHub-Api-Version", "2022-11-28")
    }

    fn err(e: HttpError) -> ProvisionError {
        ProvisionError::from_http(NAME, e)
    }
}

impl Forge for GitHubForge {
    fn name(&self) -> &'static str {
        NAME
    }

    fn supports_homepage(&self) -> bool {
        true
    }

    fn list_existing(&self) -> Result<Vec<RemoteRepo>, ProvisionError> {
        let mut repos = Vec::new();
        let mut page = 1;

        loop {
            let url = self.list_url(page);
            log::debug!("GET {}", url);
            let batch: Vec<GitHubRepo> = self
                .authorized(self.agent.get(&url))
                .call()
                .map_err(HttpError::from)
                .and_then(http::decode)
                .map_err(Self::err)?;

            let last = batch.len() < PER_PAGE;
            repos.extend(batch.into_iter().map(RemoteRepo::from));
            if last {
                break;
            }
            page += 1;
        }

        Ok(repos)
    }

    fn create(&self, repo: &NewRepo) -> Result<RemoteRepo, ProvisionError> {
        let body = CreateBody {
            name: &repo.name,
            description: &repo.description,
            homepage: &repo.homepage,
            private: false,
            has_wiki: false,
            has_issues: false,
        };

        let url = self.create_url();
        log::debug!("POST {}", url);
        let created: GitHubRepo = http::send_json(self.authorized(self.agent.post(&url)), &body)
            .and_then(http::decode)
            .map_err(Self::err)?;
        Ok(created.into())
    }

    fn update(&self, repo: &RemoteRepo, patch: &RepoPatch) -> Result<(), ProvisionError> {
        let body = EditBody {
            name: &repo.name,
            homepage: patch.homepage.as_deref(),
            has_wiki: patch.disable_wiki.then_some(false),
            has_issues: patch.disable_issues.then_some(false),
        };

        let url = self.repo_url(&repo.handle);
        log::debug!("PATCH {}", url);
        http::send_json(self.authorized(self.agent.request("PATCH", &url)), &body)
            .map_err(Self::err)?;
        Ok(())
    }
}

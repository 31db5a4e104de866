//! GitLab REST v4 client.

use std::cell::OnceCell;

use serde::{Deserialize, Serialize};

use super::{Forge, NewRepo, PER_PAGE, ProvisionError, RemoteRepo, RepoPatch};
use crate::http::{self, HttpError};

pub(crate) const NAME: &str = "gitlab";

#[derive(Debug, Deserialize)]
struct GitLabProject {
    id: u64,
    name: String,
    #[serde(default)]
    wiki_enabled: bool,
    #[serde(default)]
    issues_enabled: bool,
}

impl From<GitLabProject> for RemoteRepo {
    fn from(project: GitLabProject) -> Self {
        Self {
            name: project.name,
            handle: project.id.to_string(),
            homepage: None,
            has_wiki: project.wiki_enabled,
            has_issues: project.issues_enabled,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Namespace {
    id: u64,
}

#[derive(Debug, Serialize)]
struct CreateBody<'a> {
    name: &'a str,
    path: &'a str,
    namespace_id: u64,
    description: &'a str,
    visibility: &'static str,
    issues_enabled: bool,
    wiki_enabled: bool,
    merge_requests_enabled: bool,
}

#[derive(Debug, Default, Serialize)]
struct EditBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    wiki_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    issues_enabled: Option<bool>,
}

/// Projects of one GitLab group. Projects have no homepage field.
pub struct GitLabForge {
    agent: ureq::Agent,
    api_url: String,
    group: String,
    token: String,
    namespace_id: OnceCell<u64>,
}

impl GitLabForge {
    pub fn new(agent: ureq::Agent, api_url: &str, group: &str, token: String) -> Self {
        Self {
            agent,
            api_url: api_url.trim_end_matches('/').to_string(),
            group: group.to_string(),
            token,
            namespace_id: OnceCell::new(),
        }
    }

    fn list_url(&self, page: usize) -> String {
        format!(
            "{}/groups/{}/projects?per_page={}&page={}",
            self.api_url,
            http::encode_segment(&self.group),
            PER_PAGE,
            page
        )
    }

    fn namespace_url(&self) -> String {
        format!("{}/namespaces/{}", self.api_url, http::encode_segment(&self.group))
    }

    fn authorized(&self, request: ureq::Request) -> ureq::Request {
        request.set("PRIVATE-TOKEN", &self.token)
    }

    fn err(e: HttpError) -> ProvisionError {
        ProvisionError::from_http(NAME, e)
    }

    /// Numeric id of the group namespace, fetched once.
    fn namespace_id(&self) -> Result<u64, ProvisionError> {
        if let Some(id) = self.namespace_id.get() {
            return Ok(*id);
        }

        let url = self.namespace_url();
        log::debug!("GET {}", url);
        let namespace: Namespace = self
            .authorized(self.agent.get(&url))
            .call()
            .map_err(HttpError::from)
            .and_then(http::decode)
            .map_err(Self::err)?;

        Ok(*self.namespace_id.get_or_init(|| namespace.id))
    }
}

impl Forge for GitLabForge {
    fn name(&self) -> &'static str {
        NAME
    }

    fn supports_homepage(&self) -> bool {
        false
    }

    fn list_existing(&self) -> Result<Vec<RemoteRepo>, ProvisionError> {
        let mut repos = Vec::new();
        let mut page = 1;

        loop {
            let url = self.list_url(page);
            log::debug!("GET {}", url);
            let batch: Vec<GitLabProject> = self
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
            path: &repo.name,
            namespace_id: self.namespace_id()?,
            description: &repo.description,
            visibility: "public",
            issues_enabled: false,
            wiki_enabled: false,
            merge_requests_enabled: false,
        };

        let url = format!("{}/projects", self.api_url);
        log::debug!("POST {}", url);
        let created: GitLabProject = http::send_json(self.authorized(self.agent.post(&url)), &body)
            .and_then(http::decode)
            .map_err(Self::err)?;
        Ok(created.into())
    }

    fn update(&self, repo: &RemoteRepo, patch: &RepoPatch) -> Result<(), ProvisionError> {
        let body = EditBody {
            wiki_enabled: patch.disable_wiki.then_some(false),
            issues_enabled: patch.disable_issues.then_some(false),
        };

        let url = format!("{}/projects/{}", self.api_url, repo.handle);
        log::debug!("PUT {}", url);
        http::send_json(self.authorized(self.agent.put(&url)), &body).map_err(Self::err)?;
        Ok(())
    }
}

//! Bitbucket repository listing client.

use serde::Deserialize;

use super::{DiscoveryError, PageSource, RepositoryPage};
use crate::config::InventoryConfig;
use crate::http::{self, HttpError};

/// One entry of `values` in the listing.
#[derive(Debug, Clone, Deserialize)]
pub struct BitbucketRepository {
    pub name: String,
    pub scm: String,
    #[serde(default)]
    pub project: Option<BitbucketProject>,
    pub links: BitbucketLinks,
}

impl BitbucketRepository {
    pub fn project_key(&self) -> Option<&str> {
        self.project.as_ref().and_then(|p| p.key.as_deref())
    }

    /// `href` of the clone link tagged `transport` (e.g. `https`).
    pub fn clone_url(&self, transport: &str) -> Option<&str> {
        self.links
            .clone
            .iter()
            .find(|link| link.name == transport)
            .map(|link| link.href.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BitbucketProject {
    #[serde(default)]
    pub key: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BitbucketLinks {
    #[serde(default)]
    pub clone: Vec<CloneLink>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CloneLink {
    pub name: String,
    pub href: String,
}

/// Reads `GET <api>/repositories/<owner>/?pagelen=<n>&page=<p>`.
pub struct BitbucketClient {
    agent: ureq::Agent,
    api_url: String,
    owner: String,
    pagelen: u32,
}

impl BitbucketClient {
    pub fn new(config: &InventoryConfig, agent: ureq::Agent) -> Self {
        Self {
            agent,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            owner: config.owner.clone(),
            pagelen: config.pagelen,
        }
    }

    pub fn page_url(&self, page: u32) -> String {
        format!(
            "{}/repositories/{}/?pagelen={}&page={}",
            self.api_url,
            http::encode_segment(&self.owner),
            self.pagelen,
            page
        )
    }
}

impl PageSource for BitbucketClient {
    fn fetch_page(&self, page: u32) -> Result<RepositoryPage, DiscoveryError> {
        let url = self.page_url(page);
        log::debug!("fetching inventory page {}: {}", page, url);

        let result = self
            .agent
            .get(&url)
            .call()
            .map_err(HttpError::from)
            .and_then(http::decode::<RepositoryPage>);

        match result {
            Ok(page) => Ok(page),
            Err(HttpError::Status { status, .. }) => Err(DiscoveryError::Status { page, status }),
            Err(HttpError::Transport(reason)) => Err(DiscoveryError::Unreachable { page, reason }),
            Err(HttpError::Decode(reason)) => Err(DiscoveryError::Malformed { page, reason }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::{Inventory, InventoryPolicy};
    use serde_json::{Value, json};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(owner: &str) -> BitbucketClient {
        let config = InventoryConfig {
            api_url: "https://api.bitbucket.org/2.0/".to_string(),
            web_url: "https://bitbucket.org".to_string(),
            owner: owner.to_string(),
            pagelen: 50,
            prefixes: vec![],
        };
        BitbucketClient::new(&config, http::agent(std::time::Duration::from_secs(1)))
    }

    #[test]
    fn page_url_carries_pagination_parameters() {
        assert_eq!(
            client("trytonspain").page_url(3),
            "https://api.bitbucket.org/2.0/repositories/trytonspain/?pagelen=50&page=3"
        );
    }

    #[test]
    fn repository_decodes_listing_entry() {
        let json = r#"{
            "name": "trytond-sale",
            "scm": "hg",
            "project": {"key": "TRY", "name": "Tryton"},
            "links": {
                "clone": [
                    {"name": "https", "href": "https://bitbucket.org/trytonspain/trytond-sale"},
                    {"name": "ssh", "href": "ssh://hg@bitbucket.org/trytonspain/trytond-sale"}
                ],
                "html": {"href": "https://bitbucket.org/trytonspain/trytond-sale"}
            },
            "is_private": false
        }"#;

        let repo: BitbucketRepository = serde_json::from_str(json).unwrap();
        assert_eq!(repo.name, "trytond-sale");
        assert_eq!(repo.project_key(), Some("TRY"));
        assert_eq!(
            repo.clone_url("https"),
            Some("https://bitbucket.org/trytonspain/trytond-sale")
        );
        assert_eq!(
            repo.clone_url("ssh"),
            Some("ssh://hg@bitbucket.org/trytonspain/trytond-sale")
        );
        assert_eq!(repo.clone_url("git"), None);
    }

    #[test]
    fn repository_without_project() {
        let json = r#"{"name": "python-sql", "scm": "hg", "links": {}}"#;
        let repo: BitbucketRepository = serde_json::from_str(json).unwrap();
        assert_eq!(repo.project_key(), None);
        assert_eq!(repo.clone_url("https"), None);
    }

    #[test]
    fn unreachable_endpoint_is_discovery_error() {
        let config = InventoryConfig {
            api_url: "http://127.0.0.1:9".to_string(),
            web_url: String::new(),
            owner: "acme".to_string(),
            pagelen: 10,
            prefixes: vec![],
        };
        let client = BitbucketClient::new(&config, http::agent(std::time::Duration::from_secs(2)));
        let err = client.fetch_page(1).unwrap_err();
        assert!(matches!(err, DiscoveryError::Unreachable { page: 1, .. }));
    }

    fn served_config(server: &MockServer) -> InventoryConfig {
        InventoryConfig {
            api_url: server.uri(),
            web_url: "https://bitbucket.org".to_string(),
            owner: "acme".to_string(),
            pagelen: 2,
            prefixes: vec!["trytond-".to_string()],
        }
    }

    fn listed(name: &str, scm: &str) -> Value {
        json!({
            "name": name,
            "scm": scm,
            "project": {"key": "TRY"},
            "links": {"clone": [
                {"name": "https", "href": format!("https://bitbucket.org/acme/{}", name)}
            ]}
        })
    }

    async fn serve_page(server: &MockServer, page: &str, template: ResponseTemplate) {
        Mock::given(method("GET"))
            .and(path("/repositories/acme/"))
            .and(query_param("page", page))
            .respond_with(template)
            .expect(1)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn two_page_listing_end_to_end() {
        let server = MockServer::start().await;
        serve_page(
            &server,
            "1",
            ResponseTemplate::new(200).set_body_json(json!({
                "size": 3,
                "page": 1,
                "values": [listed("trytond-sale", "hg"), listed("trytond-git", "git")]
            })),
        )
        .await;
        serve_page(
            &server,
            "2",
            ResponseTemplate::new(200).set_body_json(json!({
                "size": 3,
                "page": 2,
                "values": [listed("trytond-stock", "hg")]
            })),
        )
        .await;

        let config = served_config(&server);
        let modules = tokio::task::spawn_blocking(move || {
            let inventory = Inventory::new(
                BitbucketClient::new(&config, http::agent(std::time::Duration::from_secs(5))),
                InventoryPolicy::from_config(&config),
            );
            inventory.collect()
        })
        .await
        .unwrap()
        .unwrap();

        let names: Vec<&str> = modules.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["trytond-sale", "trytond-stock"]);
        assert_eq!(modules[1].source_url, "https://bitbucket.org/acme/trytond-stock");
    }

    #[tokio::test]
    async fn non_json_page_is_malformed() {
        let server = MockServer::start().await;
        serve_page(
            &server,
            "1",
            ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"),
        )
        .await;

        let client = BitbucketClient::new(
            &served_config(&server),
            http::agent(std::time::Duration::from_secs(5)),
        );
        let err = tokio::task::spawn_blocking(move || client.fetch_page(1))
            .await
            .unwrap()
            .unwrap_err();

        assert!(matches!(err, DiscoveryError::Malformed { page: 1, .. }), "{:?}", err);
    }

    #[tokio::test]
    async fn error_status_is_reported_with_page() {
        let server = MockServer::start().await;
        serve_page(&server, "1", ResponseTemplate::new(404)).await;

        let client = BitbucketClient::new(
            &served_config(&server),
            http::agent(std::time::Duration::from_secs(5)),
        );
        let err = tokio::task::spawn_blocking(move || client.fetch_page(1))
            .await
            .unwrap()
            .unwrap_err();

        assert_eq!(err, DiscoveryError::Status { page: 1, status: 404 });
    }
}

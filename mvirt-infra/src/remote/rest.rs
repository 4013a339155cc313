//! HTTP client for both API families.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::{ManagerApi, ManagerKind, Page, PolicyApi, PolicyKind, RemoteObject, Result, Tag};
use crate::error::ApiError;

const POLICY_PREFIX: &str = "/policy/api/v1";
const SEARCH_PATH: &str = "/api/v1/search/query";

/// Connection settings for [`RestClient`].
#[derive(Clone)]
pub struct RestConfig {
    /// Base URL, e.g. `https://nsx.example.com`.
    pub endpoint: String,
    pub username: String,
    pub password: String,
    /// Accept self-signed certificates.
    pub insecure: bool,
    pub timeout: Duration,
}

pub struct RestClient {
    client: Client,
    config: RestConfig,
}

#[derive(Deserialize)]
struct ListResponse {
    #[serde(default)]
    results: Vec<RemoteObject>,
    #[serde(default)]
    cursor: Option<String>,
}

impl RestClient {
    pub fn new(mut config: RestConfig) -> Result<Self> {
        let client = Client::builder()
            .danger_accept_invalid_certs(config.insecure)
            .timeout(config.timeout)
            .build()?;
        config.endpoint = config.endpoint.trim_end_matches('/').to_string();
        Ok(Self { client, config })
    }

    fn request(&self, method: Method, url: String) -> RequestBuilder {
        debug!(%method, %url, "Remote request");
        self.client
            .request(method, url)
            .basic_auth(&self.config.username, Some(&self.config.password))
    }

    fn policy_url(&self, path: &str) -> String {
        format!("{}{}{}", self.config.endpoint, POLICY_PREFIX, path)
    }

    fn manager_url(&self, path: &str) -> String {
        format!("{}{}", self.config.endpoint, path)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::NOT_FOUND => ApiError::NotFound(message),
            StatusCode::CONFLICT => ApiError::Conflict(message),
            other => ApiError::Status {
                code: other.as_u16(),
                message,
            },
        })
    }

    async fn fetch<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let body = self.send(request).await?.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Collect every page of a manager collection.
    async fn fetch_all(&self, url: &str, query: &[(&str, &str)]) -> Result<Vec<RemoteObject>> {
        let mut objects = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut request = self.request(Method::GET, url.to_string()).query(query);
            if let Some(c) = &cursor {
                request = request.query(&[("cursor", c)]);
            }
            let page: ListResponse = self.fetch(request).await?;
            objects.extend(page.results);
            match page.cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => return Ok(objects),
            }
        }
    }
}

/// Manager objects carry no path on the wire; derive it from kind and id.
fn with_manager_path(mut object: RemoteObject, kind: ManagerKind, parent: Option<&str>) -> RemoteObject {
    if object.path.is_none() {
        object.path = Some(kind.path(parent, &object.id));
    }
    object
}

/// Escape a value for the search query syntax.
fn escape_query(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(
            c,
            '+' | '-' | '&' | '|' | '!' | '(' | ')' | '{' | '}' | '[' | ']' | '^' | '"' | '~'
                | '*' | '?' | ':' | '\\' | '/' | ' '
        ) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn search_query(kind: ManagerKind, tags: &[Tag]) -> String {
    let mut query = format!("resource_type:{}", kind.resource_type());
    for tag in tags {
        query.push_str(&format!(
            " AND tags.scope:{} AND tags.tag:{}",
            escape_query(&tag.scope),
            escape_query(&tag.tag)
        ));
    }
    query
}

/// The query cannot tie a scope to its tag value, so hits are checked again
/// against the exact tag pairs.
fn search_hits(objects: Vec<RemoteObject>, kind: ManagerKind, tags: &[Tag]) -> Vec<RemoteObject> {
    objects
        .into_iter()
        .filter(|o| o.has_tags(tags))
        .map(|o| match kind {
            ManagerKind::DhcpIpPool => o,
            _ => with_manager_path(o, kind, None),
        })
        .collect()
}

#[async_trait]
impl PolicyApi for RestClient {
    async fn get(&self, path: &str) -> Result<RemoteObject> {
        self.fetch(self.request(Method::GET, self.policy_url(path)))
            .await
    }

    async fn list(&self, kind: PolicyKind, parent: &str, cursor: Option<&str>) -> Result<Page> {
        let mut request = self.request(Method::GET, self.policy_url(&kind.collection_path(parent)));
        if let Some(c) = cursor {
            request = request.query(&[("cursor", c)]);
        }
        let page: ListResponse = self.fetch(request).await?;
        Ok(Page {
            results: page.results,
            cursor: page.cursor,
        })
    }

    async fn patch(
        &self,
        kind: PolicyKind,
        parent: &str,
        object: &RemoteObject,
    ) -> Result<RemoteObject> {
        let path = kind.path(parent, &object.id);
        self.send(self.request(Method::PATCH, self.policy_url(&path)).json(object))
            .await?;
        // PATCH answers without a body
        PolicyApi::get(self, &path).await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.send(self.request(Method::DELETE, self.policy_url(path)))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ManagerApi for RestClient {
    async fn get(&self, path: &str) -> Result<RemoteObject> {
        let mut object: RemoteObject = self
            .fetch(self.request(Method::GET, self.manager_url(path)))
            .await?;
        object.path = Some(path.to_string());
        Ok(object)
    }

    async fn list(&self, kind: ManagerKind, parent: Option<&str>) -> Result<Vec<RemoteObject>> {
        let url = self.manager_url(&kind.collection_path(parent));
        let objects = self.fetch_all(&url, &[]).await?;
        Ok(objects
            .into_iter()
            .map(|o| with_manager_path(o, kind, parent))
            .collect())
    }

    async fn create(
        &self,
        kind: ManagerKind,
        parent: Option<&str>,
        object: &RemoteObject,
    ) -> Result<RemoteObject> {
        let url = self.manager_url(&kind.collection_path(parent));
        let created: RemoteObject = self
            .fetch(self.request(Method::POST, url).json(object))
            .await?;
        Ok(with_manager_path(created, kind, parent))
    }

    async fn update(&self, path: &str, object: &RemoteObject) -> Result<RemoteObject> {
        let mut body = object.clone();
        body.path = None;
        let mut updated: RemoteObject = self
            .fetch(self.request(Method::PUT, self.manager_url(path)).json(&body))
            .await?;
        updated.path = Some(path.to_string());
        Ok(updated)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.send(self.request(Method::DELETE, self.manager_url(path)))
            .await?;
        Ok(())
    }

    /// Nested kinds (DHCP IP pools) cannot be addressed from a search hit and come back without a path.
    async fn search(&self, kind: ManagerKind, tags: &[Tag]) -> Result<Vec<RemoteObject>> {
        let query = search_query(kind, tags);
        let url = self.manager_url(SEARCH_PATH);
        let objects = self.fetch_all(&url, &[("query", query.as_str())]).await?;
        Ok(search_hits(objects, kind, tags))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> RestClient {
        RestClient::new(RestConfig {
            endpoint: "https://nsx.local/".to_string(),
            username: "admin".to_string(),
            password: "secret".to_string(),
            insecure: true,
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[test]
    fn test_urls() {
        let client = client();
        assert_eq!(
            client.policy_url("/infra/tier-1s/t1"),
            "https://nsx.local/policy/api/v1/infra/tier-1s/t1"
        );
        assert_eq!(
            client.manager_url("/api/v1/dhcp/servers/s1"),
            "https://nsx.local/api/v1/dhcp/servers/s1"
        );
    }

    #[test]
    fn test_search_query_escapes_tag_values() {
        let query = search_query(
            ManagerKind::LogicalSwitch,
            &[Tag::new("policyPath", "/infra/segments/s-1")],
        );
        assert_eq!(
            query,
            r"resource_type:LogicalSwitch AND tags.scope:policyPath AND tags.tag:\/infra\/segments\/s\-1"
        );
    }

    #[test]
    fn test_manager_path_is_derived() {
        let object = with_manager_path(RemoteObject::new("p1", "pool"), ManagerKind::DhcpIpPool, Some("s1"));
        assert_eq!(
            object.path.as_deref(),
            Some("/api/v1/dhcp/servers/s1/ip-pools/p1")
        );
    }

    #[test]
    fn test_search_hits_require_exact_tag_pairs() {
        let tags = [Tag::new("owner", "shoot-a"), Tag::new("cluster", "dev")];
        let exact = RemoteObject::new("s1", "exact").with_tags(tags.to_vec());
        let crossed = RemoteObject::new("s2", "crossed")
            .with_tags(vec![Tag::new("owner", "dev"), Tag::new("cluster", "shoot-a")]);

        let hits = search_hits(vec![exact, crossed], ManagerKind::DhcpServer, &tags);

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "s1");
        assert_eq!(hits[0].path.as_deref(), Some("/api/v1/dhcp/servers/s1"));
    }
}

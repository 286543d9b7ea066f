//! REST transport: a `Fetcher` backed by the project API, plus the JSON
//! write helpers that mutations build their remote calls from.

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::errors::TransportError;
use crate::key::{EntityKey, EntityKind};
use crate::query::Fetcher;
use crate::store::Snapshot;

/// Fetches entity snapshots over HTTP.
#[derive(Debug, Clone)]
pub struct RestFetcher {
    base_url: String,
    client: reqwest::Client,
}

impl RestFetcher {
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// API path for an entity key. Sub-resources map to nested paths, so
    /// `project/7/keywords` becomes `/api/projects/7/keywords`.
    pub fn path_for(&self, key: &EntityKey) -> String {
        let collection = match key.kind {
            EntityKind::Project => "projects",
            EntityKind::Content => "content",
            EntityKind::CrawlJob => "crawl-jobs",
            EntityKind::Keyword => "keywords",
        };
        match &key.sub {
            Some(sub) => format!("/api/{}/{}/{}", collection, key.id, sub),
            None => format!("/api/{}/{}", collection, key.id),
        }
    }

    fn url_for(&self, key: &EntityKey) -> String {
        format!("{}{}", self.base_url, self.path_for(key))
    }

    async fn decode_response(
        endpoint: &str,
        resp: reqwest::Response,
    ) -> Result<Value, TransportError> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        let bytes = resp.bytes().await.map_err(|source| TransportError::Request {
            endpoint: endpoint.to_string(),
            source,
        })?;
        serde_json::from_slice(&bytes).map_err(|source| TransportError::Decode {
            endpoint: endpoint.to_string(),
            source,
        })
    }

    /// PATCH a JSON body at an entity's endpoint, returning the server's
    /// snapshot of the entity after the write.
    pub async fn patch_json(&self, key: &EntityKey, body: Value) -> Result<Value, TransportError> {
        let endpoint = self.url_for(key);
        debug!(endpoint = %endpoint, "PATCH");
        let resp = self
            .client
            .patch(&endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|source| TransportError::Request {
                endpoint: endpoint.clone(),
                source,
            })?;
        Self::decode_response(&endpoint, resp).await
    }

    /// POST a JSON body at an entity's endpoint.
    pub async fn post_json(&self, key: &EntityKey, body: Value) -> Result<Value, TransportError> {
        let endpoint = self.url_for(key);
        debug!(endpoint = %endpoint, "POST");
        let resp = self
            .client
            .post(&endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|source| TransportError::Request {
                endpoint: endpoint.clone(),
                source,
            })?;
        Self::decode_response(&endpoint, resp).await
    }
}

#[async_trait]
impl Fetcher for RestFetcher {
    async fn fetch(&self, key: &EntityKey) -> Result<Snapshot, TransportError> {
        let endpoint = self.url_for(key);
        debug!(endpoint = %endpoint, "GET");
        let resp = self
            .client
            .get(&endpoint)
            .send()
            .await
            .map_err(|source| TransportError::Request {
                endpoint: endpoint.clone(),
                source,
            })?;
        Self::decode_response(&endpoint, resp).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_for_plain_entities() {
        let rest = RestFetcher::new("http://localhost:8000");
        assert_eq!(rest.path_for(&EntityKey::project(7)), "/api/projects/7");
        assert_eq!(rest.path_for(&EntityKey::content(42)), "/api/content/42");
        assert_eq!(
            rest.path_for(&EntityKey::crawl_job(3)),
            "/api/crawl-jobs/3"
        );
        assert_eq!(rest.path_for(&EntityKey::keyword(9)), "/api/keywords/9");
    }

    #[test]
    fn test_path_for_sub_resource() {
        let rest = RestFetcher::new("http://localhost:8000");
        let key = EntityKey::with_sub(EntityKind::Project, 7, "keywords");
        assert_eq!(rest.path_for(&key), "/api/projects/7/keywords");
    }

    #[test]
    fn test_base_url_trailing_slash_stripped() {
        let rest = RestFetcher::new("http://localhost:8000/");
        assert_eq!(rest.base_url(), "http://localhost:8000");
        assert_eq!(
            rest.url_for(&EntityKey::project(1)),
            "http://localhost:8000/api/projects/1"
        );
    }
}

//! HTTP client for the hosted entity API

use std::time::Duration;

use async_trait::async_trait;
use entities::{Entity, Fields};
use reqwest::{Client, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::{Query, RemoteCollection, RemoteError};

/// Talks to `{base}/entities/{Entity}` endpoints
#[derive(Debug)]
pub struct HttpEntityClient {
    http: Client,
    base_url: Url,
    token: Option<SecretString>,
}

impl HttpEntityClient {
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(base_url: &str, token: Option<SecretString>) -> Result<Self, RemoteError> {
        let mut base_url =
            Url::parse(base_url).map_err(|e| RemoteError::Invalid(e.to_string()))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let http = Client::builder()
            .timeout(Self::REQUEST_TIMEOUT)
            .user_agent(concat!("collab-unity-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RemoteError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            base_url,
            token,
        })
    }

    fn collection_url<T: Entity>(&self) -> Result<Url, RemoteError> {
        self.base_url
            .join(&format!("entities/{}", T::NAME))
            .map_err(|e| RemoteError::Invalid(e.to_string()))
    }

    fn item_url<T: Entity>(&self, id: &str) -> Result<Url, RemoteError> {
        let mut url = self.collection_url::<T>()?;
        url.path_segments_mut()
            .map_err(|_| RemoteError::Invalid(format!("cannot address item {id}")))?
            .push(id);
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token.expose_secret()),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, RemoteError> {
        let res = self
            .authorize(request)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = res.status();
        if status.is_success() {
            return Ok(res);
        }
        let body = res.text().await.unwrap_or_default();
        Err(RemoteError::from_status(status.as_u16(), body))
    }

    async fn send_json<R: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<R, RemoteError> {
        self.send(request)
            .await?
            .json::<R>()
            .await
            .map_err(|e| RemoteError::Serde(e.to_string()))
    }
}

#[async_trait]
impl<T: Entity> RemoteCollection<T> for HttpEntityClient {
    async fn fetch(&self, query: &Query) -> Result<Vec<T>, RemoteError> {
        let url = self.collection_url::<T>()?;
        let mut params: Vec<(&str, String)> = Vec::new();
        if !query.filter.is_empty() {
            let filter = serde_json::to_string(&query.filter)
                .map_err(|e| RemoteError::Serde(e.to_string()))?;
            params.push(("q", filter));
        }
        if let Some(sort) = &query.sort {
            params.push(("sort", sort.to_param()));
        }
        if let Some(limit) = query.limit {
            params.push(("limit", limit.to_string()));
        }

        debug!(entity = T::NAME, ?params, "Fetching collection");
        self.send_json(self.http.get(url).query(&params)).await
    }

    async fn update(&self, id: &str, fields: Fields) -> Result<T, RemoteError> {
        let url = self.item_url::<T>(id)?;
        self.send_json(self.http.put(url).json(&fields)).await
    }

    async fn create(&self, fields: Fields) -> Result<T, RemoteError> {
        let url = self.collection_url::<T>()?;
        self.send_json(self.http.post(url).json(&fields)).await
    }

    async fn delete(&self, id: &str) -> Result<(), RemoteError> {
        let url = self.item_url::<T>(id)?;
        self.send(self.http.delete(url)).await.map(|_| ())
    }
}

fn map_reqwest_error(e: reqwest::Error) -> RemoteError {
    if e.is_timeout() {
        RemoteError::Timeout
    } else {
        RemoteError::Transport(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use entities::models::notification::Notification;

    use super::*;

    #[test]
    fn item_urls_are_nested_under_base_path() {
        let client = HttpEntityClient::new("https://api.example.com/api/apps/abc", None).unwrap();
        let url = client.item_url::<Notification>("n 1").unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.example.com/api/apps/abc/entities/Notification/n%201"
        );
    }

    #[test]
    fn rejects_unparseable_base() {
        let err = HttpEntityClient::new("not a url", None).unwrap_err();
        assert!(matches!(err, RemoteError::Invalid(_)));
    }
}

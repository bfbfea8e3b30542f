use chrono::Utc;
use ed25519_dalek::SigningKey;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;
use url::Url;

use crate::auth::{sign_request, SIGNATURE_HEADER, TIMESTAMP_HEADER, USERNAME_HEADER};
use crate::database::models::identity::{Identity, ProviderId};
use crate::error::ErrorBody;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid server URL {0:?}: {1}")]
    BaseUrl(String, String),

    #[error("{method} {url}: {message}")]
    Api {
        method: Method,
        url: Url,
        status: StatusCode,
        code: String,
        message: String,
    },

    #[error("{method} {url}: {source}")]
    Transport {
        method: Method,
        url: Url,
        #[source]
        source: reqwest::Error,
    },
}

impl ClientError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ClientError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// HTTP client for the `v1` API that signs every request as an agent.
#[derive(Clone)]
pub struct IdentityClient {
    http: reqwest::Client,
    base: Url,
    username: String,
    key: SigningKey,
}

impl IdentityClient {
    pub fn new(base_url: &str, username: &str, key: SigningKey) -> Result<Self, ClientError> {
        let base = Url::parse(base_url)
            .map_err(|e| ClientError::BaseUrl(base_url.to_string(), e.to_string()))?;
        if base.cannot_be_a_base() {
            return Err(ClientError::BaseUrl(base_url.to_string(), "not a base URL".to_string()));
        }
        Ok(Self {
            http: reqwest::Client::new(),
            base,
            username: username.to_string(),
            key,
        })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub async fn user(&self, username: &str) -> Result<Identity, ClientError> {
        self.get(self.endpoint(&["u", username])).await
    }

    pub async fn user_by_email(&self, email: &str) -> Result<Identity, ClientError> {
        let mut url = self.endpoint(&["u"]);
        url.query_pairs_mut().append_pair("email", email);
        self.get(url).await
    }

    pub async fn identity(&self, provider_id: &ProviderId) -> Result<Identity, ClientError> {
        self.get(self.endpoint(&["x", provider_id.provider(), provider_id.external_id()])).await
    }

    pub async fn whoami(&self) -> Result<Identity, ClientError> {
        self.get(self.endpoint(&["whoami"])).await
    }

    pub async fn put_user(&self, identity: &Identity) -> Result<Identity, ClientError> {
        let url = self.endpoint(&["u", &identity.username]);
        let request = self.signed(Method::PUT, &url).json(identity);
        self.send(Method::PUT, url, request).await
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        // `new` rejects cannot-be-a-base URLs, so segments are always available.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push("v1").extend(segments);
        }
        url
    }

    fn signed(&self, method: Method, url: &Url) -> reqwest::RequestBuilder {
        let path_and_query = match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_string(),
        };
        let headers = sign_request(
            &self.key,
            &self.username,
            method.as_str(),
            &path_and_query,
            Utc::now().timestamp(),
        );

        self.http
            .request(method, url.clone())
            .header(USERNAME_HEADER, headers.username)
            .header(TIMESTAMP_HEADER, headers.timestamp.to_string())
            .header(SIGNATURE_HEADER, headers.signature)
    }

    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T, ClientError> {
        let request = self.signed(Method::GET, &url);
        self.send(Method::GET, url, request).await
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        url: Url,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ClientError> {
        let transport = |source| ClientError::Transport {
            method: method.clone(),
            url: url.clone(),
            source,
        };

        let response = request.send().await.map_err(transport)?;
        let status = response.status();
        if status.is_success() {
            return response.json().await.map_err(transport);
        }

        let text = response.text().await.map_err(transport)?;
        let (code, message) = match serde_json::from_str::<ErrorBody>(&text) {
            Ok(body) => (body.code, body.message),
            Err(_) => (String::new(), format!("{status}: {}", text.trim())),
        };
        Err(ClientError::Api { method, url, status, code, message })
    }
}

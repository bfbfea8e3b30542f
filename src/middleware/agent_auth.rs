use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::{request::Parts, HeaderMap};
use chrono::Utc;

use crate::auth::{
    check_timestamp, decode_signature, verify_request, AuthError, SignedHeaders, SIGNATURE_HEADER,
    TIMESTAMP_HEADER, USERNAME_HEADER,
};
use crate::database::models::identity::Identity;
use crate::database::store::{later, SharedStore, StoreError};
use crate::error::ApiError;

/// Resolves signed agent requests to identities.
#[derive(Clone)]
pub struct AgentVerifier {
    pub store: SharedStore,
    pub max_skew: Duration,
}

/// Group whose members may call administrative routes.
#[derive(Clone, Debug)]
pub struct AdminGroup(pub String);

/// The authenticated caller of a request.
#[derive(Clone, Debug)]
pub struct Caller(pub Identity);

/// An authenticated caller that is a member of the admin group.
#[derive(Clone, Debug)]
pub struct AdminCaller(pub Identity);

impl AgentVerifier {
    /// Resolve a signed request to its agent.
    ///
    /// Unknown usernames, identities without keys, and bad signatures all
    /// get the same rejection.
    pub async fn authenticate(&self, parts: &Parts) -> Result<Identity, ApiError> {
        let headers = read_headers(&parts.headers).map_err(reject)?;
        let signature = decode_signature(&headers.signature).map_err(reject)?;

        let now = Utc::now();
        check_timestamp(headers.timestamp, now, self.max_skew).map_err(reject)?;

        let mut identity = match self.store.find_by_username(&headers.username).await {
            Ok(identity) => identity,
            Err(StoreError::NotFound(_)) => {
                tracing::warn!("Rejected request from unknown agent {}", headers.username);
                return Err(reject(AuthError::BadSignature));
            }
            Err(e) => return Err(e.into()),
        };

        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or_else(|| parts.uri.path());

        verify_request(
            &identity,
            parts.method.as_str(),
            path_and_query,
            headers.timestamp,
            &signature,
            now,
            self.max_skew,
        )
        .map_err(|e| {
            tracing::warn!("Rejected request from {}: {}", headers.username, e);
            match e {
                AuthError::NoPublicKeys(_) => reject(AuthError::BadSignature),
                other => reject(other),
            }
        })?;

        match self.store.record_login(&identity.provider_id, now).await {
            Ok(()) => identity.last_login = later(identity.last_login, Some(now)),
            Err(e) => tracing::warn!("Could not record login of {}: {}", identity.provider_id, e),
        }

        Ok(identity)
    }
}

fn reject(err: AuthError) -> ApiError {
    ApiError::unauthorized(err.to_string())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &'static str) -> Result<&'a str, AuthError> {
    headers
        .get(name)
        .ok_or(AuthError::MissingHeader(name))?
        .to_str()
        .map_err(|_| AuthError::InvalidHeader(name))
}

fn read_headers(headers: &HeaderMap) -> Result<SignedHeaders, AuthError> {
    let username = header_str(headers, USERNAME_HEADER)?.to_string();
    let timestamp = header_str(headers, TIMESTAMP_HEADER)?
        .parse()
        .map_err(|_| AuthError::InvalidHeader(TIMESTAMP_HEADER))?;
    let signature = header_str(headers, SIGNATURE_HEADER)?.to_string();
    Ok(SignedHeaders { username, timestamp, signature })
}

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
    AgentVerifier: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        AgentVerifier::from_ref(state).authenticate(parts).await.map(Caller)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AdminCaller
where
    S: Send + Sync,
    AgentVerifier: FromRef<S>,
    AdminGroup: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Caller(identity) = Caller::from_request_parts(parts, state).await?;
        let AdminGroup(group) = AdminGroup::from_ref(state);
        if !identity.is_member_of(&group) {
            tracing::warn!("{} is not a member of {}", identity.username, group);
            return Err(ApiError::forbidden("admin privileges required"));
        }
        Ok(AdminCaller(identity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn missing_and_malformed_headers() {
        let mut headers = HeaderMap::new();
        assert!(matches!(read_headers(&headers), Err(AuthError::MissingHeader(USERNAME_HEADER))));

        headers.insert(USERNAME_HEADER, HeaderValue::from_static("admin@idm"));
        headers.insert(TIMESTAMP_HEADER, HeaderValue::from_static("yesterday"));
        headers.insert(SIGNATURE_HEADER, HeaderValue::from_static("AAAA"));
        assert!(matches!(read_headers(&headers), Err(AuthError::InvalidHeader(TIMESTAMP_HEADER))));

        headers.insert(TIMESTAMP_HEADER, HeaderValue::from_static("1482624000"));
        let signed = read_headers(&headers).unwrap();
        assert_eq!(signed.username, "admin@idm");
        assert_eq!(signed.timestamp, 1482624000);
    }
}

//! Agent key-pair request signing.
//!
//! An agent proves possession of its private key by signing
//! `sha256(METHOD " " PATH_AND_QUERY) || timestamp_le` and sending the
//! signature with its username and the timestamp in request headers. The
//! server accepts the request when one of the identity's public keys verifies
//! the signature and the timestamp is within the allowed clock skew.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};
use std::time::Duration;
use thiserror::Error;

use crate::database::models::identity::{Identity, ProviderId, PublicKey};
use crate::database::store::{IdentityStore, StoreError};

pub const USERNAME_HEADER: &str = "idm-agent-username";
pub const TIMESTAMP_HEADER: &str = "idm-agent-timestamp";
pub const SIGNATURE_HEADER: &str = "idm-agent-signature";

/// Username of the agent created from `IDM_ADMIN_AGENT_PUBLIC_KEY`.
pub const ADMIN_AGENT_USERNAME: &str = "admin@idm";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing {0} header")]
    MissingHeader(&'static str),

    #[error("invalid {0} header")]
    InvalidHeader(&'static str),

    #[error("request timestamp outside the allowed window")]
    StaleTimestamp,

    #[error("identity {0} has no public keys")]
    NoPublicKeys(String),

    #[error("invalid signature")]
    BadSignature,
}

/// Header values carried by a signed request.
#[derive(Debug, Clone)]
pub struct SignedHeaders {
    pub username: String,
    pub timestamp: i64,
    pub signature: String,
}

fn signing_message(method: &str, path_and_query: &str, timestamp: i64) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(method.as_bytes());
    hasher.update(b" ");
    hasher.update(path_and_query.as_bytes());

    let mut message = hasher.finalize().to_vec();
    message.extend_from_slice(&timestamp.to_le_bytes());
    message
}

pub fn sign_request(
    key: &SigningKey,
    username: &str,
    method: &str,
    path_and_query: &str,
    timestamp: i64,
) -> SignedHeaders {
    let signature = key.sign(&signing_message(method, path_and_query, timestamp));
    SignedHeaders {
        username: username.to_string(),
        timestamp,
        signature: STANDARD.encode(signature.to_bytes()),
    }
}

pub fn decode_signature(value: &str) -> Result<Signature, AuthError> {
    let bytes = STANDARD
        .decode(value.trim())
        .map_err(|_| AuthError::InvalidHeader(SIGNATURE_HEADER))?;
    let bytes: [u8; 64] = bytes
        .try_into()
        .map_err(|_| AuthError::InvalidHeader(SIGNATURE_HEADER))?;
    Ok(Signature::from_bytes(&bytes))
}

pub fn public_key_of(key: &SigningKey) -> PublicKey {
    PublicKey::from_bytes(key.verifying_key().to_bytes())
}

/// Reject timestamps further than `max_skew` from `now` in either direction.
pub fn check_timestamp(
    timestamp: i64,
    now: DateTime<Utc>,
    max_skew: Duration,
) -> Result<(), AuthError> {
    if now.timestamp().abs_diff(timestamp) > max_skew.as_secs() {
        return Err(AuthError::StaleTimestamp);
    }
    Ok(())
}

/// Check a request signature against every public key of the identity.
pub fn verify_request(
    identity: &Identity,
    method: &str,
    path_and_query: &str,
    timestamp: i64,
    signature: &Signature,
    now: DateTime<Utc>,
    max_skew: Duration,
) -> Result<(), AuthError> {
    check_timestamp(timestamp, now, max_skew)?;

    if identity.public_keys.is_empty() {
        return Err(AuthError::NoPublicKeys(identity.username.clone()));
    }

    let message = signing_message(method, path_and_query, timestamp);
    let verified = identity.public_keys.iter().any(|key| {
        VerifyingKey::from_bytes(key.as_bytes())
            .map(|vk| vk.verify(&message, signature).is_ok())
            .unwrap_or(false)
    });

    if verified {
        Ok(())
    } else {
        Err(AuthError::BadSignature)
    }
}

/// Create or refresh the bootstrap admin agent.
pub async fn bootstrap_admin_agent(
    store: &dyn IdentityStore,
    public_key: PublicKey,
    admin_group: &str,
) -> Result<Identity, StoreError> {
    let mut agent = Identity::new(ProviderId::new("idm", "admin"), ADMIN_AGENT_USERNAME);
    agent.name = "Identity Manager administrator".to_string();
    agent.groups = vec![admin_group.to_string()];
    agent.public_keys = vec![public_key];

    store.upsert_identity(&agent).await?;
    tracing::info!("Admin agent {} ready (group {})", ADMIN_AGENT_USERNAME, admin_group);
    Ok(agent)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(key: &SigningKey) -> Identity {
        let mut identity = Identity::new(ProviderId::new("idm", "a-1"), "a-1@idm");
        identity.public_keys = vec![public_key_of(key)];
        identity
    }

    #[test]
    fn valid_signature_verifies() {
        let key = SigningKey::from_bytes(&[7u8; 32]);
        let now = Utc::now();
        let headers = sign_request(&key, "a-1@idm", "GET", "/v1/u/bob", now.timestamp());
        let signature = decode_signature(&headers.signature).unwrap();

        let skew = Duration::from_secs(60);
        let identity = agent(&key);

        verify_request(&identity, "GET", "/v1/u/bob", headers.timestamp, &signature, now, skew)
            .unwrap();
    }

    #[test]
    fn signature_is_bound_to_path_and_method() {
        let key = SigningKey::from_bytes(&[7u8; 32]);
        let now = Utc::now();
        let headers = sign_request(&key, "a-1@idm", "GET", "/v1/u/bob", now.timestamp());
        let signature = decode_signature(&headers.signature).unwrap();
        let skew = Duration::from_secs(60);
        let identity = agent(&key);
        let ts = headers.timestamp;

        assert!(matches!(
            verify_request(&identity, "GET", "/v1/u/alice", ts, &signature, now, skew),
            Err(AuthError::BadSignature)
        ));
        assert!(matches!(
            verify_request(&identity, "PUT", "/v1/u/bob", ts, &signature, now, skew),
            Err(AuthError::BadSignature)
        ));
    }

    #[test]
    fn wrong_key_is_rejected() {
        let key = SigningKey::from_bytes(&[7u8; 32]);
        let other = SigningKey::from_bytes(&[8u8; 32]);
        let now = Utc::now();
        let headers = sign_request(&other, "a-1@idm", "GET", "/v1/whoami", now.timestamp());
        let signature = decode_signature(&headers.signature).unwrap();
        let skew = Duration::from_secs(60);
        let identity = agent(&key);
        let ts = headers.timestamp;

        assert!(matches!(
            verify_request(&identity, "GET", "/v1/whoami", ts, &signature, now, skew),
            Err(AuthError::BadSignature)
        ));
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        let key = SigningKey::from_bytes(&[7u8; 32]);
        let now = Utc::now();
        let old = now.timestamp() - 120;
        let headers = sign_request(&key, "a-1@idm", "GET", "/v1/whoami", old);
        let signature = decode_signature(&headers.signature).unwrap();

        assert!(matches!(
            verify_request(
                &agent(&key),
                "GET",
                "/v1/whoami",
                old,
                &signature,
                now,
                Duration::from_secs(60)
            ),
            Err(AuthError::StaleTimestamp)
        ));
    }

    #[test]
    fn malformed_signature_header() {
        assert!(matches!(decode_signature("not base64!"), Err(AuthError::InvalidHeader(_))));
        assert!(matches!(decode_signature("AAAA"), Err(AuthError::InvalidHeader(_))));
    }
}

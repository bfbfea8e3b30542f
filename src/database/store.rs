use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::database::models::identity::{Identity, IdentityError, ProviderId};

/// Errors returned by every IdentityStore backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("more than one identity matches {0}")]
    Ambiguous(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid identity: {0}")]
    InvalidRecord(#[from] IdentityError),

    #[error("store operation timed out")]
    Timeout,

    #[error("backend error: {0}")]
    Backend(String),

    #[error(transparent)]
    Sqlx(sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => StoreError::Timeout,
            other => StoreError::Sqlx(other),
        }
    }
}

/// Durable, concurrency-safe access to identity records.
///
/// Implementations serialize conflicting writes per provider id and never
/// cache records across calls. Timestamps only move forward: writing an older
/// `last_login` or `last_discharge` than the stored one keeps the stored one.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Insert or update the record keyed by its provider id.
    ///
    /// Fails with `Conflict` when another provider id already holds the
    /// username. `None` timestamps leave the stored values untouched.
    async fn upsert_identity(&self, identity: &Identity) -> Result<(), StoreError>;

    async fn find_by_username(&self, username: &str) -> Result<Identity, StoreError>;

    /// Fails with `Ambiguous` when more than one record shares the email.
    async fn find_by_email(&self, email: &str) -> Result<Identity, StoreError>;

    async fn find_by_provider_id(&self, provider_id: &ProviderId) -> Result<Identity, StoreError>;

    async fn record_login(
        &self,
        provider_id: &ProviderId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn record_discharge(
        &self,
        provider_id: &ProviderId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Release backend resources. Safe to call more than once.
    async fn close(&self);
}

pub type SharedStore = Arc<dyn IdentityStore>;

/// Validate and normalize a record before any backend writes it.
pub(crate) fn prepare(identity: &Identity) -> Result<Identity, StoreError> {
    identity.validate()?;
    let mut identity = identity.clone();
    identity.normalize();
    Ok(identity)
}

pub(crate) fn later(
    stored: Option<DateTime<Utc>>,
    incoming: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    match (stored, incoming) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

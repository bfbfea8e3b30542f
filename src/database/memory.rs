use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::database::models::identity::{Identity, ProviderId};
use crate::database::store::{later, prepare, IdentityStore, StoreError};

/// In-process store used by tests and by `IDM_STORE=memory`.
///
/// The lock is only held across in-memory map operations, never across I/O.
#[derive(Default)]
pub struct MemoryStore {
    identities: RwLock<HashMap<ProviderId, Identity>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn update_timestamp<F>(
        &self,
        provider_id: &ProviderId,
        apply: F,
    ) -> Result<(), StoreError>
    where
        F: FnOnce(&mut Identity),
    {
        let mut identities = self.identities.write().await;
        let identity = identities
            .get_mut(provider_id)
            .ok_or_else(|| StoreError::NotFound(format!("identity {provider_id}")))?;
        apply(identity);
        Ok(())
    }
}

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn upsert_identity(&self, identity: &Identity) -> Result<(), StoreError> {
        let mut incoming = prepare(identity)?;
        let mut identities = self.identities.write().await;

        if let Some(holder) = identities
            .values()
            .find(|other| {
                other.username == incoming.username && other.provider_id != incoming.provider_id
            })
        {
            tracing::debug!(
                "username {} already held by {}",
                incoming.username,
                holder.provider_id
            );
            return Err(StoreError::Conflict(format!(
                "username {} already in use",
                incoming.username
            )));
        }

        if let Some(existing) = identities.get(&incoming.provider_id) {
            incoming.last_login = later(existing.last_login, incoming.last_login);
            incoming.last_discharge = later(existing.last_discharge, incoming.last_discharge);
        }
        identities.insert(incoming.provider_id.clone(), incoming);
        Ok(())
    }

    async fn find_by_username(&self, username: &str) -> Result<Identity, StoreError> {
        let identities = self.identities.read().await;
        identities
            .values()
            .find(|identity| identity.username == username)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("user {username}")))
    }

    async fn find_by_email(&self, email: &str) -> Result<Identity, StoreError> {
        if email.is_empty() {
            return Err(StoreError::NotFound("empty email".to_string()));
        }
        let identities = self.identities.read().await;
        let mut matches = identities.values().filter(|identity| identity.email == email);
        match (matches.next(), matches.next()) {
            (None, _) => Err(StoreError::NotFound(format!("email {email:?}"))),
            (Some(identity), None) => Ok(identity.clone()),
            (Some(_), Some(_)) => Err(StoreError::Ambiguous(format!("email {email:?}"))),
        }
    }

    async fn find_by_provider_id(&self, provider_id: &ProviderId) -> Result<Identity, StoreError> {
        let identities = self.identities.read().await;
        identities
            .get(provider_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("identity {provider_id}")))
    }

    async fn record_login(
        &self,
        provider_id: &ProviderId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.update_timestamp(provider_id, |identity| {
            identity.last_login = later(identity.last_login, Some(at));
        })
        .await
    }

    async fn record_discharge(
        &self,
        provider_id: &ProviderId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.update_timestamp(provider_id, |identity| {
            identity.last_discharge = later(identity.last_discharge, Some(at));
        })
        .await
    }

    async fn close(&self) {}
}

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use tracing::info;

use crate::config::DatabaseConfig;
use crate::database::models::identity::{Identity, ProviderId};
use crate::database::store::{prepare, IdentityStore, StoreError};

const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS identities (
        provider          TEXT NOT NULL,
        external_id       TEXT NOT NULL,
        username          TEXT NOT NULL UNIQUE,
        name              TEXT NOT NULL DEFAULT '',
        email             TEXT NOT NULL DEFAULT '',
        groups            TEXT[] NOT NULL DEFAULT '{}',
        public_keys       TEXT[] NOT NULL DEFAULT '{}',
        owner_provider    TEXT,
        owner_external_id TEXT,
        last_login        TIMESTAMPTZ,
        last_discharge    TIMESTAMPTZ,
        extra_info        JSONB NOT NULL DEFAULT '{}',
        PRIMARY KEY (provider, external_id)
    )
"#;

const CREATE_EMAIL_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS identities_email_idx ON identities (email)";

const SELECT_COLUMNS: &str = r#"
    SELECT provider, external_id, username, name, email, groups, public_keys,
           owner_provider, owner_external_id, last_login, last_discharge, extra_info
    FROM identities
"#;

// GREATEST ignores NULL, so an unset incoming timestamp keeps the stored one
// and a stored timestamp never moves backward.
const UPSERT: &str = r#"
    INSERT INTO identities (
        provider, external_id, username, name, email, groups, public_keys,
        owner_provider, owner_external_id, last_login, last_discharge, extra_info
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
    ON CONFLICT (provider, external_id) DO UPDATE SET
        username          = EXCLUDED.username,
        name              = EXCLUDED.name,
        email             = EXCLUDED.email,
        groups            = EXCLUDED.groups,
        public_keys       = EXCLUDED.public_keys,
        owner_provider    = EXCLUDED.owner_provider,
        owner_external_id = EXCLUDED.owner_external_id,
        last_login        = GREATEST(identities.last_login, EXCLUDED.last_login),
        last_discharge    = GREATEST(identities.last_discharge, EXCLUDED.last_discharge),
        extra_info        = EXCLUDED.extra_info
"#;

#[derive(Debug, FromRow)]
struct IdentityRow {
    provider: String,
    external_id: String,
    username: String,
    name: String,
    email: String,
    groups: Vec<String>,
    public_keys: Vec<String>,
    owner_provider: Option<String>,
    owner_external_id: Option<String>,
    last_login: Option<DateTime<Utc>>,
    last_discharge: Option<DateTime<Utc>>,
    extra_info: Json<BTreeMap<String, Vec<String>>>,
}

impl TryFrom<IdentityRow> for Identity {
    type Error = StoreError;

    fn try_from(row: IdentityRow) -> Result<Self, Self::Error> {
        let public_keys = row
            .public_keys
            .iter()
            .map(|key| key.parse())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::Backend(format!("stored key for {}: {e}", row.username)))?;

        let owner = match (row.owner_provider, row.owner_external_id) {
            (Some(provider), Some(external_id)) => Some(ProviderId::new(provider, external_id)),
            _ => None,
        };

        Ok(Identity {
            provider_id: ProviderId::new(row.provider, row.external_id),
            username: row.username,
            name: row.name,
            email: row.email,
            groups: row.groups,
            public_keys,
            owner,
            last_login: row.last_login,
            last_discharge: row.last_discharge,
            extra_info: row.extra_info.0,
        })
    }
}

/// Postgres-backed identity store.
///
/// Per-identity serialization comes from Postgres row locks: every write is a
/// single statement against one primary-key row.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn connect(config: &DatabaseConfig, url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout))
            .connect(url)
            .await?;
        info!("Connected identity store pool (max {} connections)", config.max_connections);
        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the identities table and its indexes when missing.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(CREATE_TABLE).execute(&self.pool).await?;
        sqlx::query(CREATE_EMAIL_INDEX).execute(&self.pool).await?;
        info!("Identity store schema is up to date");
        Ok(())
    }

    async fn select_where(&self, clause: &str, args: &[&str]) -> Result<Vec<Identity>, StoreError> {
        let sql = format!("{SELECT_COLUMNS} WHERE {clause}");
        let mut query = sqlx::query_as::<_, IdentityRow>(&sql);
        for arg in args {
            query = query.bind(*arg);
        }
        query
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Identity::try_from)
            .collect()
    }

    async fn set_timestamp(
        &self,
        column: &'static str,
        provider_id: &ProviderId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let sql = format!(
            "UPDATE identities SET {column} = GREATEST({column}, $3) \
             WHERE provider = $1 AND external_id = $2"
        );
        let result = sqlx::query(&sql)
            .bind(provider_id.provider())
            .bind(provider_id.external_id())
            .bind(at)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("identity {provider_id}")));
        }
        Ok(())
    }
}

#[async_trait]
impl IdentityStore for PostgresStore {
    async fn upsert_identity(&self, identity: &Identity) -> Result<(), StoreError> {
        let identity = prepare(identity)?;
        let public_keys: Vec<String> =
            identity.public_keys.iter().map(ToString::to_string).collect();

        let result = sqlx::query(UPSERT)
            .bind(identity.provider_id.provider())
            .bind(identity.provider_id.external_id())
            .bind(&identity.username)
            .bind(&identity.name)
            .bind(&identity.email)
            .bind(&identity.groups)
            .bind(&public_keys)
            .bind(identity.owner.as_ref().map(|o| o.provider().to_string()))
            .bind(identity.owner.as_ref().map(|o| o.external_id().to_string()))
            .bind(identity.last_login)
            .bind(identity.last_discharge)
            .bind(Json(identity.extra_info.clone()))
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                tracing::debug!("upsert of {} rejected: {}", identity.provider_id, db.message());
                Err(StoreError::Conflict(format!(
                    "username {} already in use",
                    identity.username
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find_by_username(&self, username: &str) -> Result<Identity, StoreError> {
        self.select_where("username = $1", &[username])
            .await?
            .pop()
            .ok_or_else(|| StoreError::NotFound(format!("user {username}")))
    }

    async fn find_by_email(&self, email: &str) -> Result<Identity, StoreError> {
        if email.is_empty() {
            return Err(StoreError::NotFound("empty email".to_string()));
        }
        let mut matches = self.select_where("email = $1 LIMIT 2", &[email]).await?;
        match matches.len() {
            0 => Err(StoreError::NotFound(format!("email {email:?}"))),
            1 => Ok(matches.remove(0)),
            _ => Err(StoreError::Ambiguous(format!("email {email:?}"))),
        }
    }

    async fn find_by_provider_id(&self, provider_id: &ProviderId) -> Result<Identity, StoreError> {
        self.select_where(
            "provider = $1 AND external_id = $2",
            &[provider_id.provider(), provider_id.external_id()],
        )
        .await?
        .pop()
        .ok_or_else(|| StoreError::NotFound(format!("identity {provider_id}")))
    }

    async fn record_login(
        &self,
        provider_id: &ProviderId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.set_timestamp("last_login", provider_id, at).await
    }

    async fn record_discharge(
        &self,
        provider_id: &ProviderId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.set_timestamp("last_discharge", provider_id, at).await
    }

    async fn close(&self) {
        if !self.pool.is_closed() {
            self.pool.close().await;
            info!("Closed identity store pool");
        }
    }
}

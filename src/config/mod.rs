use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::server::ServerParams;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub private_addr: String,
    pub public_addr: String,
    pub static_root: Option<PathBuf>,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub backend: StoreBackend,
    pub url: Option<String>,
    pub max_connections: u32,
    pub connection_timeout: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub admin_group: String,
    pub admin_agent_public_key: Option<String>,
    pub auth_max_skew_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        let private_addr = "127.0.0.1:8081".to_string();
        Self {
            server: ServerConfig {
                public_addr: format!("http://{}", private_addr),
                private_addr,
                static_root: None,
                request_timeout_secs: 30,
            },
            database: DatabaseConfig {
                backend: StoreBackend::Postgres,
                url: None,
                max_connections: 10,
                connection_timeout: 30,
            },
            security: SecurityConfig {
                admin_group: "idm-admin".to_string(),
                admin_agent_public_key: None,
                auth_max_skew_secs: 60,
            },
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| env::var(key).ok())
    }

    fn with_overrides<F>(mut self, var: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        // Server overrides
        if let Some(v) = var("IDM_PRIVATE_ADDR") {
            self.server.public_addr = format!("http://{}", v);
            self.server.private_addr = v;
        }
        if let Some(v) = var("IDM_PUBLIC_ADDR") {
            self.server.public_addr = v;
        }
        if let Some(v) = var("IDM_STATIC_ROOT").filter(|v| !v.is_empty()) {
            self.server.static_root = Some(PathBuf::from(v));
        }
        if let Some(v) = var("IDM_REQUEST_TIMEOUT") {
            self.server.request_timeout_secs =
                v.parse().unwrap_or(self.server.request_timeout_secs);
        }

        // Database overrides
        match var("IDM_STORE").as_deref() {
            Some("memory") => self.database.backend = StoreBackend::Memory,
            Some("postgres") => self.database.backend = StoreBackend::Postgres,
            Some(other) => tracing::warn!(
                "Unknown IDM_STORE {:?}, using {:?}",
                other,
                self.database.backend
            ),
            None => {}
        }
        if let Some(v) = var("DATABASE_URL") {
            self.database.url = Some(v);
        }
        if let Some(v) = var("DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = v.parse().unwrap_or(self.database.max_connections);
        }
        if let Some(v) = var("DATABASE_CONNECTION_TIMEOUT") {
            self.database.connection_timeout =
                v.parse().unwrap_or(self.database.connection_timeout);
        }

        // Security overrides
        if let Some(v) = var("IDM_ADMIN_GROUP") {
            self.security.admin_group = v;
        }
        if let Some(v) = var("IDM_ADMIN_AGENT_PUBLIC_KEY").filter(|v| !v.is_empty()) {
            self.security.admin_agent_public_key = Some(v);
        }
        if let Some(v) = var("IDM_AUTH_MAX_SKEW") {
            self.security.auth_max_skew_secs =
                v.parse().unwrap_or(self.security.auth_max_skew_secs);
        }

        self
    }

    pub fn server_params(&self) -> ServerParams {
        ServerParams {
            private_addr: self.server.private_addr.clone(),
            public_addr: self.server.public_addr.clone(),
            static_root: self.server.static_root.clone(),
            admin_group: self.security.admin_group.clone(),
            auth_max_skew: Duration::from_secs(self.security.auth_max_skew_secs),
            request_timeout: Duration::from_secs(self.server.request_timeout_secs),
        }
    }
}

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Key in `extra_info` under which providers record a user's SSH keys.
pub const SSH_KEYS: &str = "sshkeys";

const MAX_USERNAME_LEN: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("invalid provider id {0:?}: expected provider:external-id")]
    InvalidProviderId(String),

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("invalid username {0:?}")]
    InvalidUsername(String),

    #[error("invalid group name {0:?}")]
    InvalidGroup(String),

    #[error("identity {0} cannot own itself")]
    SelfOwned(String),
}

/// Composite `(provider, external-id)` key of an identity.
///
/// Renders as `provider:external-id`. The provider part never contains a
/// colon, so the first colon always separates the two halves.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProviderId {
    provider: String,
    external_id: String,
}

impl ProviderId {
    pub fn new(provider: impl Into<String>, external_id: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            external_id: external_id.into(),
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn external_id(&self) -> &str {
        &self.external_id
    }

    pub fn validate(&self) -> Result<(), IdentityError> {
        if self.provider.is_empty() || self.provider.contains(':') || self.external_id.is_empty() {
            return Err(IdentityError::InvalidProviderId(self.to_string()));
        }
        Ok(())
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.external_id)
    }
}

impl FromStr for ProviderId {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (provider, external_id) = s
            .split_once(':')
            .ok_or_else(|| IdentityError::InvalidProviderId(s.to_string()))?;
        let id = ProviderId::new(provider, external_id);
        id.validate()?;
        Ok(id)
    }
}

impl Serialize for ProviderId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ProviderId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// Raw 32-byte ed25519 public key, exchanged as standard base64.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; 32]);

impl PublicKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({self})")
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&STANDARD.encode(self.0))
    }
}

impl FromStr for PublicKey {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = STANDARD
            .decode(s.trim())
            .map_err(|e| IdentityError::InvalidPublicKey(e.to_string()))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| {
                IdentityError::InvalidPublicKey(format!("expected 32 bytes, got {}", b.len()))
            })?;
        Ok(Self(bytes))
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// A principal in the directory.
///
/// Unset string attributes are empty strings and unset collections are empty,
/// so the wire form always carries every field. Unset timestamps are `None`
/// and serialize as `null`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub provider_id: ProviderId,
    pub username: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub public_keys: Vec<PublicKey>,
    /// Identity this agent acts for. A lookup relation only: it is not
    /// required to exist.
    #[serde(default)]
    pub owner: Option<ProviderId>,
    #[serde(default)]
    pub last_login: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_discharge: Option<DateTime<Utc>>,
    #[serde(default)]
    pub extra_info: BTreeMap<String, Vec<String>>,
}

impl Identity {
    pub fn new(provider_id: ProviderId, username: impl Into<String>) -> Self {
        Self {
            provider_id,
            username: username.into(),
            name: String::new(),
            email: String::new(),
            groups: Vec::new(),
            public_keys: Vec::new(),
            owner: None,
            last_login: None,
            last_discharge: None,
            extra_info: BTreeMap::new(),
        }
    }

    pub fn is_agent(&self) -> bool {
        self.owner.is_some()
    }

    pub fn is_member_of(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g == group)
    }

    pub fn ssh_keys(&self) -> &[String] {
        self.extra_info.get(SSH_KEYS).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Check structural constraints before the record is written.
    pub fn validate(&self) -> Result<(), IdentityError> {
        self.provider_id.validate()?;

        if self.username.is_empty()
            || self.username.len() > MAX_USERNAME_LEN
            || self.username.chars().any(|c| c.is_whitespace() || c.is_control())
        {
            return Err(IdentityError::InvalidUsername(self.username.clone()));
        }

        if let Some(group) = self
            .groups
            .iter()
            .find(|g| g.is_empty() || g.chars().any(|c| c.is_whitespace() || c.is_control()))
        {
            return Err(IdentityError::InvalidGroup(group.clone()));
        }

        if let Some(owner) = &self.owner {
            owner.validate()?;
            if *owner == self.provider_id {
                return Err(IdentityError::SelfOwned(self.provider_id.to_string()));
            }
        }

        Ok(())
    }

    /// Drop repeated group names, keeping the first occurrence of each.
    pub fn normalize(&mut self) {
        let mut seen = std::collections::HashSet::new();
        self.groups.retain(|g| seen.insert(g.clone()));
    }
}

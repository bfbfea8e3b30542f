use std::fs;
use std::path::Path;

use anyhow::{bail, Context};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};

use crate::auth::public_key_of;
use crate::database::models::identity::PublicKey;

/// Key pair stored in an agent file. The private half is the base64 32-byte
/// ed25519 seed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyPair {
    pub public: PublicKey,
    pub private: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentEntry {
    pub url: String,
    pub username: String,
}

/// Credential bundle of an agent identity:
///
/// ```json
/// {"key": {"public": "...", "private": "..."},
///  "agents": [{"url": "https://idm.example.com", "username": "admin@idm"}]}
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentFile {
    pub key: KeyPair,
    #[serde(default)]
    pub agents: Vec<AgentEntry>,
}

impl AgentFile {
    pub fn new(key: &SigningKey, agents: Vec<AgentEntry>) -> Self {
        Self {
            key: KeyPair {
                public: public_key_of(key),
                private: STANDARD.encode(key.to_bytes()),
            },
            agents,
        }
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("cannot read agent file {}", path.display()))?;
        serde_json::from_str(&data)
            .with_context(|| format!("cannot parse agent file {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let data = serde_json::to_string_pretty(self)?;
        fs::write(path, data).with_context(|| format!("cannot write agent file {}", path.display()))
    }

    pub fn signing_key(&self) -> anyhow::Result<SigningKey> {
        let seed = STANDARD
            .decode(self.key.private.trim())
            .context("agent private key is not valid base64")?;
        let seed: [u8; 32] = match seed.try_into() {
            Ok(seed) => seed,
            Err(seed) => bail!("agent private key must be 32 bytes, got {}", seed.len()),
        };

        let key = SigningKey::from_bytes(&seed);
        if public_key_of(&key) != self.key.public {
            bail!("agent public key does not match its private key");
        }
        Ok(key)
    }

    /// The entry for `url`, or the first entry when no URL is given.
    pub fn agent_for(&self, url: Option<&str>) -> anyhow::Result<&AgentEntry> {
        match url {
            Some(url) => {
                let want = url.trim_end_matches('/');
                self.agents
                    .iter()
                    .find(|a| a.url.trim_end_matches('/') == want)
                    .or_else(|| self.agents.first())
                    .with_context(|| format!("agent file has no agent for {url}"))
            }
            None => self.agents.first().context("agent file lists no agents"),
        }
    }
}

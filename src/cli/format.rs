use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::cli::OutputFormat;
use crate::database::models::identity::Identity;

/// Placeholder for a timestamp that was never recorded.
pub const NEVER: &str = "never";

/// Printed form of an identity. Field order here is the output order.
///
/// Users print `external-id`, `name` and `email`; agents print `owner` and
/// `public-keys` in their place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentityView {
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(rename = "public-keys", skip_serializing_if = "Option::is_none")]
    pub public_keys: Option<Vec<String>>,
    #[serde(rename = "external-id", skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub groups: Vec<String>,
    #[serde(rename = "ssh-keys")]
    pub ssh_keys: Vec<String>,
    #[serde(rename = "last-login")]
    pub last_login: String,
    #[serde(rename = "last-discharge")]
    pub last_discharge: String,
}

impl IdentityView {
    /// `owner_name` is the resolved username of the owner, if any.
    pub fn new(identity: &Identity, owner_name: Option<String>) -> Self {
        let (owner, public_keys, external_id, name, email) = match &identity.owner {
            Some(owner) => (
                Some(owner_name.unwrap_or_else(|| owner.to_string())),
                Some(identity.public_keys.iter().map(ToString::to_string).collect()),
                None,
                None,
                None,
            ),
            None => (
                None,
                None,
                Some(identity.provider_id.to_string()),
                Some(identity.name.clone()),
                Some(identity.email.clone()),
            ),
        };

        Self {
            username: identity.username.clone(),
            owner,
            public_keys,
            external_id,
            name,
            email,
            groups: identity.groups.clone(),
            ssh_keys: identity.ssh_keys().to_vec(),
            last_login: timestamp(identity.last_login),
            last_discharge: timestamp(identity.last_discharge),
        }
    }
}

pub fn timestamp(t: Option<DateTime<Utc>>) -> String {
    match t {
        Some(t) => t.to_rfc3339_opts(SecondsFormat::Secs, true),
        None => NEVER.to_string(),
    }
}

pub fn render(view: &IdentityView, format: OutputFormat) -> anyhow::Result<String> {
    match format {
        OutputFormat::Yaml => Ok(serde_yaml::to_string(view)?),
        OutputFormat::Json => Ok(format!("{}\n", serde_json::to_string(view)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::identity::{ProviderId, PublicKey, SSH_KEYS};
    use chrono::TimeZone;

    fn keys(value: &serde_yaml::Value) -> Vec<String> {
        value
            .as_mapping()
            .unwrap()
            .keys()
            .map(|k| k.as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn user_fields_in_order() {
        let mut bob = Identity::new(ProviderId::new("test", "bob"), "bob");
        bob.name = "Bob Robertson".into();
        bob.email = "bob@example.com".into();
        bob.groups = vec!["g1".into(), "g2".into()];
        bob.extra_info.insert(SSH_KEYS.into(), vec!["ssh-rsa AAAA bob".into()]);
        bob.last_login = Some(Utc.with_ymd_and_hms(2016, 12, 25, 0, 0, 0).unwrap());

        let out = render(&IdentityView::new(&bob, None), OutputFormat::Yaml).unwrap();
        let value: serde_yaml::Value = serde_yaml::from_str(&out).unwrap();
        assert_eq!(
            keys(&value),
            [
                "username",
                "external-id",
                "name",
                "email",
                "groups",
                "ssh-keys",
                "last-login",
                "last-discharge",
            ]
        );
        assert_eq!(value["external-id"].as_str(), Some("test:bob"));
        assert_eq!(value["last-login"].as_str(), Some("2016-12-25T00:00:00Z"));
        assert_eq!(value["last-discharge"].as_str(), Some(NEVER));
    }

    #[test]
    fn agent_fields_in_order() {
        let mut agent = Identity::new(ProviderId::new("idm", "a-1"), "a-1@idm");
        agent.owner = Some(ProviderId::new("test", "alice"));
        agent.public_keys = vec![PublicKey::from_bytes([0u8; 32])];

        let view = IdentityView::new(&agent, Some("alice".into()));
        let out = render(&view, OutputFormat::Yaml).unwrap();
        let value: serde_yaml::Value = serde_yaml::from_str(&out).unwrap();
        assert_eq!(
            keys(&value),
            [
                "username",
                "owner",
                "public-keys",
                "groups",
                "ssh-keys",
                "last-login",
                "last-discharge",
            ]
        );
        assert_eq!(value["owner"].as_str(), Some("alice"));
        assert_eq!(
            value["public-keys"][0].as_str(),
            Some("AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=")
        );
        assert!(out.contains("last-login: never"));
    }

    #[test]
    fn unresolved_owner_prints_provider_id() {
        let mut agent = Identity::new(ProviderId::new("idm", "a-1"), "a-1@idm");
        agent.owner = Some(ProviderId::new("test", "gone"));
        assert_eq!(IdentityView::new(&agent, None).owner.as_deref(), Some("test:gone"));
    }

    #[test]
    fn json_keeps_field_order() {
        let bob = Identity::new(ProviderId::new("test", "bob"), "bob");
        let out = render(&IdentityView::new(&bob, None), OutputFormat::Json).unwrap();
        let prefix = r#"{"username":"bob","external-id":"test:bob","name":"","email":"""#;
        assert!(out.starts_with(prefix), "{out}");
        assert!(out.ends_with("\"last-discharge\":\"never\"}\n"));
    }
}

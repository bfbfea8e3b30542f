use chrono::{TimeZone, Utc};
use clap::Parser;
use ed25519_dalek::SigningKey;
use serde_json::Value;

use identity_directory::auth::{public_key_of, ADMIN_AGENT_USERNAME};
use identity_directory::cli::{run, Cli, CliError};
use identity_directory::database::{IdentityStore, PublicKey, SharedStore};

mod common;
use common::*;

struct Fixture {
    _dir: tempfile::TempDir,
    agent_file: String,
    server: TestServer,
    store: SharedStore,
}

async fn fixture() -> Fixture {
    let store = memory_store();
    let server = TestServer::spawn(v1_server(store.clone()).await.unwrap()).await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let agent_file =
        write_agent_file(dir.path(), &admin_key(), &server.base_url, ADMIN_AGENT_USERNAME)
            .unwrap()
            .display()
            .to_string();
    Fixture { _dir: dir, agent_file, server, store }
}

impl Fixture {
    async fn show(&self, args: &[&str]) -> Result<String, CliError> {
        let mut argv = vec!["idm-admin", "--agent", self.agent_file.as_str(), "show"];
        argv.extend_from_slice(args);
        run(Cli::try_parse_from(argv).unwrap()).await
    }

    async fn add(&self, identity: &Identity) {
        self.store.upsert_identity(identity).await.unwrap();
    }
}

fn yaml_keys(out: &str) -> Vec<String> {
    let value: serde_yaml::Value = serde_yaml::from_str(out).unwrap();
    value
        .as_mapping()
        .unwrap()
        .keys()
        .map(|k| k.as_str().unwrap().to_string())
        .collect()
}

fn bob() -> Identity {
    let mut bob = Identity::new(ProviderId::new("test", "bob"), "bob");
    bob.name = "Bob Robertson".into();
    bob.email = "bob@example.com".into();
    bob.groups = vec!["g1".into(), "g2".into()];
    bob.extra_info.insert("sshkeys".into(), vec!["ssh-rsa AAAA bob@host".into()]);
    bob.last_login = Some(Utc.with_ymd_and_hms(2016, 12, 25, 0, 0, 0).unwrap());
    bob
}

#[tokio::test]
async fn test_show_user_by_username() {
    let f = fixture().await;
    f.add(&bob()).await;

    let out = f.show(&["-u", "bob"]).await.unwrap();
    assert_eq!(
        yaml_keys(&out),
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

    let value: serde_yaml::Value = serde_yaml::from_str(&out).unwrap();
    assert_eq!(value["username"].as_str(), Some("bob"));
    assert_eq!(value["external-id"].as_str(), Some("test:bob"));
    assert_eq!(value["name"].as_str(), Some("Bob Robertson"));
    assert_eq!(value["groups"][1].as_str(), Some("g2"));
    assert_eq!(value["ssh-keys"][0].as_str(), Some("ssh-rsa AAAA bob@host"));
    assert_eq!(value["last-login"].as_str(), Some("2016-12-25T00:00:00Z"));
    assert!(out.contains("last-discharge: never"), "{out}");
}

#[tokio::test]
async fn test_show_user_by_email() {
    let f = fixture().await;
    f.add(&bob()).await;

    let out = f.show(&["-e", "bob@example.com"]).await.unwrap();
    let value: serde_yaml::Value = serde_yaml::from_str(&out).unwrap();
    assert_eq!(value["username"].as_str(), Some("bob"));
}

#[tokio::test]
async fn test_show_email_not_found() {
    let f = fixture().await;

    let err = f.show(&["-e", "bob@example.com"]).await.unwrap_err();
    assert_eq!(err.exit_code(), 1);
    assert!(
        err.to_string().contains(r#"no user found for email "bob@example.com""#),
        "{err}"
    );
}

#[tokio::test]
async fn test_show_user_not_found() {
    let f = fixture().await;

    let err = f.show(&["-u", "bob"]).await.unwrap_err();
    assert_eq!(err.exit_code(), 1);
    assert!(err.to_string().contains("user bob not found"), "{err}");
}

#[tokio::test]
async fn test_show_without_user_is_usage_error() {
    let cli = Cli::try_parse_from(["idm-admin", "--agent", "/nonexistent/agent", "show"]).unwrap();
    let err = run(cli).await.unwrap_err();
    assert_eq!(err.exit_code(), 2);
    assert_eq!(err.to_string(), "no user specified, please specify either username or email");
}

#[tokio::test]
async fn test_show_agent_with_owner() {
    let f = fixture().await;

    let alice = Identity::new(ProviderId::new("static", "alice"), "alice");
    f.add(&alice).await;

    let mut agent = Identity::new(ProviderId::new("idm", "a-1234"), "a-1234@idm");
    agent.owner = Some(alice.provider_id.clone());
    agent.public_keys = vec![PublicKey::from_bytes([0u8; 32])];
    agent.groups = vec!["g1".into()];
    f.add(&agent).await;

    let out = f.show(&["-u", "a-1234@idm"]).await.unwrap();
    assert_eq!(
        yaml_keys(&out),
        ["username", "owner", "public-keys", "groups", "ssh-keys", "last-login", "last-discharge"]
    );
    assert!(out.contains("owner: alice"), "{out}");
    assert!(out.contains("AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA="), "{out}");
    assert!(out.contains("last-login: never"), "{out}");
}

#[tokio::test]
async fn test_show_agent_with_dangling_owner() {
    let f = fixture().await;

    let mut agent = Identity::new(ProviderId::new("idm", "a-99"), "a-99@idm");
    agent.owner = Some(ProviderId::new("static", "ghost"));
    f.add(&agent).await;

    let out = f.show(&["-u", "a-99@idm"]).await.unwrap();
    let value: serde_yaml::Value = serde_yaml::from_str(&out).unwrap();
    assert_eq!(value["owner"].as_str(), Some("static:ghost"));
}

#[tokio::test]
async fn test_show_json_format() {
    let f = fixture().await;
    f.add(&bob()).await;

    let out = f.show(&["-u", "bob", "--format", "json"]).await.unwrap();
    assert!(out.starts_with(r#"{"username":"bob","external-id":"test:bob""#), "{out}");

    let value: Value = serde_json::from_str(&out).unwrap();
    assert_eq!(value["last-discharge"], "never");
    assert_eq!(value["groups"], serde_json::json!(["g1", "g2"]));
}

#[tokio::test]
async fn test_show_with_unknown_agent_key() {
    let f = fixture().await;
    let dir = tempfile::tempdir().unwrap();
    let stranger = SigningKey::from_bytes(&[5u8; 32]);
    assert_ne!(public_key_of(&stranger), public_key_of(&admin_key()));
    let path =
        write_agent_file(dir.path(), &stranger, &f.server.base_url, ADMIN_AGENT_USERNAME).unwrap();
    let path = path.to_str().unwrap();

    let cli = Cli::try_parse_from(["idm-admin", "-a", path, "show", "-u", "bob"]).unwrap();
    let err = run(cli).await.unwrap_err();
    assert_eq!(err.exit_code(), 1);
    assert!(err.to_string().contains("invalid signature"), "{err}");
}

#[tokio::test]
async fn test_show_with_missing_agent_file() {
    let args = ["idm-admin", "-a", "/nonexistent/agent", "show", "-u", "bob"];
    let cli = Cli::try_parse_from(args).unwrap();
    let err = run(cli).await.unwrap_err();
    assert_eq!(err.exit_code(), 1);
}

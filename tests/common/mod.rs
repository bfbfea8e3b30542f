#![allow(dead_code)]

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use axum::body::Body;
use axum::http::{Method, Request};
use axum::response::Response;
use chrono::Utc;
use ed25519_dalek::SigningKey;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing_subscriber::fmt::MakeWriter;

use identity_directory::auth::{
    bootstrap_admin_agent, public_key_of, sign_request, ADMIN_AGENT_USERNAME, SIGNATURE_HEADER,
    TIMESTAMP_HEADER, USERNAME_HEADER,
};
use identity_directory::cli::agent::{AgentEntry, AgentFile};
use identity_directory::database::{MemoryStore, SharedStore};
use identity_directory::handlers::V1;
use identity_directory::server::{Server, ServerParams, Versions};

pub use identity_directory::database::{Identity, ProviderId};

pub const ADMIN_GROUP: &str = "idm-admin";

pub fn admin_key() -> SigningKey {
    SigningKey::from_bytes(&[42u8; 32])
}

pub fn params() -> ServerParams {
    ServerParams {
        admin_group: ADMIN_GROUP.to_string(),
        ..ServerParams::default()
    }
}

pub fn memory_store() -> SharedStore {
    Arc::new(MemoryStore::new())
}

/// A `v1` server over `store` with the bootstrap admin agent in place.
pub async fn v1_server(store: SharedStore) -> Result<Server> {
    bootstrap_admin_agent(store.as_ref(), public_key_of(&admin_key()), ADMIN_GROUP).await?;

    let mut versions: Versions = BTreeMap::new();
    versions.insert("v1".to_string(), Arc::new(V1));
    Ok(Server::new(store, params(), versions)?)
}

/// Build a request signed as `username` with `key`.
pub fn signed_request(
    key: &SigningKey,
    username: &str,
    method: Method,
    uri: &str,
    body: Body,
) -> Request<Body> {
    let headers = sign_request(key, username, method.as_str(), uri, Utc::now().timestamp());
    Request::builder()
        .method(method)
        .uri(uri)
        .header(USERNAME_HEADER, headers.username)
        .header(TIMESTAMP_HEADER, headers.timestamp.to_string())
        .header(SIGNATURE_HEADER, headers.signature)
        .header("content-type", "application/json")
        .body(body)
        .expect("valid request")
}

pub fn admin_get(uri: &str) -> Request<Body> {
    signed_request(&admin_key(), ADMIN_AGENT_USERNAME, Method::GET, uri, Body::empty())
}

pub async fn body_bytes(response: Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("readable body")
        .to_vec()
}

pub async fn body_json(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).expect("json body")
}

/// A server listening on a free local port.
pub struct TestServer {
    pub base_url: String,
    pub server: Arc<Server>,
    handle: JoinHandle<()>,
}

impl TestServer {
    pub async fn spawn(server: Server) -> Result<Self> {
        let port = portpicker::pick_unused_port().context("failed to pick free port")?;
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
            .await
            .with_context(|| format!("failed to bind port {port}"))?;

        let server = Arc::new(server);
        let router = server.router();
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });

        Ok(Self {
            base_url: format!("http://127.0.0.1:{port}"),
            server,
            handle,
        })
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Write an agent file for `username` at `url` into `dir`.
pub fn write_agent_file(
    dir: &Path,
    key: &SigningKey,
    url: &str,
    username: &str,
) -> Result<PathBuf> {
    let path = dir.join("admin.agent");
    AgentFile::new(
        key,
        vec![AgentEntry {
            url: url.to_string(),
            username: username.to_string(),
        }],
    )
    .save(&path)?;
    Ok(path)
}

/// Collects formatted log output for the current thread.
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    pub fn contents(&self) -> String {
        let buf = self.0.lock().expect("log buffer");
        String::from_utf8_lossy(&buf).into_owned()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.0.lock().expect("log buffer").extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = LogCapture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Route this thread's tracing output into a buffer until the guard drops.
pub fn capture_logs() -> (LogCapture, tracing::subscriber::DefaultGuard) {
    let capture = LogCapture::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(capture.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .finish();
    (capture, tracing::subscriber::set_default(subscriber))
}

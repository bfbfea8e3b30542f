//! Server composition: merges the routes of every registered API version into
//! one router and wraps it with the shared middleware.
//!
//! Request flow: trace → CORS → panic isolation → request deadline →
//! `/<version>/...` dispatch, `/static/...` files, or 404.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::handler::Handler;
use axum::http::{Method, StatusCode};
use axum::routing::{MethodFilter, MethodRouter};
use axum::Router;
use thiserror::Error;
use tower_http::services::ServeDir;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::database::store::SharedStore;
use crate::middleware::{cors, panic};

/// Prefix under which the static asset root is served.
pub const STATIC_PREFIX: &str = "/static";

/// Server-wide parameters handed to every API version.
#[derive(Debug, Clone)]
pub struct ServerParams {
    pub private_addr: String,
    pub public_addr: String,
    /// Directory served under `/static/`; `None` disables static files.
    pub static_root: Option<PathBuf>,
    pub admin_group: String,
    pub auth_max_skew: Duration,
    pub request_timeout: Duration,
}

impl Default for ServerParams {
    fn default() -> Self {
        Self {
            private_addr: "127.0.0.1:8081".to_string(),
            public_addr: "http://127.0.0.1:8081".to_string(),
            static_root: None,
            admin_group: "idm-admin".to_string(),
            auth_max_skew: Duration::from_secs(60),
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("identity server must serve at least one version of the API")]
    NoVersions,

    #[error("invalid API version name {0:?}")]
    InvalidVersionName(String),

    #[error("invalid route {method} {path:?} in API version {version}")]
    InvalidRoute {
        version: String,
        method: Method,
        path: String,
    },

    #[error("route {method} {path} registered more than once")]
    DuplicateRoute { method: Method, path: String },

    #[error("static file root {0:?} is not a directory")]
    StaticRoot(PathBuf),

    #[error("cannot create API version {version}: {source}")]
    Version {
        version: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

type BuildMethodRouter = Box<dyn FnOnce(MethodFilter) -> MethodRouter + Send>;

/// One endpoint of an API version: a method, a path relative to the
/// version's prefix, and the handler serving it.
pub struct Route {
    method: Method,
    path: String,
    build: BuildMethodRouter,
}

impl Route {
    /// A route whose handler extracts `State<S>`.
    pub fn new<H, T, S>(method: Method, path: impl Into<String>, handler: H, state: S) -> Self
    where
        H: Handler<T, S>,
        T: 'static,
        S: Clone + Send + Sync + 'static,
    {
        Self {
            method,
            path: path.into(),
            build: Box::new(move |filter: MethodFilter| {
                axum::routing::on(filter, handler).with_state::<()>(state)
            }),
        }
    }

    pub fn get<H, T>(path: impl Into<String>, handler: H) -> Self
    where
        H: Handler<T, ()>,
        T: 'static,
    {
        Self::new(Method::GET, path, handler, ())
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Construction capability implemented by each API version.
pub trait ApiVersion: Send + Sync {
    fn routes(&self, store: SharedStore, params: &ServerParams) -> anyhow::Result<Vec<Route>>;
}

impl<F> ApiVersion for F
where
    F: Fn(SharedStore, &ServerParams) -> anyhow::Result<Vec<Route>> + Send + Sync,
{
    fn routes(&self, store: SharedStore, params: &ServerParams) -> anyhow::Result<Vec<Route>> {
        self(store, params)
    }
}

/// Version name → version implementation.
pub type Versions = BTreeMap<String, Arc<dyn ApiVersion>>;

/// The composed HTTP surface plus the store it owns.
pub struct Server {
    router: Router,
    store: SharedStore,
    closed: AtomicBool,
}

impl Server {
    pub fn new(
        store: SharedStore,
        params: ServerParams,
        versions: Versions,
    ) -> Result<Self, ServerError> {
        if versions.is_empty() {
            return Err(ServerError::NoVersions);
        }

        let mut paths: BTreeMap<String, MethodRouter> = BTreeMap::new();
        let mut registered = HashSet::new();
        // Mirrors the router's path matcher so malformed or overlapping
        // patterns fail construction instead of panicking in `Router::route`.
        let mut matcher = matchit::Router::new();

        for (name, version) in &versions {
            let prefix = version_prefix(name)?;
            let routes = version
                .routes(store.clone(), &params)
                .map_err(|e| ServerError::Version {
                    version: name.clone(),
                    source: e.into(),
                })?;

            for route in routes {
                let invalid = || ServerError::InvalidRoute {
                    version: name.clone(),
                    method: route.method.clone(),
                    path: route.path.clone(),
                };
                if !route.path.starts_with('/') {
                    return Err(invalid());
                }
                let filter = MethodFilter::try_from(route.method.clone()).map_err(|_| invalid())?;

                let path = format!("{prefix}{}", route.path);
                if !registered.insert((route.method.clone(), path.clone())) {
                    return Err(ServerError::DuplicateRoute {
                        method: route.method,
                        path,
                    });
                }

                let method_router = match paths.remove(&path) {
                    Some(existing) => existing.merge((route.build)(filter)),
                    None => {
                        if let Err(e) = matcher.insert(path.clone(), ()) {
                            tracing::debug!("Rejected {} {}: {}", route.method, path, e);
                            return Err(invalid());
                        }
                        (route.build)(filter)
                    }
                };
                tracing::debug!("Registered {} {}", route.method, path);
                paths.insert(path, method_router);
            }
            info!("Serving API version {} under {}", name, prefix);
        }

        // A known path with an unregistered method is still "no route": 404, not 405.
        let mut router = Router::new();
        for (path, method_router) in paths {
            router = router.route(&path, method_router.fallback(not_found));
        }

        if let Some(root) = &params.static_root {
            if !root.is_dir() {
                return Err(ServerError::StaticRoot(root.clone()));
            }
            router = router.nest_service(STATIC_PREFIX, ServeDir::new(root));
            info!("Serving static files from {} under {}/", root.display(), STATIC_PREFIX);
        }

        // Last layer added runs first.
        let router = router
            .layer(TimeoutLayer::new(params.request_timeout))
            .layer(panic::layer())
            .layer(cors::layer())
            .layer(TraceLayer::new_for_http());

        Ok(Self {
            router,
            store,
            closed: AtomicBool::new(false),
        })
    }

    /// The routable HTTP surface. Cheap to clone.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Release the store. Later calls are no-ops.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.store.close().await;
        info!("Identity server closed");
    }
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

fn version_prefix(name: &str) -> Result<String, ServerError> {
    let trimmed = name.trim_matches('/');
    let reserved = format!("/{trimmed}") == STATIC_PREFIX;
    if trimmed.is_empty()
        || reserved
        || trimmed.contains('/')
        || trimmed.starts_with(':')
        || trimmed.starts_with('*')
    {
        return Err(ServerError::InvalidVersionName(name.to_string()));
    }
    Ok(format!("/{trimmed}"))
}

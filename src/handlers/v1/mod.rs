use axum::extract::FromRef;
use axum::http::Method;

use crate::database::store::SharedStore;
use crate::middleware::{AdminGroup, AgentVerifier};
use crate::server::{ApiVersion, Route, ServerParams};

pub mod users;
pub mod whoami;

/// State shared by every v1 handler.
#[derive(Clone)]
pub struct V1State {
    pub store: SharedStore,
    pub verifier: AgentVerifier,
    pub admin_group: AdminGroup,
}

impl FromRef<V1State> for AgentVerifier {
    fn from_ref(state: &V1State) -> Self {
        state.verifier.clone()
    }
}

impl FromRef<V1State> for AdminGroup {
    fn from_ref(state: &V1State) -> Self {
        state.admin_group.clone()
    }
}

/// The `v1` identity API: user lookup and administration for agents.
pub struct V1;

impl ApiVersion for V1 {
    fn routes(&self, store: SharedStore, params: &ServerParams) -> anyhow::Result<Vec<Route>> {
        if params.admin_group.trim().is_empty() {
            anyhow::bail!("admin group must not be empty");
        }

        let state = V1State {
            verifier: AgentVerifier {
                store: store.clone(),
                max_skew: params.auth_max_skew,
            },
            admin_group: AdminGroup(params.admin_group.clone()),
            store,
        };

        Ok(vec![
            Route::new(Method::GET, "/u", users::query_users, state.clone()),
            Route::new(Method::GET, "/u/:username", users::get_user, state.clone()),
            Route::new(Method::PUT, "/u/:username", users::put_user, state.clone()),
            Route::new(
                Method::GET,
                "/x/:provider/:external_id",
                users::get_by_provider_id,
                state.clone(),
            ),
            Route::new(Method::GET, "/whoami", whoami::whoami, state),
        ])
    }
}

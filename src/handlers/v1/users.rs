use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use super::V1State;
use crate::database::models::identity::{Identity, ProviderId};
use crate::database::store::StoreError;
use crate::error::ApiError;
use crate::middleware::AdminCaller;

#[derive(Debug, Deserialize)]
pub struct UserQuery {
    pub email: Option<String>,
}

/// GET /v1/u/:username - show a single identity
pub async fn get_user(
    _admin: AdminCaller,
    State(state): State<V1State>,
    path: Result<Path<String>, PathRejection>,
) -> Result<Json<Identity>, ApiError> {
    let Path(username) = path?;

    match state.store.find_by_username(&username).await {
        Ok(identity) => Ok(Json(identity)),
        Err(StoreError::NotFound(_)) => {
            Err(ApiError::not_found(format!("user {username} not found")))
        }
        Err(e) => Err(e.into()),
    }
}

/// GET /v1/u?email=<email> - find the single identity holding an email
pub async fn query_users(
    _admin: AdminCaller,
    State(state): State<V1State>,
    query: Result<Query<UserQuery>, QueryRejection>,
) -> Result<Json<Identity>, ApiError> {
    let Query(query) = query?;
    let email = query
        .email
        .filter(|e| !e.is_empty())
        .ok_or_else(|| ApiError::bad_request("email query parameter is required"))?;

    match state.store.find_by_email(&email).await {
        Ok(identity) => Ok(Json(identity)),
        Err(StoreError::NotFound(_)) => Err(ApiError::not_found(format!(
            "no user found for email {email:?}"
        ))),
        Err(StoreError::Ambiguous(_)) => Err(ApiError::ambiguous(format!(
            "more than one user found for email {email:?}"
        ))),
        Err(e) => Err(e.into()),
    }
}

/// GET /v1/x/:provider/:external_id - look up by provider id
pub async fn get_by_provider_id(
    _admin: AdminCaller,
    State(state): State<V1State>,
    path: Result<Path<(String, String)>, PathRejection>,
) -> Result<Json<Identity>, ApiError> {
    let Path((provider, external_id)) = path?;
    let provider_id = ProviderId::new(provider, external_id);
    provider_id
        .validate()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    let identity = state.store.find_by_provider_id(&provider_id).await?;
    Ok(Json(identity))
}

/// PUT /v1/u/:username - create or update an identity
///
/// The body is a full identity record; its username must match the path.
/// Returns the stored record.
pub async fn put_user(
    AdminCaller(admin): AdminCaller,
    State(state): State<V1State>,
    path: Result<Path<String>, PathRejection>,
    body: Result<Json<Identity>, JsonRejection>,
) -> Result<(StatusCode, Json<Identity>), ApiError> {
    let Path(username) = path?;
    let Json(identity) = body?;

    if identity.username != username {
        return Err(ApiError::bad_request(format!(
            "username {:?} in body does not match {:?}",
            identity.username, username
        )));
    }

    state.store.upsert_identity(&identity).await?;
    tracing::info!(
        "{} updated identity {} ({})",
        admin.username,
        identity.username,
        identity.provider_id
    );

    let stored = state.store.find_by_provider_id(&identity.provider_id).await?;
    Ok((StatusCode::OK, Json(stored)))
}

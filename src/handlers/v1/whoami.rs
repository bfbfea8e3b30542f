use axum::Json;

use crate::database::models::identity::Identity;
use crate::middleware::Caller;

/// GET /v1/whoami - the authenticated agent's own record
pub async fn whoami(Caller(identity): Caller) -> Json<Identity> {
    Json(identity)
}

pub mod agents;
pub mod health;
pub mod notifications;
pub mod tasks;
pub mod webhooks;

use actix_web::{web, HttpRequest, HttpResponse};

use crate::auth::{AuthContext, AuthError, AuthRejection};
use crate::auth::{SIGNATURE_HEADER, TIMESTAMP_HEADER, WALLET_ADDRESS_HEADER};
use crate::models::Agent;
use crate::AppState;

/// Shared wallet-signature check for controller handlers.
pub async fn require_auth(
    state: &web::Data<AppState>,
    req: &HttpRequest,
) -> Result<AuthContext, HttpResponse> {
    match state.auth.require_auth(req.headers()).await {
        Ok(ctx) => Ok(ctx),
        Err(AuthError::Rejected(AuthRejection::MissingHeaders)) => {
            Err(HttpResponse::Unauthorized().json(serde_json::json!({
                "error": AuthRejection::MissingHeaders.message(),
                "required": [WALLET_ADDRESS_HEADER, SIGNATURE_HEADER, TIMESTAMP_HEADER]
            })))
        }
        Err(AuthError::Rejected(rejection)) => {
            Err(HttpResponse::Unauthorized().json(serde_json::json!({
                "error": rejection.message()
            })))
        }
        Err(AuthError::Database(e)) => {
            log::error!("[Auth] Agent lookup failed: {}", e);
            Err(HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Database error"
            })))
        }
    }
}

/// Never rejects; anonymous callers get `None`.
pub async fn optional_auth(state: &web::Data<AppState>, req: &HttpRequest) -> Option<AuthContext> {
    state.auth.optional_auth(req.headers()).await
}

/// Authenticate and resolve the caller's agent row, creating it on first use.
pub async fn require_agent(
    state: &web::Data<AppState>,
    req: &HttpRequest,
) -> Result<(Agent, bool), HttpResponse> {
    let ctx = require_auth(state, req).await?;
    resolve_agent(state, ctx)
}

/// The authenticated caller's agent row, created on first use. The bool is "newly created".
pub fn resolve_agent(
    state: &web::Data<AppState>,
    ctx: AuthContext,
) -> Result<(Agent, bool), HttpResponse> {
    if let Some(agent) = ctx.agent {
        return Ok((agent, false));
    }
    state.db.get_or_create_agent(&ctx.wallet_address).map_err(|e| {
        log::error!("Failed to create agent for {}: {}", ctx.wallet_address, e);
        HttpResponse::InternalServerError().json(serde_json::json!({
            "error": "Failed to create agent profile"
        }))
    })
}

use actix_web::{web, HttpRequest, HttpResponse, Responder};
use serde::Deserialize;

use super::{optional_auth, require_agent, require_auth, resolve_agent};
use crate::models::{Agent, AgentProfileUpdate};
use crate::AppState;

const MAX_BIO_CHARS: usize = 500;

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub moltbook_id: Option<String>,
    pub moltbook_handle: Option<String>,
    pub bio: Option<String>,
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/agents")
            .route("/me", web::get().to(get_me))
            .route("/me", web::patch().to(update_me))
            .route("/{id}", web::get().to(get_agent)),
    );
}

async fn get_me(state: web::Data<AppState>, req: HttpRequest) -> impl Responder {
    let (agent, is_new) = match require_agent(&state, &req).await {
        Ok(found) => found,
        Err(resp) => return resp,
    };

    HttpResponse::Ok().json(serde_json::json!({
        "agent": agent,
        "isNew": is_new
    }))
}

async fn update_me(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<UpdateProfileRequest>,
) -> impl Responder {
    let ctx = match require_auth(&state, &req).await {
        Ok(ctx) => ctx,
        Err(resp) => return resp,
    };

    if let Some(bio) = &body.bio {
        if bio.chars().count() > MAX_BIO_CHARS {
            return HttpResponse::BadRequest().json(serde_json::json!({
                "error": format!("Bio must be {} characters or less", MAX_BIO_CHARS)
            }));
        }
    }

    let (agent, _) = match resolve_agent(&state, ctx) {
        Ok(found) => found,
        Err(resp) => return resp,
    };

    let body = body.into_inner();
    let update = AgentProfileUpdate {
        moltbook_id: body.moltbook_id,
        moltbook_handle: body.moltbook_handle,
        bio: body.bio,
    };

    match state.db.update_agent_profile(&agent.id, &update) {
        Ok(Some(agent)) => HttpResponse::Ok().json(serde_json::json!({ "agent": agent })),
        Ok(None) => {
            HttpResponse::NotFound().json(serde_json::json!({ "error": "Agent not found" }))
        }
        Err(e) => {
            log::error!("Failed to update profile for {}: {}", agent.id, e);
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Failed to update profile"
            }))
        }
    }
}

/// Lookup by agent id, or by wallet when the path starts with `0x`.
async fn get_agent(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
) -> impl Responder {
    let id = path.into_inner();
    let viewer = optional_auth(&state, &req).await;

    let lookup = if id.starts_with("0x") {
        state.db.get_agent_by_wallet(&id)
    } else {
        state.db.get_agent(&id)
    };

    let agent: Agent = match lookup {
        Ok(Some(agent)) => agent,
        Ok(None) => {
            return HttpResponse::NotFound().json(serde_json::json!({ "error": "Agent not found" }));
        }
        Err(e) => {
            log::error!("Failed to load agent {}: {}", id, e);
            return HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Internal server error"
            }));
        }
    };

    let stats = match state.db.get_task_stats(&agent.id) {
        Ok(stats) => stats,
        Err(e) => {
            log::error!("Failed to load task stats for {}: {}", agent.id, e);
            return HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Internal server error"
            }));
        }
    };

    let is_self = viewer
        .map(|ctx| ctx.wallet_address == agent.wallet_address)
        .unwrap_or(false);

    HttpResponse::Ok().json(serde_json::json!({
        "agent": agent,
        "stats": stats,
        "is_self": is_self
    }))
}

use actix_web::{web, HttpRequest, HttpResponse, Responder};
use serde::Deserialize;

use super::require_agent;
use crate::AppState;

const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_PAGE_SIZE: i64 = 100;

/// Query params are parsed leniently: bad values fall back to defaults.
#[derive(Debug, Deserialize)]
pub struct ListNotificationsQuery {
    pub limit: Option<String>,
    pub offset: Option<String>,
    pub unread_only: Option<String>,
}

impl ListNotificationsQuery {
    fn limit(&self) -> i64 {
        self.limit
            .as_deref()
            .and_then(|l| l.trim().parse::<i64>().ok())
            .filter(|l| *l > 0)
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .min(MAX_PAGE_SIZE)
    }

    fn offset(&self) -> i64 {
        self.offset
            .as_deref()
            .and_then(|o| o.trim().parse::<i64>().ok())
            .filter(|o| *o >= 0)
            .unwrap_or(0)
    }

    fn unread_only(&self) -> bool {
        self.unread_only.as_deref() == Some("true")
    }
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/notifications")
            .route("", web::get().to(list_notifications))
            .route("/read-all", web::post().to(mark_all_read))
            .route("/{id}/read", web::patch().to(mark_read)),
    );
}

async fn list_notifications(
    state: web::Data<AppState>,
    req: HttpRequest,
    query: web::Query<ListNotificationsQuery>,
) -> impl Responder {
    let (agent, _) = match require_agent(&state, &req).await {
        Ok(found) => found,
        Err(resp) => return resp,
    };

    let limit = query.limit();
    let offset = query.offset();

    let (notifications, total) = match state
        .db
        .list_notifications(&agent.id, limit, offset, query.unread_only())
    {
        Ok(page) => page,
        Err(e) => {
            log::error!("Failed to list notifications for {}: {}", agent.id, e);
            return HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Failed to fetch notifications"
            }));
        }
    };

    let unread_count = state.db.count_unread_notifications(&agent.id).unwrap_or_else(|e| {
        log::warn!("Failed to count unread notifications for {}: {}", agent.id, e);
        0
    });

    HttpResponse::Ok().json(serde_json::json!({
        "notifications": notifications,
        "pagination": {
            "total": total,
            "limit": limit,
            "offset": offset,
            "has_more": offset + limit < total
        },
        "unread_count": unread_count
    }))
}

async fn mark_read(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
) -> impl Responder {
    let (agent, _) = match require_agent(&state, &req).await {
        Ok(found) => found,
        Err(resp) => return resp,
    };
    let id = path.into_inner();

    let notification = match state.db.get_notification(&id) {
        Ok(Some(n)) => n,
        Ok(None) => {
            return HttpResponse::NotFound().json(serde_json::json!({
                "error": "Notification not found"
            }));
        }
        Err(e) => {
            log::error!("Failed to load notification {}: {}", id, e);
            return HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Failed to update notification"
            }));
        }
    };

    if notification.agent_id != agent.id {
        return HttpResponse::Forbidden().json(serde_json::json!({ "error": "Access denied" }));
    }

    if notification.read_at.is_some() {
        return HttpResponse::Ok().json(serde_json::json!({
            "message": "Already marked as read",
            "notification": notification
        }));
    }

    match state.db.mark_notification_read(&id) {
        Ok(Some(updated)) => HttpResponse::Ok().json(serde_json::json!({
            "message": "Marked as read",
            "notification": updated
        })),
        Ok(None) => HttpResponse::NotFound().json(serde_json::json!({
            "error": "Notification not found"
        })),
        Err(e) => {
            log::error!("Failed to mark notification {} read: {}", id, e);
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Failed to update notification"
            }))
        }
    }
}

async fn mark_all_read(state: web::Data<AppState>, req: HttpRequest) -> impl Responder {
    let (agent, _) = match require_agent(&state, &req).await {
        Ok(found) => found,
        Err(resp) => return resp,
    };

    match state.db.mark_all_notifications_read(&agent.id) {
        Ok(updated) => HttpResponse::Ok().json(serde_json::json!({
            "message": "All notifications marked as read",
            "updated_count": updated
        })),
        Err(e) => {
            log::error!("Failed to mark all notifications read for {}: {}", agent.id, e);
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Failed to update notifications"
            }))
        }
    }
}

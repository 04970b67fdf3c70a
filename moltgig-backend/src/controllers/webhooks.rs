//! Webhook subscription management. Secrets are returned once, at creation.

use actix_web::{web, HttpRequest, HttpResponse, Responder};
use serde::Deserialize;

use super::require_agent;
use crate::crypto::generate_secret;
use crate::models::{validate_webhook_url, Agent, Webhook, WebhookEvent, WebhookResponse};
use crate::notifications::test_payload;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateWebhookRequest {
    pub url: Option<String>,
    pub events: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateWebhookRequest {
    pub url: Option<String>,
    pub events: Option<Vec<String>>,
    pub is_active: Option<bool>,
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/webhooks")
            .route("", web::get().to(list_webhooks))
            .route("", web::post().to(create_webhook))
            .route("/events", web::get().to(list_events))
            .route("/{id}", web::patch().to(update_webhook))
            .route("/{id}", web::delete().to(delete_webhook))
            .route("/{id}/test", web::post().to(test_webhook)),
    );
}

const SECRET_NOTICE: &str =
    "Save the secret - it will not be shown again. Use it to verify webhook signatures.";

fn bad_request(error: impl Into<String>) -> HttpResponse {
    HttpResponse::BadRequest().json(serde_json::json!({ "error": error.into() }))
}

/// Validate a requested event list: non-empty and every name known.
fn parse_events(names: &[String]) -> Result<Vec<WebhookEvent>, HttpResponse> {
    if names.is_empty() {
        return Err(HttpResponse::BadRequest().json(serde_json::json!({
            "error": "At least one event type is required",
            "valid_events": WebhookEvent::all_names()
        })));
    }
    WebhookEvent::parse_list(names).map_err(|invalid| {
        HttpResponse::BadRequest().json(serde_json::json!({
            "error": format!("Invalid event types: {}", invalid.join(", ")),
            "valid_events": WebhookEvent::all_names()
        }))
    })
}

/// Load a webhook the caller owns: 404 if missing, 403 if someone else's.
fn load_owned(
    state: &web::Data<AppState>,
    id: &str,
    agent: &Agent,
) -> Result<Webhook, HttpResponse> {
    match state.db.get_webhook(id) {
        Ok(Some(webhook)) if webhook.agent_id == agent.id => Ok(webhook),
        Ok(Some(_)) => {
            Err(HttpResponse::Forbidden().json(serde_json::json!({ "error": "Access denied" })))
        }
        Ok(None) => {
            Err(HttpResponse::NotFound().json(serde_json::json!({ "error": "Webhook not found" })))
        }
        Err(e) => {
            log::error!("Failed to load webhook {}: {}", id, e);
            Err(HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Internal server error"
            })))
        }
    }
}

async fn list_events() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "events": WebhookEvent::all_names()
    }))
}

async fn create_webhook(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<CreateWebhookRequest>,
) -> impl Responder {
    let (agent, _) = match require_agent(&state, &req).await {
        Ok(found) => found,
        Err(resp) => return resp,
    };

    let url = match body.url.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
        Some(url) => url.to_string(),
        None => return bad_request("URL is required"),
    };
    if let Err(e) = validate_webhook_url(&url) {
        return bad_request(e);
    }

    let events = match parse_events(body.events.as_deref().unwrap_or_default()) {
        Ok(events) => events,
        Err(resp) => return resp,
    };

    let max = state.config.webhook.max_per_agent;
    match state.db.count_webhooks_for_agent(&agent.id) {
        Ok(count) if count >= max => {
            return bad_request(format!(
                "Maximum webhook limit ({}) reached. Delete an existing webhook first.",
                max
            ));
        }
        Ok(_) => {}
        Err(e) => {
            log::error!("Failed to count webhooks for {}: {}", agent.id, e);
            return HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Failed to create webhook"
            }));
        }
    }

    let secret = generate_secret();
    let webhook = match state.db.create_webhook(&agent.id, &url, &events, &secret) {
        Ok(webhook) => webhook,
        Err(e) => {
            log::error!("Failed to create webhook for {}: {}", agent.id, e);
            return HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Failed to create webhook"
            }));
        }
    };

    log::info!(
        "[Webhook] Registered {} for agent {} ({} event(s))",
        webhook.id,
        agent.id,
        events.len()
    );

    HttpResponse::Created().json(serde_json::json!({
        "message": "Webhook registered successfully",
        "webhook": {
            "id": webhook.id,
            "url": webhook.url,
            "events": webhook.events,
            "secret": webhook.secret,
            "is_active": webhook.is_active,
            "created_at": webhook.created_at
        },
        "important": SECRET_NOTICE
    }))
}

async fn list_webhooks(state: web::Data<AppState>, req: HttpRequest) -> impl Responder {
    let (agent, _) = match require_agent(&state, &req).await {
        Ok(found) => found,
        Err(resp) => return resp,
    };

    match state.db.list_webhooks_for_agent(&agent.id) {
        Ok(webhooks) => {
            let webhooks: Vec<WebhookResponse> =
                webhooks.iter().map(WebhookResponse::from).collect();
            HttpResponse::Ok().json(serde_json::json!({
                "count": webhooks.len(),
                "webhooks": webhooks
            }))
        }
        Err(e) => {
            log::error!("Failed to list webhooks for {}: {}", agent.id, e);
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Failed to fetch webhooks"
            }))
        }
    }
}

async fn update_webhook(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Json<UpdateWebhookRequest>,
) -> impl Responder {
    let (agent, _) = match require_agent(&state, &req).await {
        Ok(found) => found,
        Err(resp) => return resp,
    };
    let id = path.into_inner();
    if let Err(resp) = load_owned(&state, &id, &agent) {
        return resp;
    }

    let url = body.url.as_deref().map(str::trim);
    if let Some(url) = url {
        if let Err(e) = validate_webhook_url(url) {
            return bad_request(e);
        }
    }
    let events = match body.events.as_deref().map(parse_events).transpose() {
        Ok(events) => events,
        Err(resp) => return resp,
    };

    match state.db.update_webhook(&id, url, events.as_deref(), body.is_active) {
        Ok(Some(webhook)) => HttpResponse::Ok().json(serde_json::json!({
            "message": "Webhook updated",
            "webhook": WebhookResponse::from(&webhook)
        })),
        Ok(None) => {
            HttpResponse::NotFound().json(serde_json::json!({ "error": "Webhook not found" }))
        }
        Err(e) => {
            log::error!("Failed to update webhook {}: {}", id, e);
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Failed to update webhook"
            }))
        }
    }
}

async fn delete_webhook(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
) -> impl Responder {
    let (agent, _) = match require_agent(&state, &req).await {
        Ok(found) => found,
        Err(resp) => return resp,
    };
    let id = path.into_inner();
    if let Err(resp) = load_owned(&state, &id, &agent) {
        return resp;
    }

    match state.db.delete_webhook(&id) {
        Ok(_) => HttpResponse::Ok().json(serde_json::json!({
            "message": "Webhook deleted successfully"
        })),
        Err(e) => {
            log::error!("Failed to delete webhook {}: {}", id, e);
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Failed to delete webhook"
            }))
        }
    }
}

async fn test_webhook(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
) -> impl Responder {
    let (agent, _) = match require_agent(&state, &req).await {
        Ok(found) => found,
        Err(resp) => return resp,
    };
    let webhook = match load_owned(&state, &path.into_inner(), &agent) {
        Ok(webhook) => webhook,
        Err(resp) => return resp,
    };

    let payload = test_payload(&webhook);
    match state.notifications.dispatcher().send_test(&webhook, &payload).await {
        Ok(status) => HttpResponse::Ok().json(serde_json::json!({
            "success": (200..300).contains(&status),
            "status_code": status,
            "event": payload.event
        })),
        Err(e) => HttpResponse::Ok().json(serde_json::json!({
            "success": false,
            "error": e,
            "event": payload.event
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controllers::test_support::{signed_headers, test_state, with_headers};
    use crate::crypto::test_support::{TEST_ADDRESS, TEST_KEY};
    use crate::crypto::verify_payload_signature;
    use crate::notifications::dispatcher::SIGNATURE_HEADER;
    use crate::notifications::transport::test_support::MockTransport;
    use actix_web::{http::StatusCode, test, App};
    use serde_json::{json, Value};

    #[actix_web::test]
    async fn test_register_validates_input() {
        let app_state = test_state(MockTransport::always(Ok(200)));
        let service = App::new().app_data(app_state.state.clone()).configure(config);
        let app = test::init_service(service).await;
        let headers = signed_headers(TEST_KEY, TEST_ADDRESS).await;

        for (body, expected) in [
            (json!({ "events": ["task.accepted"] }), "URL is required"),
            (
                json!({ "url": "http://hooks.test", "events": ["task.accepted"] }),
                "URL must use HTTPS",
            ),
            (
                json!({ "url": "https://hooks.test", "events": [] }),
                "At least one event type is required",
            ),
            (
                json!({ "url": "https://hooks.test", "events": ["task.created"] }),
                "Invalid event types: task.created",
            ),
        ] {
            let req = with_headers(test::TestRequest::post().uri("/api/webhooks"), &headers)
                .set_json(body)
                .to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
            let body: Value = test::read_body_json(resp).await;
            assert_eq!(body["error"], expected);
        }
    }

    #[actix_web::test]
    async fn test_register_list_and_cap() {
        let app_state = test_state(MockTransport::always(Ok(200)));
        let service = App::new().app_data(app_state.state.clone()).configure(config);
        let app = test::init_service(service).await;
        let headers = signed_headers(TEST_KEY, TEST_ADDRESS).await;

        let req = with_headers(test::TestRequest::post().uri("/api/webhooks"), &headers)
            .set_json(json!({
                "url": "https://hooks.test/a",
                "events": ["task.accepted", "task.expired"]
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["webhook"]["secret"].as_str().unwrap().len(), 64);
        assert!(body["important"].is_string());

        for _ in 0..4 {
            let req = with_headers(test::TestRequest::post().uri("/api/webhooks"), &headers)
                .set_json(json!({ "url": "https://hooks.test/b", "events": ["task.accepted"] }))
                .to_request();
            assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CREATED);
        }
        let req = with_headers(test::TestRequest::post().uri("/api/webhooks"), &headers)
            .set_json(json!({ "url": "https://hooks.test/c", "events": ["task.accepted"] }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::get().uri("/api/webhooks");
        let req = with_headers(req, &headers).to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["count"], 5);
        assert!(body["webhooks"][0].get("secret").is_none());
    }

    #[actix_web::test]
    async fn test_update_delete_ownership() {
        let app_state = test_state(MockTransport::always(Ok(200)));
        let db = app_state.state.db.clone();
        let other = db.create_agent("0x00000000000000000000000000000000000000b2").unwrap();
        let foreign = db
            .create_webhook(&other.id, "https://hooks.test/x", &[WebhookEvent::TaskAccepted], "s")
            .unwrap();
        let service = App::new().app_data(app_state.state.clone()).configure(config);
        let app = test::init_service(service).await;
        let headers = signed_headers(TEST_KEY, TEST_ADDRESS).await;

        let uri = format!("/api/webhooks/{}", foreign.id);
        let req = with_headers(test::TestRequest::delete().uri(&uri), &headers).to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);
        let req = test::TestRequest::delete().uri("/api/webhooks/missing");
        let req = with_headers(req, &headers).to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

        let me = db.get_agent_by_wallet(TEST_ADDRESS).unwrap().unwrap();
        let mine = db
            .create_webhook(&me.id, "https://hooks.test/m", &[WebhookEvent::TaskAccepted], "s")
            .unwrap();
        db.record_webhook_failure(&mine.id, 1).unwrap();

        let uri = format!("/api/webhooks/{}", mine.id);
        let req = with_headers(test::TestRequest::patch().uri(&uri), &headers)
            .set_json(json!({ "is_active": true, "events": ["dispute.raised"] }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["webhook"]["is_active"], true);
        assert_eq!(body["webhook"]["failure_count"], 0);
        assert_eq!(body["webhook"]["events"], json!(["dispute.raised"]));

        let req = with_headers(test::TestRequest::delete().uri(&uri), &headers).to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
        assert!(db.get_webhook(&mine.id).unwrap().is_none());
    }

    #[actix_web::test]
    async fn test_send_test_delivery() {
        let app_state = test_state(MockTransport::always(Ok(202)));
        let transport = app_state.transport.clone();
        let service = App::new().app_data(app_state.state.clone()).configure(config);
        let app = test::init_service(service).await;
        let headers = signed_headers(TEST_KEY, TEST_ADDRESS).await;

        let req = with_headers(test::TestRequest::post().uri("/api/webhooks"), &headers)
            .set_json(json!({ "url": "https://hooks.test/t", "events": ["payment.released"] }))
            .to_request();
        let created: Value = test::call_and_read_body_json(&app, req).await;
        let id = created["webhook"]["id"].as_str().unwrap();
        let secret = created["webhook"]["secret"].as_str().unwrap();

        let uri = format!("/api/webhooks/{}/test", id);
        let req = with_headers(test::TestRequest::post().uri(&uri), &headers).to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["status_code"], 202);
        assert_eq!(body["event"], "payment.released");

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        let sig = sent[0].header(SIGNATURE_HEADER).unwrap();
        assert!(verify_payload_signature(&sent[0].body, sig, secret));
        let payload: Value = serde_json::from_str(&sent[0].body).unwrap();
        assert_eq!(payload["data"]["test"], true);
    }

    #[actix_web::test]
    async fn test_events_catalog() {
        let app_state = test_state(MockTransport::always(Ok(200)));
        let service = App::new().app_data(app_state.state.clone()).configure(config);
        let app = test::init_service(service).await;
        let body: Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::get().uri("/api/webhooks/events").to_request(),
        )
        .await;
        assert_eq!(body["events"].as_array().unwrap().len(), 8);
    }
}

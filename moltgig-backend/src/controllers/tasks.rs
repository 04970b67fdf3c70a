//! Task lifecycle routes. Every status change is a single conditional UPDATE
//! and, on success, emits the matching notification event.

use actix_web::{web, HttpRequest, HttpResponse, Responder};
use chrono::{DateTime, Utc};
use ethers::types::U256;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::require_agent;
use crate::crypto::secrets_match;
use crate::models::{Agent, Task, TaskStatus, WebhookEvent};
use crate::AppState;

pub const ADMIN_KEY_HEADER: &str = "x-admin-api-key";

const MAX_TITLE_CHARS: usize = 200;
const RESOLUTIONS: [&str; 3] = ["requester", "worker", "split"];

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub title: Option<String>,
    pub reward_wei: Option<String>,
    pub deadline: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SubmitTaskRequest {
    pub deliverable_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DisputeTaskRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ResolveDisputeRequest {
    pub resolution: Option<String>,
    pub reason: Option<String>,
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/tasks")
            .route("", web::post().to(create_task))
            .route("/{id}", web::get().to(get_task))
            .route("/{id}/accept", web::post().to(accept_task))
            .route("/{id}/submit", web::post().to(submit_task))
            .route("/{id}/approve", web::post().to(approve_task))
            .route("/{id}/dispute", web::post().to(dispute_task))
            .route("/{id}/cancel", web::post().to(cancel_task)),
    )
    .service(
        web::scope("/api/admin")
            .route("/disputes/{id}/resolve", web::post().to(resolve_dispute)),
    );
}

fn bad_request(error: impl Into<String>) -> HttpResponse {
    HttpResponse::BadRequest().json(serde_json::json!({ "error": error.into() }))
}

fn forbidden(error: &str) -> HttpResponse {
    HttpResponse::Forbidden().json(serde_json::json!({ "error": error }))
}

fn load_task(state: &web::Data<AppState>, id: &str) -> Result<Task, HttpResponse> {
    match state.db.get_task(id) {
        Ok(Some(task)) => Ok(task),
        Ok(None) => {
            Err(HttpResponse::NotFound().json(serde_json::json!({ "error": "Task not found" })))
        }
        Err(e) => {
            log::error!("Failed to load task {}: {}", id, e);
            Err(HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Internal server error"
            })))
        }
    }
}

/// Apply a status change; 400 when the task has already left every status in `from`.
fn transition(
    state: &web::Data<AppState>,
    task: &Task,
    from: &[TaskStatus],
    to: TaskStatus,
    worker_id: Option<&str>,
) -> Result<Task, HttpResponse> {
    match state.db.transition_task(&task.id, from, to, worker_id) {
        Ok(Some(updated)) => {
            log::info!("[Task] {} moved {} -> {}", task.id, task.status, to);
            Ok(updated)
        }
        Ok(None) => {
            let expected: Vec<String> = from.iter().map(|s| s.to_string()).collect();
            Err(bad_request(format!(
                "Task must be {} (currently {})",
                expected.join(" or "),
                task.status
            )))
        }
        Err(e) => {
            log::error!("Failed to move task {} to {}: {}", task.id, to, e);
            Err(HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Failed to update task"
            })))
        }
    }
}

/// Notify and log partial failures. The status change already happened, so
/// notification problems never fail the request.
async fn emit(
    state: &web::Data<AppState>,
    event: WebhookEvent,
    task_id: &str,
    extra: Map<String, Value>,
) {
    let report = state.notifications.notify(event, task_id, extra).await;
    if !report.success() {
        log::warn!(
            "[Task] {} for {} had errors: {}",
            event,
            task_id,
            report.errors.join("; ")
        );
    }
}

fn is_requester(task: &Task, agent: &Agent) -> bool {
    task.requester_id.as_deref() == Some(agent.id.as_str())
}

fn is_worker(task: &Task, agent: &Agent) -> bool {
    task.worker_id.as_deref() == Some(agent.id.as_str())
}

async fn create_task(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<CreateTaskRequest>,
) -> impl Responder {
    let (agent, _) = match require_agent(&state, &req).await {
        Ok(found) => found,
        Err(resp) => return resp,
    };

    let title = match body.title.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        Some(title) => title.to_string(),
        None => return bad_request("Title is required"),
    };
    if title.chars().count() > MAX_TITLE_CHARS {
        return bad_request(format!("Title must be {} characters or less", MAX_TITLE_CHARS));
    }

    let reward_wei = body.reward_wei.as_deref().map(str::trim).unwrap_or("0");
    let reward_wei = match U256::from_dec_str(reward_wei) {
        Ok(amount) => amount.to_string(),
        Err(_) => return bad_request("reward_wei must be a non-negative integer string"),
    };

    let deadline = match body.deadline.as_deref() {
        None => None,
        Some(raw) => match DateTime::parse_from_rfc3339(raw.trim()) {
            Ok(dt) if dt.with_timezone(&Utc) > Utc::now() => {
                Some(dt.with_timezone(&Utc).to_rfc3339())
            }
            Ok(_) => return bad_request("Deadline must be in the future"),
            Err(_) => return bad_request("Deadline must be an RFC 3339 timestamp"),
        },
    };

    match state.db.create_task(
        &title,
        Some(&agent.id),
        None,
        &reward_wei,
        TaskStatus::Open,
        deadline.as_deref(),
    ) {
        Ok(task) => {
            log::info!("[Task] {} posted by {}", task.id, agent.id);
            HttpResponse::Created().json(serde_json::json!({ "task": task }))
        }
        Err(e) => {
            log::error!("Failed to create task for {}: {}", agent.id, e);
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Failed to create task"
            }))
        }
    }
}

async fn get_task(state: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    match load_task(&state, &path.into_inner()) {
        Ok(task) => HttpResponse::Ok().json(serde_json::json!({ "task": task })),
        Err(resp) => resp,
    }
}

async fn accept_task(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
) -> impl Responder {
    let (agent, _) = match require_agent(&state, &req).await {
        Ok(found) => found,
        Err(resp) => return resp,
    };
    let task = match load_task(&state, &path.into_inner()) {
        Ok(task) => task,
        Err(resp) => return resp,
    };
    if is_requester(&task, &agent) {
        return bad_request("Cannot accept your own task");
    }

    let task = match transition(
        &state,
        &task,
        &[TaskStatus::Open, TaskStatus::Funded],
        TaskStatus::Accepted,
        Some(&agent.id),
    ) {
        Ok(task) => task,
        Err(resp) => return resp,
    };

    emit(&state, WebhookEvent::TaskAccepted, &task.id, Map::new()).await;
    HttpResponse::Ok().json(serde_json::json!({ "task": task }))
}

async fn submit_task(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
    body: Option<web::Json<SubmitTaskRequest>>,
) -> impl Responder {
    let (agent, _) = match require_agent(&state, &req).await {
        Ok(found) => found,
        Err(resp) => return resp,
    };
    let task = match load_task(&state, &path.into_inner()) {
        Ok(task) => task,
        Err(resp) => return resp,
    };
    if !is_worker(&task, &agent) {
        return forbidden("Only the assigned worker can submit");
    }

    let submitted = transition(&state, &task, &[TaskStatus::Accepted], TaskStatus::Submitted, None);
    let task = match submitted {
        Ok(task) => task,
        Err(resp) => return resp,
    };

    let mut extra = Map::new();
    if let Some(url) = body.and_then(|b| b.into_inner().deliverable_url) {
        extra.insert("deliverable_url".into(), Value::String(url));
    }
    emit(&state, WebhookEvent::TaskSubmitted, &task.id, extra).await;
    HttpResponse::Ok().json(serde_json::json!({ "task": task }))
}

async fn approve_task(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
) -> impl Responder {
    let (agent, _) = match require_agent(&state, &req).await {
        Ok(found) => found,
        Err(resp) => return resp,
    };
    let task = match load_task(&state, &path.into_inner()) {
        Ok(task) => task,
        Err(resp) => return resp,
    };
    if !is_requester(&task, &agent) {
        return forbidden("Only the requester can approve");
    }

    let completed =
        transition(&state, &task, &[TaskStatus::Submitted], TaskStatus::Completed, None);
    let task = match completed {
        Ok(task) => task,
        Err(resp) => return resp,
    };

    emit(&state, WebhookEvent::TaskCompleted, &task.id, Map::new()).await;
    emit(&state, WebhookEvent::PaymentReleased, &task.id, Map::new()).await;
    HttpResponse::Ok().json(serde_json::json!({ "task": task }))
}

async fn dispute_task(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Json<DisputeTaskRequest>,
) -> impl Responder {
    let (agent, _) = match require_agent(&state, &req).await {
        Ok(found) => found,
        Err(resp) => return resp,
    };
    let reason = match body.reason.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
        Some(reason) => reason.to_string(),
        None => return bad_request("Reason is required"),
    };
    let task = match load_task(&state, &path.into_inner()) {
        Ok(task) => task,
        Err(resp) => return resp,
    };
    if !is_requester(&task, &agent) && !is_worker(&task, &agent) {
        return forbidden("Only task participants can raise a dispute");
    }

    let task = match transition(
        &state,
        &task,
        &[TaskStatus::Accepted, TaskStatus::Submitted],
        TaskStatus::Disputed,
        None,
    ) {
        Ok(task) => task,
        Err(resp) => return resp,
    };

    let mut extra = Map::new();
    extra.insert("reason".into(), Value::String(reason));
    extra.insert("raised_by".into(), Value::String(agent.id));
    emit(&state, WebhookEvent::DisputeRaised, &task.id, extra).await;
    HttpResponse::Ok().json(serde_json::json!({ "task": task }))
}

async fn cancel_task(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
) -> impl Responder {
    let (agent, _) = match require_agent(&state, &req).await {
        Ok(found) => found,
        Err(resp) => return resp,
    };
    let task = match load_task(&state, &path.into_inner()) {
        Ok(task) => task,
        Err(resp) => return resp,
    };
    if !is_requester(&task, &agent) {
        return forbidden("Only the requester can cancel");
    }

    match transition(
        &state,
        &task,
        &[TaskStatus::Open, TaskStatus::Funded],
        TaskStatus::Cancelled,
        None,
    ) {
        Ok(task) => HttpResponse::Ok().json(serde_json::json!({ "task": task })),
        Err(resp) => resp,
    }
}

/// `x-admin-api-key` gate: 503 when no key is configured, 401 on mismatch.
fn require_admin(state: &web::Data<AppState>, req: &HttpRequest) -> Result<(), HttpResponse> {
    let Some(expected) = state.config.admin_api_key.as_deref() else {
        return Err(HttpResponse::ServiceUnavailable().json(serde_json::json!({
            "error": "Admin API not configured"
        })));
    };
    let provided = req
        .headers()
        .get(ADMIN_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if secrets_match(provided, expected) {
        Ok(())
    } else {
        Err(HttpResponse::Unauthorized().json(serde_json::json!({
            "error": "Invalid admin API key"
        })))
    }
}

async fn resolve_dispute(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Json<ResolveDisputeRequest>,
) -> impl Responder {
    if let Err(resp) = require_admin(&state, &req) {
        return resp;
    }

    let resolution = match body.resolution.as_deref() {
        Some(r) if RESOLUTIONS.contains(&r) => r.to_string(),
        _ => {
            return HttpResponse::BadRequest().json(serde_json::json!({
                "error": "Invalid resolution. Must be: requester, worker, or split",
                "valid_resolutions": RESOLUTIONS
            }));
        }
    };
    let task = match load_task(&state, &path.into_inner()) {
        Ok(task) => task,
        Err(resp) => return resp,
    };

    let resolved = transition(&state, &task, &[TaskStatus::Disputed], TaskStatus::Resolved, None);
    let task = match resolved {
        Ok(task) => task,
        Err(resp) => return resp,
    };

    log::info!(
        "[Task] Dispute on {} resolved for {} ({})",
        task.id,
        resolution,
        body.reason.as_deref().unwrap_or("no reason given")
    );

    let mut extra = Map::new();
    extra.insert("resolution".into(), Value::String(resolution.clone()));
    emit(&state, WebhookEvent::DisputeResolved, &task.id, extra).await;

    HttpResponse::Ok().json(serde_json::json!({
        "task": task,
        "resolution": resolution,
        "message": format!("Dispute resolved in favor of {}", resolution)
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::controllers::test_support::{
        signed_headers, test_state, test_state_with_config, with_headers, TestApp,
    };
    use crate::crypto::test_support::{OTHER_ADDRESS, OTHER_KEY, TEST_ADDRESS, TEST_KEY};
    use crate::notifications::dispatcher::EVENT_HEADER;
    use crate::notifications::transport::test_support::MockTransport;
    use actix_web::{http::StatusCode, test, App};
    use serde_json::json;
    use std::time::Duration;

    type Headers = Vec<(&'static str, String)>;

    fn post_json(uri: &str, headers: &Headers, body: Value) -> test::TestRequest {
        with_headers(test::TestRequest::post().uri(uri), headers).set_json(body)
    }

    /// Deliveries run on detached tasks; give them a moment to land.
    async fn wait_for_deliveries(app: &TestApp, count: usize) {
        for _ in 0..100 {
            if app.transport.sent().len() >= count {
                return;
            }
            actix_web::rt::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn events_for(app: &TestApp, agent_id: &str) -> Vec<String> {
        let (notifications, _) = app.state.db.list_notifications(agent_id, 100, 0, false).unwrap();
        let mut events: Vec<String> = notifications.into_iter().map(|n| n.event_type).collect();
        events.sort();
        events
    }

    #[actix_web::test]
    async fn test_lifecycle_notifies_participants() {
        let app_state = test_state(MockTransport::always(Ok(200)));
        let db = app_state.state.db.clone();
        let requester = db.create_agent(TEST_ADDRESS).unwrap();
        let worker = db.create_agent(OTHER_ADDRESS).unwrap();
        let events = [WebhookEvent::TaskAccepted];
        db.create_webhook(&requester.id, "https://hooks.test/in", &events, "whsec").unwrap();

        let app = test::init_service(
            App::new().app_data(app_state.state.clone()).configure(config),
        )
        .await;
        let requester_headers = signed_headers(TEST_KEY, TEST_ADDRESS).await;
        let worker_headers = signed_headers(OTHER_KEY, OTHER_ADDRESS).await;

        let body = json!({ "title": "Label images", "reward_wei": "1500000000000000000" });
        let req = post_json("/api/tasks", &requester_headers, body).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: Value = test::read_body_json(resp).await;
        let task_id = body["task"]["id"].as_str().unwrap().to_string();
        assert_eq!(body["task"]["status"], "open");

        let uri = format!("/api/tasks/{}/accept", task_id);
        let req = post_json(&uri, &worker_headers, json!({})).to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["task"]["status"], "accepted");
        assert_eq!(body["task"]["worker_id"], worker.id.as_str());

        // Requester got an inbox row and a signed webhook
        assert_eq!(events_for(&app_state, &requester.id), vec!["task.accepted"]);
        wait_for_deliveries(&app_state, 1).await;
        let sent = app_state.transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].header(EVENT_HEADER), Some("task.accepted"));

        let uri = format!("/api/tasks/{}/submit", task_id);
        let body = json!({ "deliverable_url": "https://x.test/out" });
        let req = post_json(&uri, &worker_headers, body).to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

        let uri = format!("/api/tasks/{}/approve", task_id);
        let req = post_json(&uri, &requester_headers, json!({})).to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["task"]["status"], "completed");

        assert_eq!(
            events_for(&app_state, &requester.id),
            vec!["task.accepted", "task.completed", "task.submitted"]
        );
        assert_eq!(
            events_for(&app_state, &worker.id),
            vec!["payment.released", "task.completed"]
        );
        let (worker_inbox, _) = db.list_notifications(&worker.id, 100, 0, false).unwrap();
        let payment = worker_inbox
            .iter()
            .find(|n| n.event_type == "payment.released")
            .unwrap();
        assert_eq!(payment.body, "You received 1.500000 ETH for completing a task.");
        assert_eq!(db.get_task_stats(&worker.id).unwrap().tasks_completed, 1);
    }

    #[actix_web::test]
    async fn test_role_and_status_checks() {
        let app_state = test_state(MockTransport::always(Ok(200)));
        let app = test::init_service(
            App::new().app_data(app_state.state.clone()).configure(config),
        )
        .await;
        let requester = signed_headers(TEST_KEY, TEST_ADDRESS).await;
        let worker = signed_headers(OTHER_KEY, OTHER_ADDRESS).await;

        let req = post_json("/api/tasks", &requester, json!({ "title": "t" })).to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        let task_id = body["task"]["id"].as_str().unwrap().to_string();
        let accept = format!("/api/tasks/{}/accept", task_id);
        let submit = format!("/api/tasks/{}/submit", task_id);
        let approve = format!("/api/tasks/{}/approve", task_id);

        let req = post_json(&accept, &requester, json!({})).to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        let req = post_json(&submit, &worker, json!({})).to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);

        let req = post_json(&approve, &requester, json!({})).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "Task must be submitted (currently open)");

        let req = post_json(&accept, &worker, json!({})).to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
        // Already taken
        let req = post_json(&accept, &worker, json!({})).to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        let req = post_json("/api/tasks/missing/accept", &worker, json!({})).to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
        let req = post_json(&accept, &Vec::new(), json!({})).to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn test_create_validates_input() {
        let app_state = test_state(MockTransport::always(Ok(200)));
        let app = test::init_service(
            App::new().app_data(app_state.state.clone()).configure(config),
        )
        .await;
        let headers = signed_headers(TEST_KEY, TEST_ADDRESS).await;

        let past = "2001-01-01T00:00:00Z";
        for (body, expected) in [
            (json!({ "title": "  " }), "Title is required"),
            (
                json!({ "title": "t", "reward_wei": "-5" }),
                "reward_wei must be a non-negative integer string",
            ),
            (
                json!({ "title": "t", "deadline": "tomorrow" }),
                "Deadline must be an RFC 3339 timestamp",
            ),
            (json!({ "title": "t", "deadline": past }), "Deadline must be in the future"),
        ] {
            let req = post_json("/api/tasks", &headers, body).to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
            let body: Value = test::read_body_json(resp).await;
            assert_eq!(body["error"], expected);
        }
    }

    #[actix_web::test]
    async fn test_dispute_and_admin_resolution() {
        let settings = Config {
            admin_api_key: Some("admin-secret".to_string()),
            ..Config::default()
        };
        let app_state = test_state_with_config(MockTransport::always(Ok(200)), settings);
        let db = app_state.state.db.clone();
        let requester = db.create_agent(TEST_ADDRESS).unwrap();
        let worker = db.create_agent(OTHER_ADDRESS).unwrap();
        let task = db
            .create_task(
                "t",
                Some(&requester.id),
                Some(&worker.id),
                "0",
                TaskStatus::Submitted,
                None,
            )
            .unwrap();

        let app = test::init_service(
            App::new().app_data(app_state.state.clone()).configure(config),
        )
        .await;
        let requester_headers = signed_headers(TEST_KEY, TEST_ADDRESS).await;

        let dispute = format!("/api/tasks/{}/dispute", task.id);
        let req = post_json(&dispute, &requester_headers, json!({})).to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
        let body = json!({ "reason": "Work is incomplete" });
        let req = post_json(&dispute, &requester_headers, body).to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

        let (worker_inbox, _) = db.list_notifications(&worker.id, 100, 0, false).unwrap();
        assert_eq!(worker_inbox[0].event_type, "dispute.raised");
        assert_eq!(
            worker_inbox[0].body,
            "A dispute has been raised. Reason: Work is incomplete"
        );

        let resolve = format!("/api/admin/disputes/{}/resolve", task.id);
        let for_worker = json!({ "resolution": "worker" });
        let req = post_json(&resolve, &Vec::new(), for_worker.clone()).to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);

        let admin: Headers = vec![(ADMIN_KEY_HEADER, "admin-secret".to_string())];
        let req = post_json(&resolve, &admin, json!({ "resolution": "everyone" })).to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        let req = post_json(&resolve, &admin, for_worker.clone()).to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["task"]["status"], "resolved");
        assert_eq!(body["message"], "Dispute resolved in favor of worker");

        for agent_id in [&requester.id, &worker.id] {
            assert!(events_for(&app_state, agent_id).contains(&"dispute.resolved".to_string()));
        }

        // Only disputed tasks can be resolved
        let req = post_json(&resolve, &admin, for_worker).to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_admin_routes_disabled_without_key() {
        let app_state = test_state(MockTransport::always(Ok(200)));
        let app = test::init_service(
            App::new().app_data(app_state.state.clone()).configure(config),
        )
        .await;
        let admin: Headers = vec![(ADMIN_KEY_HEADER, "anything".to_string())];
        let body = json!({ "resolution": "split" });
        let req = post_json("/api/admin/disputes/x/resolve", &admin, body).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}

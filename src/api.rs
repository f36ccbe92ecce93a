use std::sync::Arc;

use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};

use crate::control::Automation;

#[derive(Clone)]
pub struct AppState {
    pub automation: Arc<Automation>,
    pub api_key: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/scheduler/start", post(handle_start))
        .route("/scheduler/stop", post(handle_stop))
        .route("/scheduler/status", get(handle_status))
        .route("/scheduler/jobs/:id/enable", post(handle_enable))
        .route("/scheduler/jobs/:id/disable", post(handle_disable))
        .route("/jobs/backup", post(handle_backup))
        .route("/jobs/reports", post(handle_reports))
        .route("/jobs/alerts", get(handle_alerts))
        .route("/jobs/maintenance", post(handle_maintenance))
        .layer(middleware::from_fn_with_state(state.clone(), auth_layer))
        .route("/health", get(handle_health))
        .with_state(state)
}

async fn auth_layer(State(state): State<AppState>, req: Request, next: Next) -> impl IntoResponse {
    if let Some(ref expected) = state.api_key {
        let auth_ok = req
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|t| t == expected);
        if !auth_ok {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"status": "error", "error": "Unauthorized"})),
            )
                .into_response();
        }
    }
    next.run(req).await.into_response()
}

/// Error payloads map to 500, everything else to 200.
fn respond(payload: Value) -> (StatusCode, Json<Value>) {
    let code = if payload["status"] == "error" {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    };
    (code, Json(payload))
}

// Start and stop share a lock that stop holds while waiting on the worker.
async fn lifecycle<F>(state: AppState, action: &'static str, op: F) -> (StatusCode, Json<Value>)
where
    F: FnOnce(&Automation) -> Value + Send + 'static,
{
    let automation = state.automation.clone();
    match tokio::task::spawn_blocking(move || op(&automation)).await {
        Ok(payload) => respond(payload),
        Err(e) => {
            tracing::error!("Scheduler {action} task failed: {e}");
            respond(json!({"status": "error", "error": format!("{action} failed: {e}")}))
        }
    }
}

async fn handle_start(State(state): State<AppState>) -> impl IntoResponse {
    lifecycle(state, "start", Automation::start_scheduler).await
}

async fn handle_stop(State(state): State<AppState>) -> impl IntoResponse {
    lifecycle(state, "stop", Automation::stop_scheduler).await
}

async fn handle_enable(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    respond(state.automation.set_job_enabled(&id, true))
}

async fn handle_disable(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    respond(state.automation.set_job_enabled(&id, false))
}

async fn handle_status(State(state): State<AppState>) -> impl IntoResponse {
    respond(state.automation.scheduler_status())
}

async fn handle_backup(State(state): State<AppState>) -> impl IntoResponse {
    respond(state.automation.run_backup_now().await)
}

async fn handle_reports(State(state): State<AppState>) -> impl IntoResponse {
    respond(state.automation.run_reports_now().await)
}

async fn handle_alerts(State(state): State<AppState>) -> impl IntoResponse {
    respond(state.automation.run_alerts_now().await)
}

async fn handle_maintenance(State(state): State<AppState>) -> impl IntoResponse {
    respond(state.automation.run_maintenance_now().await)
}

async fn handle_health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{self, Method};
    use tower::ServiceExt;

    use super::*;
    use crate::config::Config;
    use crate::source::testing::StaticSource;

    fn app(base: &std::path::Path, api_key: Option<&str>) -> Router {
        let mut config = Config::default();
        config.storage.base_dir = base.to_path_buf();
        let source = StaticSource::new()
            .with(
                "products",
                vec![json!({"id": 1, "name": "Bolt", "quantity": 0, "min_quantity": 10})],
            )
            .with("suppliers", vec![])
            .with("orders", vec![]);
        router(AppState {
            automation: Arc::new(Automation::new(Arc::new(source), &config)),
            api_key: api_key.map(String::from),
        })
    }

    async fn call(app: &Router, method: Method, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        let mut req = http::Request::builder().method(method).uri(uri);
        if let Some(t) = token {
            req = req.header("authorization", format!("Bearer {t}"));
        }
        let resp = app
            .clone()
            .oneshot(req.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health_needs_no_auth() {
        let tmp = tempfile::tempdir().unwrap();
        let app = app(tmp.path(), Some("secret"));
        let (status, body) = call(&app, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_auth_required_when_key_set() {
        let tmp = tempfile::tempdir().unwrap();
        let app = app(tmp.path(), Some("secret"));

        let (status, _) = call(&app, Method::GET, "/scheduler/status", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = call(&app, Method::GET, "/scheduler/status", Some("wrong")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, body) = call(&app, Method::GET, "/scheduler/status", Some("secret")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "stopped");
    }

    #[tokio::test]
    async fn test_scheduler_lifecycle_over_http() {
        let tmp = tempfile::tempdir().unwrap();
        let app = app(tmp.path(), None);

        let (_, body) = call(&app, Method::POST, "/scheduler/stop", None).await;
        assert_eq!(body["status"], "not_running");

        let (status, body) = call(&app, Method::POST, "/scheduler/start", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "started");

        let (_, body) = call(&app, Method::POST, "/scheduler/start", None).await;
        assert_eq!(body["status"], "already_running");

        let (_, body) = call(&app, Method::GET, "/scheduler/status", None).await;
        assert_eq!(body["status"], "running");
        assert_eq!(body["job_count"], 4);

        let (_, body) = call(&app, Method::POST, "/scheduler/stop", None).await;
        assert_eq!(body["status"], "stopped");
    }

    #[tokio::test]
    async fn test_enable_disable_job_over_http() {
        let tmp = tempfile::tempdir().unwrap();
        let app = app(tmp.path(), None);

        let (status, body) = call(&app, Method::POST, "/scheduler/jobs/backup/disable", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "not_running");

        call(&app, Method::POST, "/scheduler/start", None).await;
        let (status, body) = call(&app, Method::POST, "/scheduler/jobs/backup/disable", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "disabled");

        let (_, body) = call(&app, Method::GET, "/scheduler/status", None).await;
        assert_eq!(body["jobs"][0]["enabled"], false);

        let (_, body) = call(&app, Method::POST, "/scheduler/jobs/backup/enable", None).await;
        assert_eq!(body["status"], "enabled");

        let (status, body) = call(&app, Method::POST, "/scheduler/jobs/nope/enable", None).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().unwrap().contains("nope"));

        call(&app, Method::POST, "/scheduler/stop", None).await;
    }

    #[tokio::test]
    async fn test_on_demand_jobs() {
        let tmp = tempfile::tempdir().unwrap();
        let app = app(tmp.path(), None);

        let (status, body) = call(&app, Method::GET, "/jobs/alerts", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["alerts_summary"]["critical_alerts"], 1);

        let (status, body) = call(&app, Method::POST, "/jobs/backup", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_records"], 1);

        let (status, body) = call(&app, Method::POST, "/jobs/maintenance", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["tasks"][2]["valid_backups"], 1);
    }

    #[tokio::test]
    async fn test_failed_job_maps_to_500() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.storage.base_dir = tmp.path().to_path_buf();
        let source = StaticSource::new().failing("products", "down").failing("suppliers", "down");
        let app = router(AppState {
            automation: Arc::new(Automation::new(Arc::new(source), &config)),
            api_key: None,
        });

        let (status, body) = call(&app, Method::POST, "/jobs/reports", None).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["status"], "error");
        assert_eq!(body["failed_reports"], 3);
    }
}

//! HTTP route handlers for the task engine API

use actix_web::{web, HttpResponse, Responder, Result as ActixResult};
use chrono::{DateTime, Utc};
use prometheus::Encoder;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::Settings;
use crate::error::{StoreError, TaskError};
use crate::models::types::{TaskAction, TaskParams};
use crate::services::manager::TaskManager;

pub struct AppState {
    pub manager: Arc<TaskManager>,
    pub settings: Arc<Settings>,
    pub api_keys: Arc<Vec<String>>,
    pub started_at: DateTime<Utc>,
}

// Helper function to check auth
fn check_auth(req: &actix_web::HttpRequest, api_keys: &[String]) -> Result<(), HttpResponse> {
    if api_keys.is_empty() {
        return Ok(()); // Auth disabled
    }

    let api_key = req
        .headers()
        .get("X-API-Key")
        .and_then(|h| h.to_str().ok());

    match api_key {
        Some(key) if api_keys.iter().any(|k| k == key) => Ok(()),
        Some(_) => Err(HttpResponse::Unauthorized().json(json!({
            "error": "Invalid API key"
        }))),
        None => Err(HttpResponse::Unauthorized().json(json!({
            "error": "Missing API key header: X-API-Key"
        }))),
    }
}

#[utoipa::path(
    get,
    path = "/api-docs/openapi.json",
    tag = "docs",
    responses(
        (status = 200, description = "OpenAPI specification", content_type = "application/json")
    )
)]
pub async fn openapi_json() -> ActixResult<impl Responder> {
    use utoipa::OpenApi;
    Ok(HttpResponse::Ok()
        .content_type("application/json")
        .json(serde_json::to_value(crate::libs::openapi::ApiDoc::openapi()).unwrap_or_default()))
}

#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Service is healthy")
    )
)]
pub async fn health_check() -> ActixResult<impl Responder> {
    Ok(HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": Utc::now()
    })))
}

#[utoipa::path(
    get,
    path = "/metrics",
    tag = "metrics",
    responses(
        (status = 200, description = "Prometheus metrics")
    )
)]
pub async fn metrics_handler() -> ActixResult<impl Responder> {
    use prometheus::TextEncoder;

    let _ = crate::utils::metrics::Metrics::init();
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => Ok(HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(buffer)),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            Ok(HttpResponse::InternalServerError()
                .body(format!("Failed to encode metrics: {}", e)))
        }
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/server-status",
    tag = "status",
    responses(
        (status = 200, description = "Engine status and external tool versions"),
        (status = 401, description = "Unauthorized")
    ),
    security(
        ("api_key" = [])
    )
)]
pub async fn server_status(
    req: actix_web::HttpRequest,
    data: web::Data<AppState>,
) -> ActixResult<impl Responder> {
    if let Err(resp) = check_auth(&req, &data.api_keys) {
        return Ok(resp);
    }

    let active_records = data.manager.active_records().unwrap_or(0);
    let tools = json!({
        "gallery-dl": probe_version(&data.settings.tool("gallery_dl_bin", "gallery-dl")).await,
        "megadl": probe_version(&data.settings.tool("megadl_bin", "megadl")).await,
        "rclone": probe_version(&data.settings.tool("rclone_bin", "rclone")).await,
        "zstd": probe_version(&data.settings.tool("zstd_bin", "zstd")).await,
    });

    Ok(HttpResponse::Ok().json(json!({
        "activeProcesses": data.manager.active_processes(),
        "activeTasks": active_records,
        "uptimeSecs": (Utc::now() - data.started_at).num_seconds(),
        "tools": tools,
        "timestamp": Utc::now(),
    })))
}

async fn probe_version(binary: &str) -> Option<String> {
    let output = tokio::process::Command::new(binary)
        .arg("--version")
        .output()
        .await
        .ok()?;
    let text = if output.stdout.is_empty() {
        output.stderr
    } else {
        output.stdout
    };
    String::from_utf8_lossy(&text)
        .lines()
        .next()
        .map(str::to_string)
}

#[utoipa::path(
    post,
    path = "/api/v1/tasks",
    tag = "tasks",
    request_body = TaskParams,
    responses(
        (status = 202, description = "Tasks accepted, one per URL"),
        (status = 400, description = "Validation failed"),
        (status = 401, description = "Unauthorized")
    ),
    security(
        ("api_key" = [])
    )
)]
pub async fn submit_tasks(
    req: actix_web::HttpRequest,
    data: web::Data<AppState>,
    params: web::Json<TaskParams>,
) -> ActixResult<impl Responder> {
    if let Err(resp) = check_auth(&req, &data.api_keys) {
        return Ok(resp);
    }

    match data.manager.submit(params.into_inner()) {
        Ok(task_ids) => {
            let count = task_ids.len();
            info!(count, "Accepted task submission");
            Ok(HttpResponse::Accepted().json(json!({
                "success": true,
                "taskIds": task_ids,
                "message": format!("Started {count} task(s)")
            })))
        }
        Err(TaskError::Validation(message)) => Ok(HttpResponse::BadRequest().json(json!({
            "error": message
        }))),
        Err(e) => {
            error!(error = %e, "Task submission failed");
            Ok(HttpResponse::InternalServerError().json(json!({
                "error": e.to_string()
            })))
        }
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/tasks",
    tag = "tasks",
    responses(
        (status = 200, description = "All task records, newest first"),
        (status = 401, description = "Unauthorized")
    ),
    security(
        ("api_key" = [])
    )
)]
pub async fn list_tasks(
    req: actix_web::HttpRequest,
    data: web::Data<AppState>,
) -> ActixResult<impl Responder> {
    if let Err(resp) = check_auth(&req, &data.api_keys) {
        return Ok(resp);
    }

    match data.manager.list() {
        Ok(tasks) => {
            let count = tasks.len();
            Ok(HttpResponse::Ok().json(json!({
                "tasks": tasks,
                "count": count
            })))
        }
        Err(e) => {
            error!(error = %e, "Failed to list tasks");
            Ok(HttpResponse::InternalServerError().json(json!({
                "error": e.to_string()
            })))
        }
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/tasks/{task_id}",
    tag = "tasks",
    params(
        ("task_id" = Uuid, Path, description = "Task ID")
    ),
    responses(
        (status = 200, description = "Task record with logs and derived progress"),
        (status = 404, description = "Task not found"),
        (status = 401, description = "Unauthorized")
    ),
    security(
        ("api_key" = [])
    )
)]
pub async fn get_task(
    req: actix_web::HttpRequest,
    path: web::Path<Uuid>,
    data: web::Data<AppState>,
) -> ActixResult<impl Responder> {
    if let Err(resp) = check_auth(&req, &data.api_keys) {
        return Ok(resp);
    }

    let task_id = path.into_inner();
    match data.manager.get(task_id) {
        Ok(detail) => Ok(HttpResponse::Ok().json(detail)),
        Err(StoreError::NotFound(_)) => Ok(HttpResponse::NotFound().json(json!({
            "error": "Task not found",
            "taskId": task_id
        }))),
        Err(StoreError::InvalidRecord(_)) => {
            Ok(HttpResponse::InternalServerError().json(json!({
                "error": "Invalid status file",
                "taskId": task_id
            })))
        }
        Err(e) => {
            error!(task_id = %task_id, error = %e, "Failed to read task");
            Ok(HttpResponse::InternalServerError().json(json!({
                "error": e.to_string()
            })))
        }
    }
}

#[derive(serde::Deserialize, utoipa::ToSchema)]
pub struct ControlRequest {
    pub action: TaskAction,
}

#[utoipa::path(
    post,
    path = "/api/v1/tasks/{task_id}/actions",
    tag = "tasks",
    params(
        ("task_id" = Uuid, Path, description = "Task ID")
    ),
    request_body = ControlRequest,
    responses(
        (status = 200, description = "Action outcome; misses are reported with success=false"),
        (status = 404, description = "Task not found"),
        (status = 401, description = "Unauthorized")
    ),
    security(
        ("api_key" = [])
    )
)]
pub async fn control_task(
    req: actix_web::HttpRequest,
    path: web::Path<Uuid>,
    data: web::Data<AppState>,
    body: web::Json<ControlRequest>,
) -> ActixResult<impl Responder> {
    if let Err(resp) = check_auth(&req, &data.api_keys) {
        return Ok(resp);
    }

    let task_id = path.into_inner();
    let outcome = data.manager.control(task_id, body.action);
    if !outcome.success && outcome.message.as_deref() == Some("Task not found") {
        return Ok(HttpResponse::NotFound().json(outcome));
    }
    Ok(HttpResponse::Ok().json(outcome))
}

#[utoipa::path(
    delete,
    path = "/api/v1/tasks/{task_id}",
    tag = "tasks",
    params(
        ("task_id" = Uuid, Path, description = "Task ID")
    ),
    responses(
        (status = 200, description = "Task and artifacts removed"),
        (status = 404, description = "Task not found"),
        (status = 401, description = "Unauthorized")
    ),
    security(
        ("api_key" = [])
    )
)]
pub async fn delete_task(
    req: actix_web::HttpRequest,
    path: web::Path<Uuid>,
    data: web::Data<AppState>,
) -> ActixResult<impl Responder> {
    if let Err(resp) = check_auth(&req, &data.api_keys) {
        return Ok(resp);
    }

    let task_id = path.into_inner();
    match data.manager.delete(task_id) {
        Ok(true) => {
            info!(task_id = %task_id, "Task deleted");
            Ok(HttpResponse::Ok().json(json!({ "success": true })))
        }
        Ok(false) => Ok(HttpResponse::NotFound().json(json!({
            "error": "Task not found",
            "taskId": task_id
        }))),
        Err(e) => {
            error!(task_id = %task_id, error = %e, "Failed to delete task");
            Ok(HttpResponse::InternalServerError().json(json!({
                "error": e.to_string()
            })))
        }
    }
}

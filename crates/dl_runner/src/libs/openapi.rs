//! OpenAPI specification and documentation

use utoipa::OpenApi;
use utoipa::{
    openapi::security::{ApiKey, ApiKeyValue, SecurityScheme},
    Modify,
};

use crate::models::types::{
    ControlOutcome, DownloaderKind, TaskAction, TaskDetail, TaskParams, TaskRecord, TaskState,
    UploadStats,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::api::health_check,
        crate::routes::api::metrics_handler,
        crate::routes::api::server_status,
        crate::routes::api::submit_tasks,
        crate::routes::api::list_tasks,
        crate::routes::api::get_task,
        crate::routes::api::control_task,
        crate::routes::api::delete_task,
        crate::routes::api::openapi_json,
    ),
    components(schemas(
        TaskParams,
        TaskRecord,
        TaskDetail,
        TaskState,
        TaskAction,
        DownloaderKind,
        UploadStats,
        ControlOutcome,
        crate::routes::api::ControlRequest,
    )),
    tags(
        (name = "health", description = "Health checks"),
        (name = "metrics", description = "Prometheus metrics"),
        (name = "status", description = "Engine status"),
        (name = "tasks", description = "Task submission and control"),
    ),
    modifiers(&SecurityAddon),
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "api_key",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new("X-API-Key"))),
            )
        }
    }
}

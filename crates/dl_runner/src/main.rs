use actix_web::{web, App as ActixApp, HttpServer};
use chrono::Utc;
use dl_runner::routes::api;
use dl_runner::services::command::CommandRunner;
use dl_runner::services::manager::TaskManager;
use dl_runner::services::pipeline::JobPipeline;
use dl_runner::stores::registry::ProcessRegistry;
use dl_runner::stores::status::{reconcile_orphans, StatusStore};
use dl_runner::{Config, Settings, TaskPaths};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .json()
        .init();

    info!("Starting download task engine");

    // Load configuration
    let config_path =
        std::env::var("DLR_CONFIG").unwrap_or_else(|_| "/etc/dl-runner/config.yaml".to_string());

    let config = Config::load(Some(&config_path)).map_err(|e| {
        error!("Failed to load config: {}", e);
        e
    })?;

    info!("Configuration loaded");

    let paths = TaskPaths::new(&config.storage);
    paths.ensure_dirs()?;

    let settings = Arc::new(Settings::new(config.settings.clone()));
    let store = Arc::new(StatusStore::new(paths));
    let registry = Arc::new(ProcessRegistry::new());
    let runner = Arc::new(CommandRunner::new(store.clone(), registry.clone()));
    let pipeline = Arc::new(JobPipeline::new(
        store.clone(),
        settings.clone(),
        runner.clone(),
    ));
    let manager = Arc::new(TaskManager::new(
        store.clone(),
        registry.clone(),
        pipeline.clone(),
    ));

    // Records left in an executing state belong to a previous process and
    // can never make progress again.
    match reconcile_orphans(&store) {
        Ok(0) => {}
        Ok(count) => warn!(count, "Marked orphaned tasks as failed"),
        Err(e) => warn!(error = %e, "Orphan reconciliation failed"),
    }

    let api_keys = Arc::new(config.auth.api_keys.clone());
    let started_at = Utc::now();
    let server_addr = format!("{}:{}", config.server.host, config.server.port);

    info!("Starting HTTP server on {}", server_addr);
    let manager_for_server = Arc::clone(&manager);
    let settings_for_server = Arc::clone(&settings);
    let server_handle = tokio::spawn(async move {
        HttpServer::new(move || {
            let app_state = api::AppState {
                manager: Arc::clone(&manager_for_server),
                settings: Arc::clone(&settings_for_server),
                api_keys: Arc::clone(&api_keys),
                started_at,
            };
            ActixApp::new()
                .app_data(web::Data::new(app_state))
                .route("/health", web::get().to(api::health_check))
                .route("/metrics", web::get().to(api::metrics_handler))
                .route("/api-docs/openapi.json", web::get().to(api::openapi_json))
                .route("/api/v1/server-status", web::get().to(api::server_status))
                .route("/api/v1/tasks", web::post().to(api::submit_tasks))
                .route("/api/v1/tasks", web::get().to(api::list_tasks))
                .route("/api/v1/tasks/{task_id}", web::get().to(api::get_task))
                .route(
                    "/api/v1/tasks/{task_id}/actions",
                    web::post().to(api::control_task),
                )
                .route(
                    "/api/v1/tasks/{task_id}",
                    web::delete().to(api::delete_task),
                )
        })
        .bind(&server_addr)
        .expect("Failed to bind server")
        .run()
        .await
        .expect("Server error");
    });

    info!("Download task engine started");

    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Received shutdown signal");
        }
        Err(err) => {
            error!("Unable to listen for shutdown signal: {}", err);
        }
    }

    info!("Initiating graceful shutdown");
    server_handle.abort();

    info!("Download task engine stopped");
    Ok(())
}

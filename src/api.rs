//! HTTP gateway under `/api/v1`.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, patch, post};
use tokio::net::ToSocketAddrs;

use crate::container::ContainerID;
use crate::error::{Error, Result};
use crate::exporter::ExporterOrchestrator;
use crate::inventory::InventoryCache;
use crate::runtime::{ContainerRuntime, LifecycleOutcome, RuntimeAdapter};

pub mod models;

use models::{
    ApiError, ContainerParams, HealthBody, IdParams, MessageBody, RemoveParams, UpExporterParams,
};

/// Shared handler state; every component is process-scoped and created at startup.
pub struct AppState<R> {
    pub runtime: Arc<RuntimeAdapter<R>>,
    pub inventory: InventoryCache<R>,
    pub exporters: Arc<ExporterOrchestrator<R>>,
}

impl<R> Clone for AppState<R> {
    fn clone(&self) -> Self {
        Self {
            runtime: Arc::clone(&self.runtime),
            inventory: self.inventory.clone(),
            exporters: Arc::clone(&self.exporters),
        }
    }
}

impl<R: ContainerRuntime> AppState<R> {
    /// Maps a validated reference onto the full id of a known container. Unknown references
    /// are passed through so that the runtime reports them.
    fn resolve(&self, id: ContainerID) -> ContainerID {
        match self.inventory.resolve(id.as_str()) {
            Some(entry) => entry.info.id,
            None => id,
        }
    }

    async fn lifecycle(
        &self,
        id: &ContainerID,
        result: Result<LifecycleOutcome>,
    ) -> std::result::Result<Json<LifecycleOutcome>, ApiError> {
        match result {
            Ok(outcome) => {
                self.inventory.reconcile(id).await;
                Ok(Json(outcome))
            }
            Err(err) => {
                if matches!(err, Error::PartialFailure { .. }) {
                    self.inventory.reconcile(id).await;
                }
                Err(err.into())
            }
        }
    }
}

async fn health() -> Json<HealthBody> {
    Json(HealthBody { status: "healthy" })
}

async fn list_containers<R: ContainerRuntime>(State(state): State<AppState<R>>) -> Response {
    let snapshot = state.inventory.get_snapshot();
    Json(&*snapshot).into_response()
}

async fn update_containers<R: ContainerRuntime>(
    State(state): State<AppState<R>>,
) -> std::result::Result<Json<MessageBody>, ApiError> {
    state.inventory.refresh().await?;
    Ok(Json(MessageBody {
        message: "Containers updated successfully",
    }))
}

async fn start_container<R: ContainerRuntime>(
    State(state): State<AppState<R>>,
    Query(params): Query<IdParams>,
) -> std::result::Result<Json<LifecycleOutcome>, ApiError> {
    let id = state.resolve(models::parse_id("id", params.id)?);
    let result = state.runtime.start(&id).await;
    state.lifecycle(&id, result).await
}

async fn stop_container<R: ContainerRuntime>(
    State(state): State<AppState<R>>,
    Query(params): Query<IdParams>,
) -> std::result::Result<Json<LifecycleOutcome>, ApiError> {
    let id = state.resolve(models::parse_id("id", params.id)?);
    let result = state.runtime.stop(&id).await;
    state.lifecycle(&id, result).await
}

async fn remove_container<R: ContainerRuntime>(
    State(state): State<AppState<R>>,
    Query(params): Query<RemoveParams>,
) -> std::result::Result<Json<LifecycleOutcome>, ApiError> {
    let id = state.resolve(models::parse_id("id", params.id)?);
    let force = models::parse_flag("force", params.force)?;
    let result = state.runtime.remove(&id, force).await;
    if result.is_ok() {
        state.exporters.release_target(&id).await;
    }
    state.lifecycle(&id, result).await
}

async fn generate_config<R: ContainerRuntime>(
    State(state): State<AppState<R>>,
    Query(params): Query<ContainerParams>,
) -> std::result::Result<Response, ApiError> {
    let id = state.resolve(models::parse_id("container_id", params.container_id)?);
    let descriptor = state.exporters.generate_config(&id).await?;
    Ok(Json(descriptor).into_response())
}

async fn up_exporter<R: ContainerRuntime>(
    State(state): State<AppState<R>>,
    Query(params): Query<UpExporterParams>,
) -> std::result::Result<Response, ApiError> {
    let id = state.resolve(models::parse_id("container_id", params.container_id)?);
    let port = models::parse_port(params.port)?;
    let status = state.exporters.up_exporter(&id, port).await?;
    Ok(Json(status).into_response())
}

async fn down_exporter<R: ContainerRuntime>(
    State(state): State<AppState<R>>,
    Query(params): Query<ContainerParams>,
) -> std::result::Result<Response, ApiError> {
    let id = state.resolve(models::parse_id("container_id", params.container_id)?);
    let status = state.exporters.down_exporter(&id).await?;
    Ok(Json(status).into_response())
}

/// Builds the gateway routes.
pub fn router<R: ContainerRuntime>(state: AppState<R>) -> axum::Router {
    axum::Router::new()
        .route("/health", get(health))
        .route("/api/v1/containers/containers", get(list_containers::<R>))
        .route(
            "/api/v1/containers/update_containers",
            patch(update_containers::<R>),
        )
        .route(
            "/api/v1/containers/container/start",
            post(start_container::<R>),
        )
        .route(
            "/api/v1/containers/container/stop",
            post(stop_container::<R>),
        )
        .route(
            "/api/v1/containers/container/remove",
            delete(remove_container::<R>),
        )
        .route(
            "/api/v1/prometheus/generate_config",
            post(generate_config::<R>),
        )
        .route("/api/v1/prometheus/up_exporter", post(up_exporter::<R>))
        .route("/api/v1/prometheus/down_exporter", post(down_exporter::<R>))
        .with_state(state)
}

pub struct APIServer {
    router: axum::Router,
}

impl APIServer {
    pub fn new<R: ContainerRuntime>(state: AppState<R>) -> Self {
        Self {
            router: router(state),
        }
    }

    /// Serves the gateway until the process is stopped.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if binding `addr` or accepting connections fails.
    pub async fn listen(self, addr: impl ToSocketAddrs) -> std::io::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        log::info!("Listening on {}", listener.local_addr()?);
        axum::serve(listener, self.router.into_make_service()).await
    }
}

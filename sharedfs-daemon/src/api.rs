//! The Docker volume-plugin endpoint.
//!
//! Implements the plugin JSON protocol over a unix socket: every operation
//! is a POST with a JSON body, every response carries an `Err` field that is
//! empty on success. The handlers are a thin conversion layer; all semantics
//! live in [`sharedfs_core::Driver`].

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use sharedfs_core::{Driver, VolumeInfo};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

#[derive(Debug, Deserialize)]
struct NameRequest {
    #[serde(rename = "Name")]
    name: String,
}

#[derive(Debug, Deserialize)]
struct CreateRequest {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Opts", default)]
    opts: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct MountRequest {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "ID")]
    id: String,
}

#[derive(Debug, Serialize)]
struct ActivateResponse {
    #[serde(rename = "Implements")]
    implements: Vec<&'static str>,
}

#[derive(Debug, Serialize)]
struct ErrResponse {
    #[serde(rename = "Err")]
    err: String,
}

#[derive(Debug, Serialize)]
struct MountpointResponse {
    /// `None` means the volume is not registered here; it serializes as
    /// `null` so clients can tell it apart from an empty path.
    #[serde(rename = "Mountpoint")]
    mountpoint: Option<String>,
    #[serde(rename = "Err")]
    err: String,
}

#[derive(Debug, Serialize)]
struct GetResponse {
    #[serde(rename = "Volume")]
    volume: VolumeDto,
    #[serde(rename = "Err")]
    err: String,
}

#[derive(Debug, Serialize)]
struct ListResponse {
    #[serde(rename = "Volumes")]
    volumes: Vec<VolumeDto>,
    #[serde(rename = "Err")]
    err: String,
}

#[derive(Debug, Serialize)]
struct CapabilitiesResponse {
    #[serde(rename = "Capabilities")]
    capabilities: CapabilityDto,
}

#[derive(Debug, Serialize)]
struct CapabilityDto {
    #[serde(rename = "Scope")]
    scope: String,
}

/// The wire shape of a volume, distinct from the internal aggregate.
#[derive(Debug, Serialize)]
struct VolumeDto {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Mountpoint")]
    mountpoint: String,
    #[serde(rename = "CreatedAt", skip_serializing_if = "String::is_empty")]
    created_at: String,
    #[serde(rename = "Status", skip_serializing_if = "Option::is_none")]
    status: Option<serde_json::Value>,
}

impl From<VolumeInfo> for VolumeDto {
    fn from(info: VolumeInfo) -> Self {
        let mounts: serde_json::Value = serde_json::to_value(&info.status.mounts)
            .unwrap_or_else(|_| serde_json::json!({}));

        Self {
            name: info.name,
            mountpoint: info.mountpoint.to_string_lossy().to_string(),
            created_at: info.created_at,
            status: Some(serde_json::json!({
                "protected": info.status.protected,
                "exclusive": info.status.exclusive,
                "locks": info.status.locks,
                "mounts": mounts,
            })),
        }
    }
}

fn ok() -> Response {
    Json(ErrResponse { err: String::new() }).into_response()
}

fn fail(err: impl std::fmt::Display) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrResponse { err: err.to_string() }),
    )
        .into_response()
}

async fn activate() -> Json<ActivateResponse> {
    Json(ActivateResponse { implements: vec!["VolumeDriver"] })
}

async fn create(
    State(driver): State<Arc<Driver>>,
    Json(request): Json<CreateRequest>,
) -> Response {
    match driver.create(&request.name, &request.opts).await {
        Ok(()) => ok(),
        Err(e) => fail(e),
    }
}

async fn remove(State(driver): State<Arc<Driver>>, Json(request): Json<NameRequest>) -> Response {
    match driver.remove(&request.name).await {
        Ok(()) => ok(),
        Err(e) => fail(e),
    }
}

async fn path(State(driver): State<Arc<Driver>>, Json(request): Json<NameRequest>) -> Response {
    let mountpoint = driver.path(&request.name).await.map(|p| p.to_string_lossy().to_string());

    Json(MountpointResponse { mountpoint, err: String::new() }).into_response()
}

async fn mount(State(driver): State<Arc<Driver>>, Json(request): Json<MountRequest>) -> Response {
    match driver.mount(&request.name, &request.id).await {
        Ok(mountpoint) => Json(MountpointResponse {
            mountpoint: Some(mountpoint.to_string_lossy().to_string()),
            err: String::new(),
        })
        .into_response(),
        Err(e) => fail(format!("Failed to mount volume: {}", e)),
    }
}

async fn unmount(
    State(driver): State<Arc<Driver>>,
    Json(request): Json<MountRequest>,
) -> Response {
    match driver.unmount(&request.name, &request.id).await {
        Ok(()) => ok(),
        Err(e) => fail(e),
    }
}

async fn get(State(driver): State<Arc<Driver>>, Json(request): Json<NameRequest>) -> Response {
    match driver.get(&request.name).await {
        Ok(info) => {
            Json(GetResponse { volume: info.into(), err: String::new() }).into_response()
        }
        Err(e) => fail(e),
    }
}

async fn list(State(driver): State<Arc<Driver>>) -> Json<ListResponse> {
    let volumes = driver
        .list()
        .await
        .into_iter()
        .map(|summary| VolumeDto {
            name: summary.name,
            mountpoint: summary.mountpoint.to_string_lossy().to_string(),
            created_at: String::new(),
            status: None,
        })
        .collect();

    Json(ListResponse { volumes, err: String::new() })
}

async fn capabilities(State(driver): State<Arc<Driver>>) -> Json<CapabilitiesResponse> {
    Json(CapabilitiesResponse {
        capabilities: CapabilityDto { scope: driver.capabilities().scope.to_string() },
    })
}

pub fn router(driver: Arc<Driver>) -> Router {
    Router::new()
        .route("/Plugin.Activate", post(activate))
        .route("/VolumeDriver.Create", post(create))
        .route("/VolumeDriver.Remove", post(remove))
        .route("/VolumeDriver.Path", post(path))
        .route("/VolumeDriver.Mount", post(mount))
        .route("/VolumeDriver.Unmount", post(unmount))
        .route("/VolumeDriver.Get", post(get))
        .route("/VolumeDriver.List", post(list))
        .route("/VolumeDriver.Capabilities", post(capabilities))
        .with_state(driver)
}

/// Bind the plugin socket and serve until the shutdown signal fires.
pub async fn serve(
    driver: Arc<Driver>,
    socket_path: &Path,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    // A socket left behind by a previous lifetime would fail the bind.
    match std::fs::remove_file(socket_path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let listener = tokio::net::UnixListener::bind(socket_path)?;
    info!("plugin listening on {:?}", socket_path);

    axum::serve(listener, router(driver))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    Ok(())
}

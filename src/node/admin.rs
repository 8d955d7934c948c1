//! Read-only admin HTTP surface.
//!
//! A small side-channel for operators and health checks; the event
//! protocol remains the only way to mutate anything. The JSON shapes here
//! are informative, not part of the wire contract.

use crate::filesystem::types::FilesystemConfig;
use crate::topology::{NetworkInfo, NodeInfo};
use axum::extract::Extension;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use std::sync::{Arc, RwLock};
use sysinfo::System;

#[derive(Clone)]
pub struct AdminState {
    pub node: NodeInfo,
    pub network: Arc<NetworkInfo>,
    /// Registry view published by the event loop after each mutation.
    pub filesystems: Arc<RwLock<Vec<FilesystemConfig>>>,
}

#[derive(Serialize)]
struct StatusResponse {
    node: String,
    groups: usize,
    cluster_nodes: usize,
    filesystems: usize,
    cpu_usage: f32,
    mem_used_mb: u64,
    mem_total_mb: u64,
}

pub fn router(state: AdminState) -> Router {
    Router::new()
        .route("/status", get(handle_status))
        .route("/filesystems", get(handle_filesystems))
        .layer(Extension(state))
}

pub async fn serve(port: u16, state: AdminState) {
    let app = router(state);
    match tokio::net::TcpListener::bind(("0.0.0.0", port)).await {
        Ok(listener) => {
            tracing::info!("admin endpoint listening on port {}", port);
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("admin server failed: {}", e);
            }
        }
        Err(e) => tracing::error!("could not bind admin port {}: {}", port, e),
    }
}

async fn handle_status(Extension(state): Extension<AdminState>) -> Json<StatusResponse> {
    let mut sys = System::new_all();
    sys.refresh_cpu();
    sys.refresh_memory();
    let cpu_usage = sys.global_cpu_info().cpu_usage();
    // sysinfo reports bytes for memory values.
    let mem_total_mb = sys.total_memory() / (1024 * 1024);
    let mem_used_mb = sys.used_memory() / (1024 * 1024);
    let filesystems = state.filesystems.read().map(|g| g.len()).unwrap_or(0);

    Json(StatusResponse {
        node: state.node.address(),
        groups: state.network.groups().len(),
        cluster_nodes: state.network.all_nodes().len(),
        filesystems,
        cpu_usage,
        mem_used_mb,
        mem_total_mb,
    })
}

async fn handle_filesystems(
    Extension(state): Extension<AdminState>,
) -> Json<Vec<FilesystemConfig>> {
    let configs = state.filesystems.read().map(|g| g.clone()).unwrap_or_default();
    Json(configs)
}

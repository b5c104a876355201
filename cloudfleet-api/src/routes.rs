//! HTTP routes for the cloud lifecycle API

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;

use crate::error::ApiError;
use crate::health::{HealthResponse, HealthStatus};
use crate::state::AppState;

/// Build the full application router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .merge(cloud_routes())
        .with_state(state)
}

/// Cloud lifecycle, deployment and namespace routes
///
/// Every per-cloud route shares the `:cloud` segment; id routes parse it as
/// a number, namespace routes use it as the cloud name.
fn cloud_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/clouds", get(handlers::list_clouds).post(handlers::create_cloud))
        .route("/api/clouds/build", post(handlers::build_cloud))
        .route("/api/clouds/ping", post(handlers::ping_cloud))
        .route(
            "/api/clouds/:cloud",
            get(handlers::get_cloud)
                .put(handlers::update_cloud)
                .delete(handlers::delete_cloud),
        )
        .route(
            "/api/clouds/:cloud/deploy",
            get(handlers::get_deploy_state).post(handlers::start_deploy),
        )
        .route("/api/clouds/:cloud/deploy/cancel", post(handlers::cancel_deploy))
        .route(
            "/api/clouds/:cloud/namespaces",
            get(handlers::list_namespaces).post(handlers::create_namespace),
        )
        .route(
            "/api/clouds/:cloud/namespaces/:namespace",
            get(handlers::get_namespace).delete(handlers::delete_namespace),
        )
}

async fn health_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<HealthResponse>) {
    let checker = &state.health_checker;
    let components = vec![
        checker.check_database(&state.database).await,
        checker
            .check_registry(state.cloud_manager.registry())
            .await,
    ];

    let response = checker.build_response(components);
    let code = if response.status == HealthStatus::Unhealthy {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (code, Json(response))
}

mod handlers {
    use super::*;
    use crate::kubernetes::cluster::deploy::DeployState;
    use crate::kubernetes::types::*;
    use cloudfleet_common::{Cloud, CloudList, PageOptions};

    pub async fn list_clouds(
        State(state): State<Arc<AppState>>,
        Query(options): Query<PageOptions>,
    ) -> Result<Json<CloudList>, ApiError> {
        let clouds = state.cloud_manager.list(options).await?;
        Ok(Json(clouds))
    }

    pub async fn create_cloud(
        State(state): State<Arc<AppState>>,
        payload: Result<Json<CreateCloudRequest>, JsonRejection>,
    ) -> Result<(StatusCode, Json<Cloud>), ApiError> {
        let Json(payload) = payload?;
        let cloud = state.cloud_manager.create(payload).await?;
        Ok((StatusCode::CREATED, Json(cloud)))
    }

    pub async fn build_cloud(
        State(state): State<Arc<AppState>>,
        payload: Result<Json<BuildCloudRequest>, JsonRejection>,
    ) -> Result<(StatusCode, Json<Cloud>), ApiError> {
        let Json(payload) = payload?;
        let cloud = state.cloud_manager.build(payload).await?;
        Ok((StatusCode::CREATED, Json(cloud)))
    }

    pub async fn ping_cloud(
        State(state): State<Arc<AppState>>,
        payload: Result<Json<PingRequest>, JsonRejection>,
    ) -> Result<StatusCode, ApiError> {
        let Json(payload) = payload?;
        state
            .cloud_manager
            .ping(payload.kubeconfig.as_bytes())
            .await?;
        Ok(StatusCode::NO_CONTENT)
    }

    pub async fn get_cloud(
        State(state): State<Arc<AppState>>,
        Path(id): Path<i64>,
    ) -> Result<Json<Cloud>, ApiError> {
        let cloud = state.cloud_manager.get(id).await?;
        Ok(Json(cloud))
    }

    pub async fn update_cloud(
        State(state): State<Arc<AppState>>,
        Path(id): Path<i64>,
        payload: Result<Json<UpdateCloudRequest>, JsonRejection>,
    ) -> Result<Json<Cloud>, ApiError> {
        let Json(payload) = payload?;
        let cloud = state.cloud_manager.update(id, payload).await?;
        Ok(Json(cloud))
    }

    pub async fn delete_cloud(
        State(state): State<Arc<AppState>>,
        Path(id): Path<i64>,
    ) -> Result<StatusCode, ApiError> {
        state.cloud_manager.delete(id).await?;
        Ok(StatusCode::NO_CONTENT)
    }

    pub async fn get_deploy_state(
        State(state): State<Arc<AppState>>,
        Path(id): Path<i64>,
    ) -> Result<Json<DeployState>, ApiError> {
        state
            .cloud_manager
            .deploy_state(id)
            .await
            .map(Json)
            .ok_or_else(|| ApiError::NotFound(format!("No deployment for cloud {}", id)))
    }

    pub async fn start_deploy(
        State(state): State<Arc<AppState>>,
        Path(id): Path<i64>,
    ) -> Result<(StatusCode, Json<DeployState>), ApiError> {
        let deploy = state.cloud_manager.deploy(id).await?;
        Ok((StatusCode::ACCEPTED, Json(deploy)))
    }

    pub async fn cancel_deploy(
        State(state): State<Arc<AppState>>,
        Path(id): Path<i64>,
    ) -> Result<StatusCode, ApiError> {
        state.cloud_manager.cancel_deploy(id).await?;
        Ok(StatusCode::NO_CONTENT)
    }

    // Namespace handlers

    pub async fn list_namespaces(
        State(state): State<Arc<AppState>>,
        Path(cloud): Path<String>,
    ) -> Result<Json<Vec<NamespaceInfo>>, ApiError> {
        let namespaces = state.cloud_manager.list_namespaces(&cloud).await?;
        Ok(Json(namespaces))
    }

    pub async fn create_namespace(
        State(state): State<Arc<AppState>>,
        Path(cloud): Path<String>,
        payload: Result<Json<CreateNamespaceRequest>, JsonRejection>,
    ) -> Result<(StatusCode, Json<NamespaceInfo>), ApiError> {
        let Json(payload) = payload?;
        let ns = state.cloud_manager.create_namespace(&cloud, &payload).await?;
        Ok((StatusCode::CREATED, Json(ns)))
    }

    pub async fn get_namespace(
        State(state): State<Arc<AppState>>,
        Path((cloud, namespace)): Path<(String, String)>,
    ) -> Result<Json<NamespaceInfo>, ApiError> {
        let ns = state.cloud_manager.get_namespace(&cloud, &namespace).await?;
        Ok(Json(ns))
    }

    pub async fn delete_namespace(
        State(state): State<Arc<AppState>>,
        Path((cloud, namespace)): Path<(String, String)>,
    ) -> Result<StatusCode, ApiError> {
        state
            .cloud_manager
            .delete_namespace(&cloud, &namespace)
            .await?;
        Ok(StatusCode::NO_CONTENT)
    }
}

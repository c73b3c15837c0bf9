//! HTTP API Server
//!
//! JSON admin API over a [`TopologyStore`]. Every mutating route runs one
//! named store operation and returns the document it produced.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::ApiConfig;
use crate::error::{Error, Result};
use crate::projector::{ClusterMember, InstanceConf, ShardingConfig};
use crate::store::TopologyStore;
use crate::topology::{
    InstanceOptions, ReplicasetOptions, TopologyDocument, TopologyOptions, TopologyPatch,
};

/// Shared application state
pub struct AppState {
    /// Handle to the managed topology document
    pub store: TopologyStore,
}

/// HTTP API server
pub struct HttpServer {
    config: ApiConfig,
    state: Arc<AppState>,
}

impl HttpServer {
    /// Create a new HTTP server
    pub fn new(config: ApiConfig, store: TopologyStore) -> Self {
        Self {
            config,
            state: Arc::new(AppState { store }),
        }
    }

    /// Get the state for sharing with other components
    pub fn state(&self) -> Arc<AppState> {
        Arc::clone(&self.state)
    }

    /// Create the router
    fn create_router(state: Arc<AppState>, cors_enabled: bool) -> Router {
        let router = Router::new()
            .route("/health", get(handle_health))
            // Document
            .route("/topology", get(handle_get_topology).delete(handle_destroy))
            .route(
                "/topology/options",
                get(handle_get_options).patch(handle_set_options),
            )
            .route("/topology/weights/:from/:to", put(handle_set_zone_weight))
            // Replicasets
            .route("/replicasets", post(handle_new_replicaset))
            .route(
                "/replicasets/:name",
                get(handle_get_replicaset)
                    .patch(handle_set_replicaset)
                    .delete(handle_delete_replicaset),
            )
            .route("/replicasets/:name/instances", post(handle_new_instance))
            // Instances
            .route(
                "/instances/:name",
                get(handle_get_instance)
                    .patch(handle_set_instance)
                    .delete(handle_delete_instance),
            )
            .route("/instances/:name/conf", get(handle_instance_conf))
            .route("/instances/:name/reachable", post(handle_reachable))
            .route("/instances/:name/unreachable", post(handle_unreachable))
            .route("/instances/:name/links", post(handle_new_link))
            .route(
                "/instances/:name/links/:upstream",
                axum::routing::delete(handle_delete_link),
            )
            // Derived configuration
            .route("/routers", get(handle_routers))
            .route("/storages", get(handle_storages))
            .route("/masters", get(handle_masters))
            .route("/sharding", get(handle_sharding))
            .with_state(state)
            .layer(TraceLayer::new_for_http());

        if cors_enabled {
            router.layer(CorsLayer::permissive())
        } else {
            router
        }
    }

    /// Start the HTTP server
    pub async fn start(&self) -> Result<()> {
        if !self.config.enabled {
            tracing::info!("HTTP API disabled");
            return Ok(());
        }

        let app = Self::create_router(Arc::clone(&self.state), self.config.cors_enabled);

        let listener = tokio::net::TcpListener::bind(&self.config.bind_address).await?;
        tracing::info!(
            topology = %self.state.store.name(),
            "HTTP API listening on {}",
            self.config.bind_address
        );

        axum::serve(listener, app).await?;

        Ok(())
    }
}

// ============ Request/Response Types ============

/// New replicaset request
#[derive(Debug, Deserialize, Serialize)]
pub struct NewReplicasetRequest {
    pub name: String,
    #[serde(flatten)]
    pub options: ReplicasetOptions,
}

/// New instance request
#[derive(Debug, Deserialize, Serialize)]
pub struct NewInstanceRequest {
    pub name: String,
    #[serde(flatten)]
    pub options: InstanceOptions,
}

/// New link request
#[derive(Debug, Deserialize, Serialize)]
pub struct NewLinkRequest {
    pub upstream: String,
}

/// Zone weight request
#[derive(Debug, Deserialize, Serialize)]
pub struct ZoneWeightRequest {
    pub weight: f64,
}

/// Health response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub topology: String,
    pub revision: Option<u64>,
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Crate error rendered as an HTTP response
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            Error::Validation { .. } | Error::Config(_) | Error::ConfigParse(_) => {
                StatusCode::BAD_REQUEST
            }
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::NameConflict { .. } | Error::ConcurrencyExhausted { .. } => StatusCode::CONFLICT,
            Error::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::DeadlineExceeded(_) => StatusCode::GATEWAY_TIMEOUT,
            Error::Serialization(_) | Error::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(code = self.0.code(), "request failed: {}", self.0);
        }
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
                code: self.0.code().to_string(),
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

// ============ Handlers ============

async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let revision = state.store.get_topology().await.ok().map(|doc| doc.revision);
    let healthy = revision.is_some();
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(HealthResponse {
            healthy,
            topology: state.store.name().to_string(),
            revision,
        }),
    )
}

async fn handle_get_topology(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<TopologyDocument>> {
    Ok(Json(state.store.get_topology().await?))
}

async fn handle_destroy(State(state): State<Arc<AppState>>) -> ApiResult<StatusCode> {
    state.store.destroy().await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn handle_get_options(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<TopologyOptions>> {
    Ok(Json(state.store.get_topology_options().await?))
}

async fn handle_set_options(
    State(state): State<Arc<AppState>>,
    Json(patch): Json<TopologyPatch>,
) -> ApiResult<Json<TopologyDocument>> {
    Ok(Json(state.store.set_topology_property(patch).await?))
}

async fn handle_set_zone_weight(
    State(state): State<Arc<AppState>>,
    Path((from, to)): Path<(String, String)>,
    Json(req): Json<ZoneWeightRequest>,
) -> ApiResult<Json<TopologyDocument>> {
    Ok(Json(state.store.set_zone_weight(&from, &to, req.weight).await?))
}

async fn handle_new_replicaset(
    State(state): State<Arc<AppState>>,
    Json(req): Json<NewReplicasetRequest>,
) -> ApiResult<(StatusCode, Json<TopologyDocument>)> {
    let doc = state.store.new_replicaset(&req.name, req.options).await?;
    Ok((StatusCode::CREATED, Json(doc)))
}

async fn handle_get_replicaset(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<ReplicasetOptions>> {
    Ok(Json(state.store.get_replicaset_options(&name).await?))
}

async fn handle_set_replicaset(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(options): Json<ReplicasetOptions>,
) -> ApiResult<Json<TopologyDocument>> {
    Ok(Json(state.store.set_replicaset_property(&name, options).await?))
}

async fn handle_delete_replicaset(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<TopologyDocument>> {
    Ok(Json(state.store.delete_replicaset(&name).await?))
}

async fn handle_new_instance(
    State(state): State<Arc<AppState>>,
    Path(replicaset): Path<String>,
    Json(req): Json<NewInstanceRequest>,
) -> ApiResult<(StatusCode, Json<TopologyDocument>)> {
    let doc = state
        .store
        .new_instance(&replicaset, &req.name, req.options)
        .await?;
    Ok((StatusCode::CREATED, Json(doc)))
}

async fn handle_get_instance(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<InstanceOptions>> {
    Ok(Json(state.store.get_instance_options(&name).await?))
}

async fn handle_set_instance(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(options): Json<InstanceOptions>,
) -> ApiResult<Json<TopologyDocument>> {
    Ok(Json(state.store.set_instance_property(&name, options).await?))
}

async fn handle_delete_instance(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<TopologyDocument>> {
    Ok(Json(state.store.delete_instance(&name).await?))
}

async fn handle_instance_conf(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<InstanceConf>> {
    Ok(Json(state.store.get_instance_conf(&name).await?))
}

async fn handle_reachable(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<TopologyDocument>> {
    Ok(Json(state.store.set_instance_reachable(&name).await?))
}

async fn handle_unreachable(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<TopologyDocument>> {
    Ok(Json(state.store.set_instance_unreachable(&name).await?))
}

async fn handle_new_link(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(req): Json<NewLinkRequest>,
) -> ApiResult<(StatusCode, Json<TopologyDocument>)> {
    let doc = state.store.new_instance_link(&name, &req.upstream).await?;
    Ok((StatusCode::CREATED, Json(doc)))
}

async fn handle_delete_link(
    State(state): State<Arc<AppState>>,
    Path((name, upstream)): Path<(String, String)>,
) -> ApiResult<Json<TopologyDocument>> {
    Ok(Json(state.store.delete_instance_link(&name, &upstream).await?))
}

async fn handle_routers(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Vec<ClusterMember>>> {
    Ok(Json(state.store.get_routers().await?))
}

async fn handle_storages(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Vec<ClusterMember>>> {
    Ok(Json(state.store.get_storages().await?))
}

async fn handle_masters(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<std::collections::BTreeMap<String, Vec<String>>>> {
    Ok(Json(state.store.get_replicaset_masters().await?))
}

async fn handle_sharding(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<ShardingConfig>> {
    Ok(Json(state.store.get_sharding_config().await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::kv::MemoryKvStore;
    use crate::store::StoreOptions;

    async fn router() -> Router {
        let store = TopologyStore::open(
            MemoryKvStore::new(),
            "api",
            StoreOptions::default(),
            TopologyOptions::default(),
        )
        .await
        .unwrap();
        HttpServer::create_router(Arc::new(AppState { store }), false)
    }

    async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        let request = match body {
            Some(body) => request.body(Body::from(body.to_string())).unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_health() {
        let app = router().await;
        let (status, body) = call(&app, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["healthy"], json!(true));
        assert_eq!(body["topology"], json!("api"));
        assert_eq!(body["revision"], json!(0));
    }

    #[tokio::test]
    async fn test_build_topology_over_http() {
        let app = router().await;

        let (status, doc) = call(
            &app,
            Method::POST,
            "/replicasets",
            Some(json!({ "name": "rs1", "weight": 2.0 })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(doc["revision"], json!(1));

        for (name, master) in [("a", true), ("b", false)] {
            let (status, _) = call(
                &app,
                Method::POST,
                "/replicasets/rs1/instances",
                Some(json!({
                    "name": name,
                    "advertise_uri": format!("{}.local:3301", name),
                    "is_master": master,
                })),
            )
            .await;
            assert_eq!(status, StatusCode::CREATED);
        }

        let (status, _) = call(
            &app,
            Method::POST,
            "/instances/b/links",
            Some(json!({ "upstream": "a" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, conf) = call(&app, Method::GET, "/instances/b/conf", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(conf["replication"], json!(["a.local:3301"]));
        assert_eq!(conf["read_only"], json!(true));

        let (_, sharding) = call(&app, Method::GET, "/sharding", None).await;
        assert_eq!(sharding["bucket_count"], json!(3000));
        assert_eq!(sharding["sharding"]["rs1"]["weight"], json!(2.0));
        assert_eq!(sharding["sharding"]["rs1"]["replicas"]["a"]["is_master"], json!(true));

        let (_, masters) = call(&app, Method::GET, "/masters", None).await;
        assert_eq!(masters, json!({ "rs1": ["a"] }));

        let (status, _) = call(&app, Method::DELETE, "/instances/b/links/a", None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_error_mapping() {
        let app = router().await;
        call(&app, Method::POST, "/replicasets", Some(json!({ "name": "rs1" }))).await;

        let (status, body) =
            call(&app, Method::POST, "/replicasets", Some(json!({ "name": "rs1" }))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], json!("NAME_CONFLICT"));

        let (status, body) = call(&app, Method::GET, "/instances/ghost", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], json!("NOT_FOUND"));

        let (status, body) = call(
            &app,
            Method::POST,
            "/replicasets",
            Some(json!({ "name": "bad name" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], json!("VALIDATION_ERROR"));
    }

    #[tokio::test]
    async fn test_options_and_destroy() {
        let app = router().await;

        let (status, doc) = call(
            &app,
            Method::PATCH,
            "/topology/options",
            Some(json!({ "rebalancer_max_receiving": 50 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(doc["options"]["rebalancer_max_receiving"], json!(50));

        let (status, _) = call(
            &app,
            Method::PUT,
            "/topology/weights/dc1/dc2",
            Some(json!({ "weight": 5.0 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = call(&app, Method::DELETE, "/topology", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = call(&app, Method::GET, "/topology", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = call(&app, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["healthy"], json!(false));
    }
}

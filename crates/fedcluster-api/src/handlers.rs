//! REST API handlers.
//!
//! Each handler reads/writes via `StateStore` (and the reconciler for
//! worker lifecycle) and returns JSON responses.

use std::collections::BTreeMap;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use fedcluster_state::*;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

fn internal(e: impl std::fmt::Display) -> axum::response::Response {
    error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response()
}

// ── Clusters ──────────────────────────────────────────────────────

/// Body of `POST /api/v1/clusters`. Status is reconciler-owned and cannot
/// be submitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterClusterRequest {
    pub name: ClusterName,
    pub spec: ClusterSpec,
}

/// GET /api/v1/clusters
pub async fn list_clusters(State(state): State<ApiState>) -> impl IntoResponse {
    match state.store.list_clusters() {
        Ok(clusters) => ApiResponse::ok(clusters).into_response(),
        Err(e) => internal(e),
    }
}

/// GET /api/v1/clusters/{name}
pub async fn get_cluster(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.store.get_cluster(&name) {
        Ok(Some(cluster)) => ApiResponse::ok(cluster).into_response(),
        Ok(None) => error_response("cluster not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => internal(e),
    }
}

/// POST /api/v1/clusters
pub async fn register_cluster(
    State(state): State<ApiState>,
    Json(req): Json<RegisterClusterRequest>,
) -> impl IntoResponse {
    let registration = ClusterRegistration {
        name: req.name,
        spec: req.spec,
        status: ClusterStatus::default(),
        created_at: epoch_secs(),
    };
    if let Err(e) = registration.validate() {
        return error_response(&e.to_string(), StatusCode::BAD_REQUEST).into_response();
    }

    match state.store.create_cluster(&registration) {
        Ok(true) => {}
        Ok(false) => {
            return error_response("cluster already registered", StatusCode::CONFLICT)
                .into_response();
        }
        Err(e) => return internal(e),
    }

    let name = &registration.name;
    if state.reconciler.config().in_scope(name) {
        state.reconciler.start_worker(name).await;
    } else {
        warn!(cluster = %name, "registered cluster is outside this instance's scope");
    }
    info!(cluster = %name, endpoint = %registration.spec.api_endpoint, "cluster registered");

    (StatusCode::CREATED, ApiResponse::ok(registration)).into_response()
}

/// DELETE /api/v1/clusters/{name}
pub async fn deregister_cluster(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.reconciler.deregister(&name).await {
        Ok(true) => ApiResponse::ok("deregistered").into_response(),
        Ok(false) => error_response("cluster not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => internal(e),
    }
}

// ── Secrets ───────────────────────────────────────────────────────

/// Body of `PUT /api/v1/secrets/{name}`.
#[derive(Deserialize)]
pub struct PutSecretRequest {
    pub token: String,
}

/// Where a secret was stored. The token itself is never echoed.
#[derive(Debug, Serialize, Deserialize)]
pub struct SecretLocation {
    pub namespace: String,
    pub name: String,
}

/// PUT /api/v1/secrets/{name}
pub async fn put_secret(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Json(req): Json<PutSecretRequest>,
) -> impl IntoResponse {
    if req.token.trim().is_empty() {
        return error_response("token must not be empty", StatusCode::BAD_REQUEST).into_response();
    }

    let secret = ClusterSecret {
        namespace: state.namespace().to_string(),
        name,
        data: BTreeMap::from([(TOKEN_KEY.to_string(), req.token)]),
    };
    match state.store.put_secret(&secret) {
        Ok(()) => {
            info!(namespace = %secret.namespace, secret = %secret.name, "cluster secret stored");
            ApiResponse::ok(SecretLocation {
                namespace: secret.namespace,
                name: secret.name,
            })
            .into_response()
        }
        Err(e) => internal(e),
    }
}

// ── Health ────────────────────────────────────────────────────────

/// GET /healthz
pub async fn healthz(State(state): State<ApiState>) -> impl IntoResponse {
    let workers = state.reconciler.active_workers().await.len();
    ApiResponse::ok(serde_json::json!({
        "status": "ok",
        "workers": workers,
    }))
}

fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use fedcluster_health::{ClusterReconciler, HttpClusterClient, ReconcilerConfig};

    fn test_state(config: ReconcilerConfig) -> ApiState {
        let store = StateStore::open_in_memory().unwrap();
        let reconciler = Arc::new(ClusterReconciler::new(
            store.clone(),
            Arc::new(HttpClusterClient::new()),
            config,
        ));
        ApiState { store, reconciler }
    }

    fn request(name: &str) -> RegisterClusterRequest {
        RegisterClusterRequest {
            name: name.to_string(),
            spec: ClusterSpec {
                // Nothing listens here; workers record the cluster Offline.
                api_endpoint: "https://127.0.0.1:1".to_string(),
                ca_bundle: None,
                secret_ref: SecretRef {
                    name: name.to_string(),
                },
            },
        }
    }

    #[tokio::test]
    async fn list_clusters_empty() {
        let state = test_state(ReconcilerConfig::default());
        let resp = list_clusters(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn register_and_get_cluster() {
        let state = test_state(ReconcilerConfig::default());

        let resp = register_cluster(State(state.clone()), Json(request("east")))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::CREATED);
        assert!(state.reconciler.is_reconciling("east").await);

        let resp = get_cluster(State(state.clone()), Path("east".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);

        state.reconciler.stop_all().await;
    }

    #[tokio::test]
    async fn register_rejects_invalid_name() {
        let state = test_state(ReconcilerConfig::default());
        let resp = register_cluster(State(state.clone()), Json(request("East_1")))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(state.store.list_clusters().unwrap().is_empty());
    }

    #[tokio::test]
    async fn register_twice_conflicts() {
        let state = test_state(ReconcilerConfig::default());
        register_cluster(State(state.clone()), Json(request("east"))).await;

        let resp = register_cluster(State(state.clone()), Json(request("east")))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        state.reconciler.stop_all().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_registrations_create_once() {
        let state = test_state(ReconcilerConfig::default());

        let attempts: Vec<_> = (0..16)
            .map(|_| {
                let state = state.clone();
                tokio::spawn(async move {
                    register_cluster(State(state), Json(request("east")))
                        .await
                        .into_response()
                        .status()
                })
            })
            .collect();
        let mut created = 0;
        for attempt in attempts {
            match attempt.await.unwrap() {
                StatusCode::CREATED => created += 1,
                status => assert_eq!(status, StatusCode::CONFLICT),
            }
        }

        assert_eq!(created, 1);
        assert_eq!(state.store.list_clusters().unwrap().len(), 1);
        state.reconciler.stop_all().await;
    }

    #[tokio::test]
    async fn out_of_scope_cluster_is_stored_but_not_reconciled() {
        let state = test_state(ReconcilerConfig {
            clusters: vec!["west".to_string()],
            ..ReconcilerConfig::default()
        });

        let resp = register_cluster(State(state.clone()), Json(request("east")))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::CREATED);
        assert!(state.store.get_cluster("east").unwrap().is_some());
        assert!(!state.reconciler.is_reconciling("east").await);
    }

    #[tokio::test]
    async fn get_nonexistent_cluster() {
        let state = test_state(ReconcilerConfig::default());
        let resp = get_cluster(State(state), Path("nope".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn deregister_stops_worker() {
        let state = test_state(ReconcilerConfig::default());
        register_cluster(State(state.clone()), Json(request("east"))).await;

        let resp = deregister_cluster(State(state.clone()), Path("east".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(!state.reconciler.is_reconciling("east").await);
        assert!(state.store.get_cluster("east").unwrap().is_none());
    }

    #[tokio::test]
    async fn deregister_nonexistent_cluster() {
        let state = test_state(ReconcilerConfig::default());
        let resp = deregister_cluster(State(state), Path("nope".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn put_secret_uses_control_plane_namespace() {
        let state = test_state(ReconcilerConfig {
            control_plane_namespace: "fed-system".to_string(),
            ..ReconcilerConfig::default()
        });

        let resp = put_secret(
            State(state.clone()),
            Path("east".to_string()),
            Json(PutSecretRequest {
                token: "abc".to_string(),
            }),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::OK);

        let secret = state.store.get_secret("fed-system", "east").unwrap().unwrap();
        assert_eq!(secret.data.get(TOKEN_KEY).map(String::as_str), Some("abc"));
    }

    #[tokio::test]
    async fn put_secret_rejects_empty_token() {
        let state = test_state(ReconcilerConfig::default());
        let resp = put_secret(
            State(state),
            Path("east".to_string()),
            Json(PutSecretRequest {
                token: " ".to_string(),
            }),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn healthz_ok() {
        let state = test_state(ReconcilerConfig::default());
        let resp = healthz(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}

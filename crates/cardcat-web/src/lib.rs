//! Axum glue: serves the current card catalog and triggers refreshes.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use cardcat_core::CanonicalCard;
use cardcat_storage::DatasetStore;
use cardcat_sync::RefreshPipeline;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

pub const CRATE_NAME: &str = "cardcat-web";

pub const DEFAULT_ADDR: &str = "0.0.0.0:3001";

/// Read-only view of the dataset as of the last load. Replaced wholesale,
/// never mutated.
pub type CatalogSnapshot = Arc<[CanonicalCard]>;

pub struct AppState {
    pipeline: RefreshPipeline,
    catalog: RwLock<CatalogSnapshot>,
    refresh_lock: Mutex<()>,
}

impl AppState {
    /// Wrap `pipeline` and load the catalog it last persisted.
    pub async fn load(pipeline: RefreshPipeline) -> Self {
        let catalog = load_snapshot(pipeline.store()).await;
        Self {
            pipeline,
            catalog: RwLock::new(catalog),
            refresh_lock: Mutex::new(()),
        }
    }

    pub async fn snapshot(&self) -> CatalogSnapshot {
        Arc::clone(&*self.catalog.read().await)
    }

    async fn reload(&self) -> usize {
        let catalog = load_snapshot(self.pipeline.store()).await;
        let count = catalog.len();
        *self.catalog.write().await = catalog;
        count
    }
}

/// A missing or unreadable dataset serves as an empty catalog.
async fn load_snapshot(store: &DatasetStore) -> CatalogSnapshot {
    match store.load().await {
        Ok(cards) => cards.into(),
        Err(err) => {
            warn!(dataset = %store.dataset_path().display(), error = %format!("{err:#}"), "no card dataset loaded");
            Arc::from(Vec::new())
        }
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/cards", get(cards_handler))
        .route("/api/refresh-cards", post(refresh_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(addr: &str, state: AppState) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "serving card catalog");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
struct CardsQuery {
    limit: Option<usize>,
}

async fn cards_handler(State(state): State<Arc<AppState>>, Query(query): Query<CardsQuery>) -> Response {
    let snapshot = state.snapshot().await;
    let limit = query.limit.unwrap_or(snapshot.len()).min(snapshot.len());
    Json(&snapshot[..limit]).into_response()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    total_cards: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

async fn refresh_handler(State(state): State<Arc<AppState>>) -> Response {
    let _writer = state.refresh_lock.lock().await;
    match state.pipeline.run_once().await {
        Ok(summary) => {
            let served = state.reload().await;
            info!(run_id = %summary.run_id, cards = summary.final_count, served, "refresh finished");
            Json(RefreshResponse {
                success: true,
                total_cards: Some(summary.final_count),
                error: None,
            })
            .into_response()
        }
        Err(err) => {
            warn!(error = %format!("{err:#}"), "refresh failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(RefreshResponse {
                    success: false,
                    total_cards: None,
                    error: Some(format!("{err:#}")),
                }),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    use axum::body::Body;
    use cardcat_core::SourceId;
    use cardcat_sync::{EndpointConfig, RefreshConfig, SourceConfig, SourceMode, SourceRegistry};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn repo_root() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("../..")
    }

    fn fixture_registry() -> SourceRegistry {
        let source = |source_id: SourceId, category: &str| SourceConfig {
            source_id,
            display_name: source_id.display_name().to_string(),
            enabled: true,
            mode: SourceMode::Fixture,
            base_url: "https://example.test".to_string(),
            endpoints: vec![EndpointConfig {
                category: category.to_string(),
                path: category.to_string(),
            }],
            max_cards_per_page: None,
        };
        SourceRegistry {
            sources: vec![
                source(SourceId::NerdWallet, "travel"),
                source(SourceId::ThePointsGuy, "best"),
                source(SourceId::Bankrate, "best"),
            ],
        }
    }

    async fn test_state(dir: &Path) -> AppState {
        let mut config = RefreshConfig::for_workspace(dir);
        config.fixtures_dir = repo_root().join("fixtures");
        config.request_delay = Duration::from_millis(0);
        let pipeline = RefreshPipeline::new(config)
            .unwrap()
            .with_registry(fixture_registry());
        AppState::load(pipeline).await
    }

    async fn json_body(resp: Response) -> serde_json::Value {
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    fn get(uri: &str) -> axum::http::Request<Body> {
        axum::http::Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post(uri: &str) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .method("POST")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let dir = tempfile::tempdir().unwrap();
        let resp = app(test_state(dir.path()).await).oneshot(get("/health")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await["status"], "ok");
    }

    #[tokio::test]
    async fn empty_catalog_before_first_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let resp = app(test_state(dir.path()).await).oneshot(get("/api/cards")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await, serde_json::json!([]));
    }

    #[tokio::test]
    async fn refresh_replaces_served_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(test_state(dir.path()).await);

        let resp = app.clone().oneshot(post("/api/refresh-cards")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            json_body(resp).await,
            serde_json::json!({ "success": true, "totalCards": 5 })
        );

        let cards = json_body(app.clone().oneshot(get("/api/cards")).await.unwrap()).await;
        let cards = cards.as_array().unwrap();
        assert_eq!(cards.len(), 5);
        assert_eq!(cards[0]["id"], "chase_chase_sapphire_preferred_card");
        assert_eq!(cards[0]["network"], "Visa");

        let top = json_body(app.oneshot(get("/api/cards?limit=2")).await.unwrap()).await;
        assert_eq!(top.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn failed_refresh_returns_error_body() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path()).await;
        std::fs::create_dir_all(state.pipeline.store().dataset_path()).unwrap();

        let resp = app(state).oneshot(post("/api/refresh-cards")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(resp).await;
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("writing card dataset"));
        assert!(body.get("totalCards").is_none());
    }
}

//! bqc-annotate library - Annotation Server
//!
//! Single-process review UI over a [`ReviewSource`]: list view, per-item
//! rating form, and the slice montages served straight from `results/`.
//! Every submission goes through the ledger's locked upsert.

use axum::Router;
use bqc_common::layout::ResultsLayout;
use bqc_common::ledger::{LedgerSnapshot, ReviewLedger};
use bqc_common::source::{ReviewItem, ReviewSource};
use bqc_common::{ItemKey, Phase, Rating, ReviewRecord};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

pub mod api;
pub mod error;
pub mod pagination;
pub mod queue;

use error::ApiResult;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Where the items of the active phase come from
    pub source: Arc<dyn ReviewSource>,
    /// Ledger handle; every request re-reads the file
    pub ledger: ReviewLedger,
    pub layout: ResultsLayout,
    /// Rows per list page
    pub page_size: usize,
    items: Arc<RwLock<Arc<Vec<ReviewItem>>>>,
}

impl AppState {
    /// Create state and take the first item snapshot
    pub fn new(
        source: Arc<dyn ReviewSource>,
        layout: ResultsLayout,
        page_size: usize,
    ) -> bqc_common::Result<Self> {
        let items = source.items()?;
        info!("{}: {} items", source.title(), items.len());
        Ok(Self {
            ledger: ReviewLedger::open(&layout),
            source,
            layout,
            page_size,
            items: Arc::new(RwLock::new(Arc::new(items))),
        })
    }

    pub fn phase(&self) -> Phase {
        self.source.phase()
    }

    /// Current item snapshot
    pub async fn items(&self) -> Arc<Vec<ReviewItem>> {
        Arc::clone(&*self.items.read().await)
    }

    /// Re-read the item source; returns the new item count
    pub async fn rescan(&self) -> ApiResult<usize> {
        let source = Arc::clone(&self.source);
        let items = tokio::task::spawn_blocking(move || source.items()).await??;
        let count = items.len();
        *self.items.write().await = Arc::new(items);
        info!("Rescanned: {} items", count);
        Ok(count)
    }

    /// Fresh ledger snapshot of the active phase
    pub async fn snapshot(&self) -> ApiResult<LedgerSnapshot> {
        let ledger = self.ledger.clone();
        let phase = self.phase();
        Ok(tokio::task::spawn_blocking(move || ledger.load(phase)).await??)
    }

    /// Record a rating through the ledger's serialized upsert
    pub async fn record(
        &self,
        key: ItemKey,
        rating: Rating,
        annotation: String,
    ) -> ApiResult<ReviewRecord> {
        let ledger = self.ledger.clone();
        let phase = self.phase();
        Ok(
            tokio::task::spawn_blocking(move || ledger.upsert(phase, &key, rating, &annotation))
                .await??,
        )
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::{get, post};

    let artifacts = ServeDir::new(state.layout.root());

    Router::new()
        .route("/", get(api::ui::list_page))
        .route(
            "/review",
            get(api::review::review_page).post(api::review::submit_review),
        )
        .route("/next", get(api::review::next_unrated))
        .route("/rescan", post(api::ui::rescan))
        .route("/api/status", get(api::status::get_status))
        .route("/api/buildinfo", get(api::buildinfo::get_build_info))
        .merge(api::health_routes())
        .nest_service("/artifacts", artifacts)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind the server socket, reporting an occupied port as `PortInUse`
pub async fn bind(host: &str, port: u16) -> bqc_common::Result<TcpListener> {
    match TcpListener::bind((host, port)).await {
        Ok(listener) => Ok(listener),
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => Err(bqc_common::Error::PortInUse {
            host: host.to_string(),
            port,
        }),
        Err(e) => Err(e.into()),
    }
}

use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use engine::config::SearchConfig;
use engine::index::Document;
use engine::persist::SledStore;
use engine::{DocId, QueryEngine, Storage, TextNormalizer};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use time::OffsetDateTime;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: String,
    /// 1-based result page.
    pub page: Option<usize>,
}

#[derive(Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub num_hits: usize,
    pub page: usize,
    pub max_pages: usize,
    pub matched_terms: Vec<String>,
    pub stopwords: Vec<String>,
    pub unknown_terms: Vec<String>,
    pub results: Vec<SearchHit>,
}

#[derive(Serialize)]
pub struct SearchHit {
    pub doc_id: DocId,
    pub score: f32,
    pub title: String,
    pub author: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub published_date: Option<OffsetDateTime>,
    pub snippet: String,
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Storage>,
    pub normalizer: Arc<TextNormalizer>,
    pub config: Arc<SearchConfig>,
}

pub enum ApiError {
    NotFound(String),
    Engine(engine::Error),
}

impl From<engine::Error> for ApiError {
    fn from(err: engine::Error) -> Self {
        ApiError::Engine(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(what) => (StatusCode::NOT_FOUND, what),
            ApiError::Engine(err) => {
                tracing::error!(error = %err, "storage failure");
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

/// Open the sled index at `db` and build the router over it.
pub fn build_app(db: &std::path::Path, config: SearchConfig) -> Result<Router> {
    let store = SledStore::open(db)?;
    if let Some(meta) = store.meta()? {
        tracing::info!(num_docs = meta.num_docs, num_terms = meta.num_terms, created_at = %meta.created_at, "loaded index");
    } else {
        tracing::warn!(db = %db.display(), "no index built yet; every search will be empty");
    }
    let normalizer = TextNormalizer::from_config(&config)?;
    Ok(router(AppState { store: Arc::new(store), normalizer: Arc::new(normalizer), config: Arc::new(config) }))
}

/// Origins come from a comma-separated list; a missing or empty list allows any origin.
pub fn cors_layer(origins: Option<&str>) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .filter_map(|origin| origin.parse().ok())
        .collect();
    let allow_origin = if allowed.is_empty() { AllowOrigin::any() } else { AllowOrigin::list(allowed) };
    CorsLayer::new().allow_origin(allow_origin).allow_methods(Any).allow_headers(Any)
}

pub fn router(state: AppState) -> Router {
    let origins = std::env::var("CORS_ALLOW_ORIGIN").ok();
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/search", get(search_handler))
        .route("/doc/:doc_id", get(doc_handler))
        .with_state(state)
        .layer(cors_layer(origins.as_deref()))
        .layer(TraceLayer::new_for_http())
}

pub async fn search_handler(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, ApiError> {
    let query = params.q.split_whitespace().collect::<Vec<_>>().join(" ");
    let config = &state.config;
    // scoring and rendering read the same index version
    let view = state.store.snapshot()?;
    let n = match config.corpus_size {
        Some(n) => n,
        None => view.corpus_size()?,
    };
    let outcome = QueryEngine::new(state.normalizer.as_ref(), state.store.as_ref())
        .query_in(view.as_ref(), &query, config.top_k, n)?;

    let num_hits = outcome.ranked.len();
    let page_size = config.page_size.max(1);
    let max_pages = num_hits.div_ceil(page_size);
    let page = if max_pages == 0 { 0 } else { params.page.unwrap_or(1).clamp(1, max_pages) };

    let mut results = Vec::new();
    if page > 0 {
        for scored in outcome.ranked.iter().skip((page - 1) * page_size).take(page_size) {
            let Some(doc) = view.get_document(scored.doc_id)? else {
                tracing::warn!(doc_id = scored.doc_id, "ranked document missing from store");
                continue;
            };
            results.push(SearchHit {
                doc_id: doc.id,
                score: round4(scored.score),
                snippet: truncate(&doc.content, config.truncate_length),
                title: doc.title,
                author: doc.author,
                published_date: doc.published_date,
            });
        }
    }

    Ok(Json(SearchResponse {
        query,
        num_hits,
        page,
        max_pages,
        matched_terms: outcome.matched_terms,
        stopwords: outcome.stopwords,
        unknown_terms: outcome.unknown_terms,
        results,
    }))
}

pub async fn doc_handler(
    State(state): State<AppState>,
    Path(doc_id): Path<DocId>,
) -> Result<Json<Document>, ApiError> {
    match state.store.get_document(doc_id)? {
        Some(doc) => Ok(Json(doc)),
        None => Err(ApiError::NotFound(format!("document {doc_id} not found"))),
    }
}

fn round4(score: f32) -> f32 {
    (score * 10_000.0).round() / 10_000.0
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_on_char_boundaries() {
        assert_eq!(truncate("héllo world", 5), "héllo...");
        assert_eq!(truncate("short", 150), "short");
    }

    #[test]
    fn rounds_to_four_places() {
        assert_eq!(round4(0.123456), 0.1235);
    }
}

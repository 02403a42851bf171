//! HTTP surface: every handler is a thin fetch → pure-core call → persist
//! sequence. No reconciliation decision lives in this crate.

use axum::extract::{Path, Query, State};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use concilio_core::{
    CandidateEntity, EntityKind, EntityLink, LinkOrigin, SplitLine, TransactionId,
    TransactionRecord,
};
use concilio_reconcile::{
    links, split, ImportSummary, IncomingRecord, MatchEngine, MatchReport, MatchWeights, Unlinked,
};
use concilio_storage::{self as storage, DbPool, SplitCommit};

use crate::error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub weights: MatchWeights,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/transactions", get(list_transactions))
        .route("/api/transactions/{id}", get(get_transaction))
        .route("/api/transactions/{id}/children", get(list_children))
        .route("/api/transactions/{id}/classification", put(set_classification))
        .route("/api/transactions/{id}/status", post(cycle_status))
        .route("/api/transactions/{id}/links", post(add_link))
        .route(
            "/api/transactions/{id}/links/{kind}/{entity_id}",
            delete(remove_link),
        )
        .route("/api/transactions/{id}/split", post(split_transaction))
        .route(
            "/api/transactions/{id}/children/{child_id}",
            delete(remove_child),
        )
        .route("/api/imports", post(import))
        .route("/api/match", post(run_match))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn load(db: &DbPool, id: i64) -> Result<TransactionRecord, ApiError> {
    storage::get_transaction(db, TransactionId(id))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("transaction {id} not found")))
}

async fn list_transactions(
    State(state): State<AppState>,
) -> Result<Json<Vec<TransactionRecord>>, ApiError> {
    Ok(Json(storage::fetch_all_transactions(&state.db).await?))
}

async fn get_transaction(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<TransactionRecord>, ApiError> {
    Ok(Json(load(&state.db, id).await?))
}

async fn list_children(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<TransactionRecord>>, ApiError> {
    Ok(Json(storage::get_children(&state.db, TransactionId(id)).await?))
}

#[derive(Debug, Deserialize)]
struct ImportRequest {
    records: Vec<IncomingRecord>,
}

async fn import(
    State(state): State<AppState>,
    Json(request): Json<ImportRequest>,
) -> Result<Json<ImportSummary>, ApiError> {
    let summary = storage::import_batch(&state.db, &request.records).await?;
    tracing::info!(
        new = summary.new,
        completed = summary.completed,
        enriched = summary.enriched,
        duplicates = summary.duplicates,
        errors = summary.errors,
        "import batch processed"
    );
    Ok(Json(summary))
}

#[derive(Debug, Deserialize)]
struct MatchRequest {
    candidates: Vec<CandidateEntity>,
}

async fn run_match(
    State(state): State<AppState>,
    Json(request): Json<MatchRequest>,
) -> Result<Json<MatchReport>, ApiError> {
    let ledger = storage::fetch_all_transactions(&state.db).await?;
    let engine = MatchEngine::new(state.weights.clone());
    Ok(Json(engine.find_matches(&ledger, &request.candidates)))
}

#[derive(Debug, Deserialize)]
struct LinkRequest {
    entity_kind: EntityKind,
    entity_id: String,
    entity_name: String,
    confidence: u8,
    matched_by: LinkOrigin,
}

async fn add_link(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<LinkRequest>,
) -> Result<Json<TransactionRecord>, ApiError> {
    let mut tx = load(&state.db, id).await?;

    let link = EntityLink {
        entity_kind: request.entity_kind,
        entity_id: request.entity_id,
        entity_name: request.entity_name,
        confidence: request.confidence,
        matched_at: Utc::now(),
        matched_by: request.matched_by,
    };
    links::accept_link(&mut tx, link.clone())?;

    storage::insert_link(&state.db, tx.id, &link).await?;
    storage::set_status(&state.db, tx.id, tx.status).await?;
    Ok(Json(tx))
}

async fn remove_link(
    State(state): State<AppState>,
    Path((id, kind, entity_id)): Path<(i64, EntityKind, String)>,
) -> Result<Json<Unlinked>, ApiError> {
    let mut tx = load(&state.db, id).await?;

    let unlinked = links::remove_link(&mut tx, kind, &entity_id)?;

    storage::delete_link(&state.db, tx.id, kind, &entity_id).await?;
    storage::set_status(&state.db, tx.id, tx.status).await?;
    Ok(Json(unlinked))
}

async fn cycle_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<TransactionRecord>, ApiError> {
    let mut tx = load(&state.db, id).await?;

    links::cycle_status(&mut tx)?;

    storage::set_status(&state.db, tx.id, tx.status).await?;
    Ok(Json(tx))
}

#[derive(Debug, Deserialize)]
struct ClassificationRequest {
    category_id: Option<String>,
    account_code: Option<String>,
}

async fn set_classification(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<ClassificationRequest>,
) -> Result<Json<TransactionRecord>, ApiError> {
    let tx = load(&state.db, id).await?;
    storage::set_classification(
        &state.db,
        tx.id,
        request.category_id.as_deref(),
        request.account_code.as_deref(),
    )
    .await?;
    Ok(Json(load(&state.db, id).await?))
}

#[derive(Debug, Deserialize)]
struct SplitRequest {
    lines: Vec<SplitLine>,
    #[serde(default)]
    confirm_discard: bool,
}

async fn split_transaction(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<SplitRequest>,
) -> Result<Json<SplitCommit>, ApiError> {
    let parent = load(&state.db, id).await?;
    let children = storage::get_children(&state.db, parent.id).await?;

    let plan = split::plan_split(&parent, &children, &request.lines, request.confirm_discard)?;
    let commit = storage::commit_split(&state.db, &plan).await?;
    Ok(Json(commit))
}

#[derive(Debug, Deserialize)]
struct ConfirmQuery {
    #[serde(default)]
    confirm_discard: bool,
}

async fn remove_child(
    State(state): State<AppState>,
    Path((id, child_id)): Path<(i64, i64)>,
    Query(query): Query<ConfirmQuery>,
) -> Result<Json<SplitCommit>, ApiError> {
    let parent = load(&state.db, id).await?;
    let children = storage::get_children(&state.db, parent.id).await?;

    let plan = split::plan_remove_child(
        &parent,
        &children,
        TransactionId(child_id),
        query.confirm_discard,
    )?;
    let commit = storage::commit_split(&state.db, &plan).await?;
    Ok(Json(commit))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Method, Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn test_app() -> (tempfile::TempDir, Router) {
        let dir = tempfile::tempdir().unwrap();
        let db = storage::create_db(&dir.path().join("test.db")).await.unwrap();
        let state = AppState { db, weights: MatchWeights::default() };
        (dir, app(state))
    }

    fn request(method: Method, uri: &str, body: Option<Value>) -> Request<Body> {
        let builder = Request::builder().method(method).uri(uri);
        match body {
            Some(value) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(value.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn import_body() -> Value {
        json!({
            "records": [{
                "sequence_number": "2025-00001",
                "execution_date": "2025-03-01",
                "value_date": "2025-03-02",
                "amount": "-15.00",
                "counterparty_name": "Bakkerij Janssens",
                "counterparty_iban": "BE71096123456769",
                "communication": "brood lustrumweekend",
                "account_number": "BE02735001234567"
            }]
        })
    }

    #[tokio::test]
    async fn health_endpoint_responds() {
        let (_dir, app) = test_app().await;
        let response = app
            .oneshot(request(Method::GET, "/health", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn import_then_list() {
        let (_dir, app) = test_app().await;

        let response = app
            .clone()
            .oneshot(request(Method::POST, "/api/imports", Some(import_body())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let summary = json_body(response).await;
        assert_eq!(summary["new"], 1);

        let response = app
            .oneshot(request(Method::GET, "/api/transactions", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let listed = json_body(response).await;
        assert_eq!(listed.as_array().unwrap().len(), 1);
        assert_eq!(listed[0]["counterparty_name"], "Bakkerij Janssens");
    }

    #[tokio::test]
    async fn duplicate_link_returns_conflict() {
        let (_dir, app) = test_app().await;
        app.clone()
            .oneshot(request(Method::POST, "/api/imports", Some(import_body())))
            .await
            .unwrap();

        let link = json!({
            "entity_kind": "expense",
            "entity_id": "claim-1",
            "entity_name": "drank kickoff",
            "confidence": 92,
            "matched_by": "manual"
        });

        let first = app
            .clone()
            .oneshot(request(
                Method::POST,
                "/api/transactions/1/links",
                Some(link.clone()),
            ))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        let tx = json_body(first).await;
        assert_eq!(tx["status"], "reconciled");

        let second = app
            .oneshot(request(Method::POST, "/api/transactions/1/links", Some(link)))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn unlink_reports_side_effect_and_resets_status() {
        let (_dir, app) = test_app().await;
        app.clone()
            .oneshot(request(Method::POST, "/api/imports", Some(import_body())))
            .await
            .unwrap();
        app.clone()
            .oneshot(request(
                Method::POST,
                "/api/transactions/1/links",
                Some(json!({
                    "entity_kind": "expense",
                    "entity_id": "claim-1",
                    "entity_name": "drank kickoff",
                    "confidence": 92,
                    "matched_by": "manual"
                })),
            ))
            .await
            .unwrap();

        let response = app
            .clone()
            .oneshot(request(
                Method::DELETE,
                "/api/transactions/1/links/expense/claim-1",
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let unlinked = json_body(response).await;
        assert_eq!(unlinked["side_effect"]["action"], "revertExpenseClaim");
        assert_eq!(unlinked["side_effect"]["claim_id"], "claim-1");

        let response = app
            .oneshot(request(Method::GET, "/api/transactions/1", None))
            .await
            .unwrap();
        let tx = json_body(response).await;
        assert_eq!(tx["status"], "unverified");
        assert_eq!(tx["links"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn split_endpoint_creates_children() {
        let (_dir, app) = test_app().await;
        app.clone()
            .oneshot(request(Method::POST, "/api/imports", Some(import_body())))
            .await
            .unwrap();

        let response = app
            .clone()
            .oneshot(request(
                Method::POST,
                "/api/transactions/1/split",
                Some(json!({
                    "lines": [
                        { "description": "brood", "amount": "10.00" },
                        { "description": "koffiekoeken", "amount": "5.00" }
                    ]
                })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let commit = json_body(response).await;
        assert_eq!(commit["created"].as_array().unwrap().len(), 2);

        let response = app
            .oneshot(request(Method::GET, "/api/transactions/1/children", None))
            .await
            .unwrap();
        let children = json_body(response).await;
        assert_eq!(children.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn invalid_split_is_unprocessable() {
        let (_dir, app) = test_app().await;
        app.clone()
            .oneshot(request(Method::POST, "/api/imports", Some(import_body())))
            .await
            .unwrap();

        let response = app
            .oneshot(request(
                Method::POST,
                "/api/transactions/1/split",
                Some(json!({
                    "lines": [
                        { "description": "brood", "amount": "10.00" },
                        { "description": "koffiekoeken", "amount": "99.00" }
                    ]
                })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}

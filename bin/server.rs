// Fleet Ledger - Web Server
// REST API with Axum over the SQLite ledger

use anyhow::{Context, Result};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::NaiveDate;
use fleet_ledger::{
    handle_bulk, handle_update, init_tracing, BulkRequest, DateRange, ErrorCode, Ledger,
    LedgerConfig, RegisterEntity, SqliteStore, SystemClock, UpdateError, UpdateInput,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Shared application state
#[derive(Clone)]
struct AppState {
    ledger: Arc<Ledger<SqliteStore>>,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(rename = "errorCode", skip_serializing_if = "Option::is_none")]
    error_code: Option<ErrorCode>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Response {
        (
            StatusCode::OK,
            Json(Self {
                success: true,
                data: Some(data),
                error: None,
                error_code: None,
            }),
        )
            .into_response()
    }
}

fn failure(err: &UpdateError) -> Response {
    let status = match err.code() {
        ErrorCode::EntityNotFound => StatusCode::NOT_FOUND,
        ErrorCode::StorageFailure => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::UNPROCESSABLE_ENTITY,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!("ledger error: {}", err);
    }

    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(err.to_string()),
            error_code: Some(err.code()),
        }),
    )
        .into_response()
}

#[derive(Deserialize)]
struct HistoryQuery {
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> Response {
    ApiResponse::ok("OK")
}

/// GET /api/entities - All tracked entities
async fn list_entities(State(state): State<AppState>) -> Response {
    match state.ledger.entities() {
        Ok(entities) => ApiResponse::ok(entities),
        Err(e) => failure(&e),
    }
}

/// POST /api/entities - Register a new entity
async fn register_entity(
    State(state): State<AppState>,
    Json(payload): Json<RegisterEntity>,
) -> Response {
    let entity = payload.into_entity();
    match state.ledger.register(entity.clone()) {
        Ok(()) => {
            let body = ApiResponse {
                success: true,
                data: Some(entity),
                error: None,
                error_code: None,
            };
            (StatusCode::CREATED, Json(body)).into_response()
        }
        Err(e) => failure(&e),
    }
}

/// GET /api/entities/:id - One entity's current value
async fn get_entity(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.ledger.entity(&id) {
        Ok(entity) => ApiResponse::ok(entity),
        Err(e) => failure(&e),
    }
}

/// POST /api/entities/:id/updates - Single update (path id wins over body)
async fn post_update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(mut input): Json<UpdateInput>,
) -> Response {
    // Path ids arrive percent-decoded
    input.entity_id = id;

    let ledger = Arc::clone(&state.ledger);
    let response = match tokio::task::spawn_blocking(move || handle_update(ledger.as_ref(), input)).await {
        Ok(r) => r,
        Err(e) => return failure(&UpdateError::Storage(e.to_string())),
    };

    let status = match response.error_code {
        None => StatusCode::OK,
        Some(ErrorCode::EntityNotFound) => StatusCode::NOT_FOUND,
        Some(ErrorCode::StorageFailure) => StatusCode::INTERNAL_SERVER_ERROR,
        Some(_) => StatusCode::UNPROCESSABLE_ENTITY,
    };
    (status, Json(response)).into_response()
}

/// GET /api/entities/:id/history?from=&to= - Audit records, oldest first
async fn get_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<HistoryQuery>,
) -> Response {
    let range = DateRange { from: q.from, to: q.to };
    match state.ledger.history(&id, &range) {
        Ok(history) => ApiResponse::ok(history),
        Err(e) => failure(&e),
    }
}

/// GET /api/entities/:id/verify - Replay and hash-chain check
async fn verify_entity(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.ledger.verify(&id) {
        Ok(report) => ApiResponse::ok(report),
        Err(e) => failure(&e),
    }
}

/// POST /api/bulk - Batch of rows; always 200, outcomes are per row
async fn post_bulk(State(state): State<AppState>, Json(request): Json<BulkRequest>) -> Response {
    let ledger = Arc::clone(&state.ledger);
    match tokio::task::spawn_blocking(move || handle_bulk(ledger.as_ref(), request)).await {
        Ok(report) => ApiResponse::ok(report),
        Err(e) => failure(&UpdateError::Storage(e.to_string())),
    }
}

/// GET /api/low-stock - Stock under reorder level
async fn low_stock(State(state): State<AppState>) -> Response {
    match state.ledger.low_stock() {
        Ok(items) => ApiResponse::ok(items),
        Err(e) => failure(&e),
    }
}

fn api_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/entities", get(list_entities).post(register_entity))
        .route("/entities/:id", get(get_entity))
        .route("/entities/:id/updates", post(post_update))
        .route("/entities/:id/history", get(get_history))
        .route("/entities/:id/verify", get(verify_entity))
        .route("/bulk", post(post_bulk))
        .route("/low-stock", get(low_stock))
        .with_state(state)
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args().nth(1).map(std::path::PathBuf::from);
    let config = LedgerConfig::load(config_path.as_deref())?;
    init_tracing(&config.log_filter);

    println!("🌐 Fleet Ledger - Web Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let store = SqliteStore::open(&config.database_path)?;
    info!(path = ?config.database_path, "database opened");

    let clock = Arc::new(SystemClock::from_offset_minutes(config.utc_offset_minutes));
    let ledger = Ledger::new(store, clock)
        .context("Failed to resume audit sequence")?;

    let state = AppState {
        ledger: Arc::new(ledger),
    };

    let app = Router::new()
        .nest("/api", api_routes(state))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&config.server_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.server_addr))?;

    println!("\n🚀 Server running on http://{}", config.server_addr);
    println!("   API: http://{}/api/entities", config.server_addr);
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}

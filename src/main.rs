//! Parfum Import - bulk CSV/Excel import service for the perfume storefront.

mod config;
mod error;
mod events;
mod executor;
mod export;
mod headers;
mod materialize;
mod normalize;
mod reconcile;
mod retry;
mod schema;
mod sheet_parser;
mod store;
mod supabase;
mod templates;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use config::{ImportProfile, ProfileStore, Settings};
use error::{ImportError, StoreError};
use events::{EventBus, ImportEvent};
use executor::ImportExecutor;
use export::{export_clients, export_filename, export_sales, ExportKind};
use schema::{ImportKind, ImportOutcome, ORDERS_TABLE, USERS_TABLE};
use std::sync::Arc;
use store::{MemoryStore, RowStore};
use supabase::{AuthUser, Credentials, Session, SupabaseClient};
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    store: Arc<dyn RowStore>,
    /// Absent in dry-run mode.
    auth: Option<Arc<SupabaseClient>>,
    profiles: ProfileStore,
    executor: ImportExecutor,
}

type ApiError = (StatusCode, String);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "parfum_import=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::from_env()?;

    // Load column-synonym profiles from filesystem
    let profiles = ProfileStore::load_from_dir(std::path::Path::new(&settings.profiles_dir))?;
    info!(
        "Loaded {} import profiles from {}",
        profiles.all().len(),
        settings.profiles_dir
    );

    let (store, auth) = if settings.dry_run {
        warn!("IMPORT_DRY_RUN is set: imports write to an in-memory store");
        let store: Arc<dyn RowStore> = Arc::new(MemoryStore::with_catalog_constraints());
        (store, None)
    } else {
        let client = Arc::new(SupabaseClient::from_settings(&settings)?);
        info!("Supabase client initialized for {}", settings.supabase_url);
        let store: Arc<dyn RowStore> = client.clone();
        (store, Some(client))
    };

    let events = EventBus::default();
    tokio::spawn(log_events(events.subscribe()));

    let state = AppState {
        executor: ImportExecutor::new(store.clone(), settings.retry_delay_ms).with_events(events),
        store,
        auth,
        profiles,
    };

    // Build router
    let app = Router::new()
        .route("/health", get(health))
        .route("/import/:kind", post(import_file))
        .route("/templates/:kind", get(get_template))
        .route("/export/:kind", get(get_export))
        .route("/profiles", get(list_profiles))
        .route("/profiles/:kind", get(get_profile))
        .route("/auth/sign-in", post(sign_in))
        .route("/auth/sign-up", post(sign_up))
        .route("/auth/sign-out", post(sign_out))
        .route("/auth/session", get(get_session))
        .layer(DefaultBodyLimit::max(20 * 1024 * 1024)) // 20MB
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    // Run server
    let listener = tokio::net::TcpListener::bind(&settings.bind_addr).await?;
    info!("Server listening on http://{}", settings.bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Log every finished import until the bus is dropped.
async fn log_events(mut rx: broadcast::Receiver<ImportEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => info!("Import event: {:?}", event),
            Err(broadcast::error::RecvError::Lagged(n)) => warn!("Event log skipped {} events", n),
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint.
async fn health() -> &'static str {
    "ok"
}

/// Upload a CSV or workbook and import its rows.
async fn import_file(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<ImportOutcome>, ApiError> {
    let kind: ImportKind = kind.parse().map_err(import_error)?;
    let profile = state.profiles.get(kind);

    // Read the uploaded file
    let mut filename = String::new();
    let mut file_data = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        (StatusCode::BAD_REQUEST, format!("Multipart error: {}", e))
    })? {
        if field.name() == Some("file") {
            filename = field.file_name().unwrap_or("import.csv").to_string();
            file_data = field.bytes().await.map_err(|e| {
                (StatusCode::BAD_REQUEST, format!("Failed to read file: {}", e))
            })?.to_vec();
            break;
        }
    }

    if file_data.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "No file uploaded".to_string()));
    }

    info!("Received {} import: {} ({} bytes)", kind, filename, file_data.len());

    let outcome = state
        .executor
        .import_file(&profile, &filename, &file_data)
        .await
        .map_err(import_error)?;
    Ok(Json(outcome))
}

/// Download the CSV template for an import kind.
async fn get_template(Path(kind): Path<String>) -> Result<Response, ApiError> {
    let kind: ImportKind = kind.parse().map_err(import_error)?;
    let body = templates::template(kind).map_err(internal)?;
    Ok(csv_download(&templates::template_filename(kind), body))
}

/// Download a sales or clients report built from the store.
async fn get_export(
    State(state): State<AppState>,
    Path(kind): Path<String>,
) -> Result<Response, ApiError> {
    let kind: ExportKind = kind
        .parse()
        .map_err(|e: anyhow::Error| (StatusCode::BAD_REQUEST, e.to_string()))?;

    let profiles = state
        .store
        .select(USERS_TABLE, &[], "*")
        .await
        .map_err(store_error)?;
    let body = match kind {
        ExportKind::Sales => {
            let orders = state
                .store
                .select(ORDERS_TABLE, &[], "*")
                .await
                .map_err(store_error)?;
            export_sales(&orders, &profiles)
        }
        ExportKind::Clients => export_clients(&profiles),
    }
    .map_err(internal)?;

    Ok(csv_download(&export_filename(kind, &schema::today_iso()), body))
}

/// List the column-synonym profiles in use.
async fn list_profiles(State(state): State<AppState>) -> Json<Vec<ImportProfile>> {
    Json(state.profiles.all())
}

async fn get_profile(
    State(state): State<AppState>,
    Path(kind): Path<String>,
) -> Result<Json<ImportProfile>, ApiError> {
    let kind: ImportKind = kind.parse().map_err(import_error)?;
    Ok(Json(state.profiles.get(kind)))
}

async fn sign_in(
    State(state): State<AppState>,
    Json(credentials): Json<Credentials>,
) -> Result<Json<Session>, ApiError> {
    let auth = auth_client(&state)?;
    auth.sign_in(&credentials).await.map(Json).map_err(store_error)
}

async fn sign_up(
    State(state): State<AppState>,
    Json(credentials): Json<Credentials>,
) -> Result<Json<Session>, ApiError> {
    let auth = auth_client(&state)?;
    auth.sign_up(&credentials).await.map(Json).map_err(store_error)
}

async fn sign_out(State(state): State<AppState>, headers: HeaderMap) -> Result<StatusCode, ApiError> {
    let auth = auth_client(&state)?;
    let token = bearer_token(&headers)?;
    auth.sign_out(token).await.map_err(store_error)?;
    Ok(StatusCode::NO_CONTENT)
}

/// The user behind the bearer token, or 401 if the session has expired.
async fn get_session(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<AuthUser>, ApiError> {
    let auth = auth_client(&state)?;
    let token = bearer_token(&headers)?;
    auth.get_session(token)
        .await
        .map_err(store_error)?
        .map(Json)
        .ok_or((StatusCode::UNAUTHORIZED, "Session expired".to_string()))
}

// ============================================================================
// Helper functions
// ============================================================================

fn auth_client(state: &AppState) -> Result<&SupabaseClient, ApiError> {
    state.auth.as_deref().ok_or((
        StatusCode::SERVICE_UNAVAILABLE,
        "Authentication is disabled in dry-run mode".to_string(),
    ))
}

fn bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|t| !t.is_empty())
        .ok_or((StatusCode::UNAUTHORIZED, "Missing bearer token".to_string()))
}

fn csv_download(filename: &str, body: String) -> Response {
    (
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        body,
    )
        .into_response()
}

fn import_error(e: ImportError) -> ApiError {
    match e {
        ImportError::Index(e) => {
            error!("Import aborted: {}", e);
            let status = if e.is_transient() {
                StatusCode::SERVICE_UNAVAILABLE
            } else {
                StatusCode::BAD_GATEWAY
            };
            (status, format!("Import aborted: {}", e))
        }
        other => (StatusCode::BAD_REQUEST, other.to_string()),
    }
}

fn store_error(e: StoreError) -> ApiError {
    match e {
        StoreError::Rejected { status, message } if (400..500).contains(&status) => (
            StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_REQUEST),
            message,
        ),
        StoreError::UniqueViolation { message } => (StatusCode::CONFLICT, message),
        other if other.is_transient() => {
            warn!("Store temporarily unavailable: {}", other);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                format!("Store temporarily unavailable: {}", other),
            )
        }
        other => {
            error!("Store request failed: {}", other);
            (StatusCode::BAD_GATEWAY, other.to_string())
        }
    }
}

fn internal(e: anyhow::Error) -> ApiError {
    error!("{:#}", e);
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

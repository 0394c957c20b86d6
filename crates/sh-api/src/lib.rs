//! REST API
//!
//! Exposes entity states, services, config entries and the setup/options
//! flows over HTTP using axum.

mod config_flow;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Serialize;
use sh_components::HomeAssistant;
use sh_config_entries::{ConfigEntry, ConfigEntrySource, ConfigEntryState};
use sh_core::Context;
use sh_service_registry::ServiceError;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub hass: Arc<HomeAssistant>,
}

impl AppState {
    pub fn new(hass: Arc<HomeAssistant>) -> Self {
        Self { hass }
    }
}

/// API status response
#[derive(Serialize)]
struct ApiStatus {
    message: &'static str,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub message: String,
}

pub(crate) type ApiError = (StatusCode, Json<ErrorResponse>);
pub(crate) type ApiResult<T> = Result<Json<T>, ApiError>;

pub(crate) fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            message: message.into(),
        }),
    )
}

/// Services of one domain
#[derive(Serialize)]
pub struct ServiceResponse {
    pub domain: String,
    pub services: BTreeMap<String, ServiceDescription>,
}

#[derive(Serialize)]
pub struct ServiceDescription {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub fields: serde_json::Value,
}

/// Config entry as listed by the API; stored field values are left out
#[derive(Serialize)]
pub struct ConfigEntryResponse {
    pub entry_id: String,
    pub domain: String,
    pub title: String,
    pub source: ConfigEntrySource,
    pub state: ConfigEntryState,
    pub reason: Option<String>,
}

impl From<&ConfigEntry> for ConfigEntryResponse {
    fn from(entry: &ConfigEntry) -> Self {
        Self {
            entry_id: entry.entry_id.clone(),
            domain: entry.domain.clone(),
            title: entry.title.clone(),
            source: entry.source,
            state: entry.state,
            reason: entry.reason.clone(),
        }
    }
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Status endpoints
        .route("/api/", get(api_status))
        .route("/api/health", get(health_check))
        // State endpoints
        .route("/api/states", get(get_states))
        .route("/api/states/:entity_id", get(get_state))
        // Service endpoints
        .route("/api/services", get(get_services))
        .route("/api/services/:domain/:service", post(call_service))
        // Config entries
        .route("/api/config/config_entries/entry", get(get_config_entries))
        .route(
            "/api/config/config_entries/entry/:entry_id",
            delete(delete_config_entry),
        )
        // Config flows
        .route(
            "/api/config/config_entries/flow",
            post(config_flow::start_config_flow),
        )
        .route(
            "/api/config/config_entries/flow/:flow_id",
            get(config_flow::get_flow)
                .post(config_flow::progress_flow)
                .delete(config_flow::abort_flow),
        )
        // Options flows
        .route(
            "/api/config/config_entries/options/flow",
            post(config_flow::start_options_flow),
        )
        .route(
            "/api/config/config_entries/options/flow/:flow_id",
            get(config_flow::get_flow)
                .post(config_flow::progress_flow)
                .delete(config_flow::abort_flow),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Start the API server; runs until `shutdown` resolves
pub async fn start_server(
    state: AppState,
    addr: &str,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let router = create_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("API server listening on {}", addr);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}

// ==================== Handlers ====================

/// GET /api/ - Returns API status
async fn api_status() -> Json<ApiStatus> {
    Json(ApiStatus {
        message: "API running.",
    })
}

/// GET /api/health - Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

/// GET /api/states - Returns all entity states
async fn get_states(State(state): State<AppState>) -> Json<Vec<sh_core::State>> {
    let mut states = state.hass.states.all();
    states.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
    Json(states)
}

/// GET /api/states/{entity_id} - Returns a single entity state
async fn get_state(
    State(state): State<AppState>,
    Path(entity_id): Path<String>,
) -> ApiResult<sh_core::State> {
    state
        .hass
        .states
        .get(&entity_id)
        .map(Json)
        .ok_or_else(|| {
            api_error(
                StatusCode::NOT_FOUND,
                format!("Entity not found: {}", entity_id),
            )
        })
}

/// GET /api/services - Returns available services
async fn get_services(State(state): State<AppState>) -> Json<Vec<ServiceResponse>> {
    let mut responses: Vec<ServiceResponse> = state
        .hass
        .services
        .all_services()
        .into_iter()
        .map(|(domain, descriptions)| ServiceResponse {
            domain,
            services: descriptions
                .into_iter()
                .map(|desc| {
                    (
                        desc.service,
                        ServiceDescription {
                            name: desc.name,
                            description: desc.description,
                            fields: desc.fields.unwrap_or_else(|| serde_json::json!({})),
                        },
                    )
                })
                .collect(),
        })
        .collect();
    responses.sort_by(|a, b| a.domain.cmp(&b.domain));
    Json(responses)
}

/// POST /api/services/{domain}/{service} - Calls a service
///
/// An empty body calls the service without data.
async fn call_service(
    State(state): State<AppState>,
    Path((domain, service)): Path<(String, String)>,
    body: Option<Json<serde_json::Value>>,
) -> ApiResult<Vec<sh_core::State>> {
    let service_data = body
        .map(|Json(v)| v)
        .unwrap_or_else(|| serde_json::json!({}));
    if !service_data.is_object() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "Service data must be a JSON object",
        ));
    }

    match state
        .hass
        .services
        .call(&domain, &service, service_data, Context::new())
        .await
    {
        // No response payload, matching the host's empty list
        Ok(()) => Ok(Json(vec![])),
        Err(err @ ServiceError::CallFailed(_)) => {
            warn!("Service {}.{} failed: {}", domain, service, err);
            Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))
        }
        Err(err) => Err(api_error(StatusCode::BAD_REQUEST, err.to_string())),
    }
}

/// GET /api/config/config_entries/entry - Lists config entries
async fn get_config_entries(State(state): State<AppState>) -> Json<Vec<ConfigEntryResponse>> {
    let mut entries = state.hass.config_entries.all();
    entries.sort_by_key(|e| e.created_at);
    Json(entries.iter().map(ConfigEntryResponse::from).collect())
}

/// DELETE /api/config/config_entries/entry/{entry_id} - Removes a config entry
async fn delete_config_entry(
    State(state): State<AppState>,
    Path(entry_id): Path<String>,
) -> ApiResult<HashMap<&'static str, bool>> {
    info!("HTTP DELETE config entry: {}", entry_id);

    match state.hass.config_entries.remove(&entry_id).await {
        Ok(_) => Ok(Json(HashMap::from([("require_restart", false)]))),
        Err(err) => {
            warn!("Failed to delete config entry {}: {}", entry_id, err);
            Err(api_error(
                StatusCode::NOT_FOUND,
                format!("Invalid entry specified: {}", entry_id),
            ))
        }
    }
}

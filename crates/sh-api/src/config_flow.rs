//! Config and options flow endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use sh_config_entries::{FlowError, FlowResult};
use tracing::{info, warn};

use crate::{api_error, ApiError, ApiResult, AppState};

/// Body of a flow start request; `handler` is a domain or, for options flows, an entry id
#[derive(Debug, Deserialize)]
pub struct StartFlowRequest {
    pub handler: String,
}

fn flow_error(err: FlowError) -> ApiError {
    match err {
        FlowError::UnknownHandler(_) => api_error(
            StatusCode::NOT_FOUND,
            format!("Invalid handler specified: {}", err),
        ),
        FlowError::UnknownFlow(_) | FlowError::UnknownEntry(_) => {
            api_error(StatusCode::NOT_FOUND, err.to_string())
        }
        FlowError::InvalidInput(_) => api_error(StatusCode::BAD_REQUEST, err.to_string()),
        FlowError::ConfigEntries(_) => {
            warn!("Flow failed: {}", err);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

/// POST /api/config/config_entries/flow
pub(crate) async fn start_config_flow(
    State(state): State<AppState>,
    Json(request): Json<StartFlowRequest>,
) -> ApiResult<FlowResult> {
    info!("HTTP POST start config flow for handler: {}", request.handler);
    state
        .hass
        .flows
        .start_config_flow(&request.handler)
        .map(Json)
        .map_err(flow_error)
}

/// POST /api/config/config_entries/options/flow
pub(crate) async fn start_options_flow(
    State(state): State<AppState>,
    Json(request): Json<StartFlowRequest>,
) -> ApiResult<FlowResult> {
    info!("HTTP POST start options flow for entry: {}", request.handler);
    state
        .hass
        .flows
        .start_options_flow(&request.handler)
        .map(Json)
        .map_err(flow_error)
}

/// GET .../flow/{flow_id} - Current form of a flow
pub(crate) async fn get_flow(
    State(state): State<AppState>,
    Path(flow_id): Path<String>,
) -> ApiResult<FlowResult> {
    state.hass.flows.get(&flow_id).map(Json).map_err(flow_error)
}

/// POST .../flow/{flow_id} - Submit user input
pub(crate) async fn progress_flow(
    State(state): State<AppState>,
    Path(flow_id): Path<String>,
    Json(user_input): Json<serde_json::Value>,
) -> ApiResult<FlowResult> {
    info!("HTTP POST progress flow: {}", flow_id);
    state
        .hass
        .flows
        .progress(&flow_id, user_input)
        .await
        .map(Json)
        .map_err(flow_error)
}

/// DELETE .../flow/{flow_id} - Abort a flow
pub(crate) async fn abort_flow(
    State(state): State<AppState>,
    Path(flow_id): Path<String>,
) -> ApiResult<serde_json::Value> {
    state.hass.flows.abort(&flow_id).map_err(flow_error)?;
    Ok(Json(serde_json::json!({"message": "Flow aborted"})))
}

#[cfg(test)]
mod tests {
    use crate::tests::{add_subscription, create_test_state, send};
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    #[tokio::test]
    async fn test_config_flow_over_http() {
        let state = create_test_state();

        let (status, form) = send(
            &state,
            Method::POST,
            "/api/config/config_entries/flow",
            Some(json!({"handler": "subscription_helper"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(form["type"], "form");
        assert_eq!(form["step_id"], "user");
        assert_eq!(form["data_schema"][0]["name"], "subscription_name");

        let uri = format!(
            "/api/config/config_entries/flow/{}",
            form["flow_id"].as_str().unwrap()
        );
        let (status, again) = send(&state, Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(again["flow_id"], form["flow_id"]);

        let (status, retry) = send(
            &state,
            Method::POST,
            &uri,
            Some(json!({"subscription_name": "Netflix", "end_date": "soon"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(retry["type"], "form");
        assert_eq!(retry["errors"]["end_date"], "invalid_date");

        let (status, done) = send(
            &state,
            Method::POST,
            &uri,
            Some(json!({"subscription_name": "Netflix", "end_date": "2026-10-16"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(done["type"], "create_entry");
        assert_eq!(done["title"], "Netflix");
        assert_eq!(
            state.hass.states.get("sensor.netflix_days_remaining").unwrap().state,
            "0"
        );

        // Finished flows are gone
        let (status, _) = send(&state, Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unknown_handler() {
        let state = create_test_state();
        let (status, body) = send(
            &state,
            Method::POST,
            "/api/config/config_entries/flow",
            Some(json!({"handler": "nope"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["message"].as_str().unwrap().contains("nope"));
    }

    #[tokio::test]
    async fn test_abort_flow() {
        let state = create_test_state();
        let (_, form) = send(
            &state,
            Method::POST,
            "/api/config/config_entries/flow",
            Some(json!({"handler": "subscription_helper"})),
        )
        .await;
        let uri = format!(
            "/api/config/config_entries/flow/{}",
            form["flow_id"].as_str().unwrap()
        );

        let (status, _) = send(&state, Method::DELETE, &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&state, Method::DELETE, &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_options_flow_over_http() {
        let state = create_test_state();
        let entry_id = add_subscription(
            &state,
            json!({"subscription_name": "Netflix", "provider": "Netflix Inc"}),
        )
        .await;

        let (status, form) = send(
            &state,
            Method::POST,
            "/api/config/config_entries/options/flow",
            Some(json!({"handler": entry_id})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(form["step_id"], "init");
        assert_eq!(form["handler"], entry_id.as_str());

        let provider = form["data_schema"]
            .as_array()
            .unwrap()
            .iter()
            .find(|f| f["name"] == "provider")
            .unwrap();
        assert_eq!(provider["description"]["suggested_value"], "Netflix Inc");

        let uri = format!(
            "/api/config/config_entries/options/flow/{}",
            form["flow_id"].as_str().unwrap()
        );
        let (status, done) = send(
            &state,
            Method::POST,
            &uri,
            Some(json!({"provider": "Netflix BV", "renewal_period": "monthly"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(done["type"], "create_entry");

        let entry = state.hass.config_entries.get(&entry_id).unwrap();
        assert_eq!(entry.options["provider"], "Netflix BV");
        let status = state.hass.states.get("sensor.netflix_status").unwrap();
        assert_eq!(status.attribute::<String>("renewal_period").as_deref(), Some("monthly"));
    }

    #[tokio::test]
    async fn test_options_flow_unknown_entry() {
        let state = create_test_state();
        let (status, _) = send(
            &state,
            Method::POST,
            "/api/config/config_entries/options/flow",
            Some(json!({"handler": "01UNKNOWN"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}

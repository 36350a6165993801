//! Axum routes for the northbound HTTP interface (spec §4.7).

use std::{sync::Arc, time::Duration};

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use gateway_core::{GatewayState, router};
use registry::{Error as RegistryError, FindDeviceQuery, PrincipalKind};
use serde::{Deserialize, Serialize};
use serde_json::json;

pub fn build_router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/register/user", post(register_user))
        .route("/provision/mediator", post(provision_mediator))
        .route("/provision/client", post(provision_client))
        .route("/provision/device", post(provision_device))
        .route("/oic/sec/account", post(register_account).delete(delete_account))
        .route("/oic/sec/tokenrefresh", post(token_refresh))
        .route("/oic/res", get(find_resources))
        .route("/{device_uuid}/{*href}", post(forward_to_device))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

fn bearer(headers: &HeaderMap) -> Result<&str, Response> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| api_error(RegistryError::Unauthorized("missing bearer token".into())))
}

fn api_error(err: RegistryError) -> Response {
    let (status, message) = match &err {
        RegistryError::NotFound => (StatusCode::NOT_FOUND, err.to_string()),
        RegistryError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, err.to_string()),
        RegistryError::Forbidden(_) => (StatusCode::FORBIDDEN, err.to_string()),
        RegistryError::Conflict(_) => (StatusCode::CONFLICT, err.to_string()),
        RegistryError::BadInput(_) => (StatusCode::BAD_REQUEST, err.to_string()),
        RegistryError::Unsupported(_) => (StatusCode::UNSUPPORTED_MEDIA_TYPE, err.to_string()),
        RegistryError::Transient(_) | RegistryError::Fatal(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    };
    (status, Json(json!({ "error": message }))).into_response()
}

#[derive(Deserialize)]
struct RegisterUserRequest {
    username: String,
    #[serde(default = "default_auth_provider")]
    authprovider: String,
}

fn default_auth_provider() -> String {
    "local".to_string()
}

#[derive(Serialize)]
struct TokenResponse {
    token: String,
}

async fn register_user(
    State(state): State<Arc<GatewayState>>,
    Json(body): Json<RegisterUserRequest>,
) -> Response {
    match state.registry.register_user(&body.username, &body.authprovider).await {
        Ok(token) => Json(TokenResponse { token }).into_response(),
        Err(err) => api_error(err),
    }
}

#[derive(Deserialize)]
struct ProvisionMediatorRequest {
    username: String,
    #[serde(rename = "usertoken")]
    user_token: String,
}

async fn provision_mediator(
    State(state): State<Arc<GatewayState>>,
    Json(body): Json<ProvisionMediatorRequest>,
) -> Response {
    match state.registry.provision_mediator(&body.username, &body.user_token).await {
        Ok(token) => Json(TokenResponse { token }).into_response(),
        Err(err) => api_error(err),
    }
}

#[derive(Deserialize)]
struct ProvisionPrincipalRequest {
    uuid: String,
}

async fn provision_client(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Json(body): Json<ProvisionPrincipalRequest>,
) -> Response {
    provision_principal(state, headers, PrincipalKind::Client, body).await
}

async fn provision_device(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Json(body): Json<ProvisionPrincipalRequest>,
) -> Response {
    provision_principal(state, headers, PrincipalKind::Device, body).await
}

async fn provision_principal(
    state: Arc<GatewayState>,
    headers: HeaderMap,
    kind: PrincipalKind,
    body: ProvisionPrincipalRequest,
) -> Response {
    let mediator_token = match bearer(&headers) {
        Ok(token) => token,
        Err(response) => return response,
    };

    match state.registry.provision_principal(kind, &body.uuid, mediator_token).await {
        Ok(token) => Json(TokenResponse { token }).into_response(),
        Err(err) => api_error(err),
    }
}

#[derive(Deserialize)]
struct AccountRequest {
    di: String,
    accesstoken: String,
}

#[derive(Serialize)]
struct AccountResponse {
    accesstoken: String,
    uid: String,
    refreshtoken: String,
    expiresin: u64,
}

async fn register_account(
    State(state): State<Arc<GatewayState>>,
    Json(body): Json<AccountRequest>,
) -> Response {
    match state.registry.register_principal(PrincipalKind::Client, &body.di, &body.accesstoken).await {
        Ok(grant) => Json(AccountResponse {
            accesstoken: grant.access_token,
            uid: grant.user_id,
            refreshtoken: grant.refresh_token,
            expiresin: grant.ttl_secs,
        })
        .into_response(),
        Err(err) => api_error(err),
    }
}

async fn delete_account(State(state): State<Arc<GatewayState>>, headers: HeaderMap) -> Response {
    let token = match bearer(&headers) {
        Ok(token) => token,
        Err(response) => return response,
    };
    let client_id = match headers.get("x-client-uuid").and_then(|v| v.to_str().ok()) {
        Some(id) => id,
        None => return api_error(RegistryError::BadInput("missing X-Client-UUID".into())),
    };

    match state.registry.delete_principal(PrincipalKind::Client, client_id, token).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => api_error(err),
    }
}

#[derive(Deserialize)]
struct TokenRefreshRequest {
    di: String,
    uid: String,
    refreshtoken: String,
}

#[derive(Serialize)]
struct TokenRefreshResponse {
    accesstoken: String,
    refreshtoken: String,
    expiresin: u64,
}

async fn token_refresh(
    State(state): State<Arc<GatewayState>>,
    Json(body): Json<TokenRefreshRequest>,
) -> Response {
    match state.registry.refresh_token(PrincipalKind::Client, &body.di, &body.uid, &body.refreshtoken).await {
        Ok(grant) => Json(TokenRefreshResponse {
            accesstoken: grant.access_token,
            refreshtoken: grant.refresh_token,
            expiresin: grant.ttl_secs,
        })
        .into_response(),
        Err(err) => api_error(err),
    }
}

async fn find_resources(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    axum::extract::Query(query): axum::extract::Query<FindDeviceQuery>,
) -> Response {
    if let Err(response) = bearer(&headers) {
        return response;
    }
    let user_id = match headers.get("x-user-id").and_then(|v| v.to_str().ok()) {
        Some(id) => id,
        None => return api_error(RegistryError::BadInput("missing X-User-Id".into())),
    };

    match state.registry.find_device(user_id, &query).await {
        Ok(links) => Json(links).into_response(),
        Err(err) => api_error(err),
    }
}

/// `POST /:deviceUUID/:href` — the Request Router's HTTP face (spec §4.8).
async fn forward_to_device(
    State(state): State<Arc<GatewayState>>,
    Path((device_uuid, href)): Path<(String, String)>,
    body: bytes::Bytes,
) -> Response {
    let href = format!("/{href}");
    let deadline = Duration::from_secs(5);

    match router::resolve_pod(
        state.routing_cache.as_ref(),
        state.pod_addressing.as_ref(),
        &device_uuid,
        &state.self_pod_addr,
    )
    .await
    {
        Ok(None) => match router::route_locally(&state.sessions, &device_uuid, &href, &body, deadline).await {
            Ok(payload) => payload.to_vec().into_response(),
            Err(router::RouteError::LocalSessionMissing) => StatusCode::NOT_FOUND.into_response(),
            Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        },
        Ok(Some(url)) => forward_remote(&url, &device_uuid, &href, body).await,
        Err(router::RouteError::DeviceOffline) => StatusCode::NOT_FOUND.into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

async fn forward_remote(pod_url: &str, device_uuid: &str, href: &str, body: bytes::Bytes) -> Response {
    let client = reqwest::Client::new();
    let url = format!("{pod_url}/{device_uuid}{href}");

    match client.post(&url).body(body).timeout(Duration::from_secs(5)).send().await {
        Ok(response) if response.status().is_success() => match response.bytes().await {
            Ok(bytes) => bytes.to_vec().into_response(),
            Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        },
        Ok(response) if response.status() == StatusCode::NOT_FOUND => StatusCode::NOT_FOUND.into_response(),
        _ => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

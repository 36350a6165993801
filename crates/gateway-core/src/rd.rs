//! CoAP endpoint logic for the resource directory (spec §4.6): `/oic/rd`,
//! `/oic/sec/account`, `/oic/sec/session`, `/oic/sec/tokenrefresh`.
//!
//! Each handler takes already-decoded request fields (entry validation —
//! content-format and method checks — happens in the transport layer
//! before these are called) and returns a [`RdResponse`] the caller
//! CBOR-encodes onto the wire.

use std::net::SocketAddr;

use registry::{PrincipalKind, Registry};
use wire::{
    cbor::{self, AccountRequest, AccountResponse, Link, RdPayload, SessionRequest, SessionResponse,
        TokenRefreshRequest, TokenRefreshResponse},
    code::Code,
};

use crate::session_container::SessionContainer;

#[derive(Debug)]
pub struct RdResponse {
    pub code: Code,
    pub payload: Vec<u8>,
}

impl RdResponse {
    fn empty(code: Code) -> Self {
        Self { code, payload: Vec::new() }
    }

    fn cbor<T: serde::Serialize>(code: Code, value: &T) -> Result<Self, RdError> {
        Ok(Self { code, payload: cbor::encode(value).map_err(|e| RdError::Internal(e.to_string()))? })
    }
}

#[derive(Debug)]
pub enum RdError {
    BadRequest,
    Unauthorized,
    InternalServerError(String),
    Internal(String),
}

impl RdError {
    pub fn code(&self) -> Code {
        match self {
            RdError::BadRequest => Code::BadRequest,
            RdError::Unauthorized => Code::Unauthorized,
            RdError::InternalServerError(_) | RdError::Internal(_) => Code::InternalServerError,
        }
    }
}

/// `POST /oic/rd`. Parses the CBOR payload, publishes every link against
/// the session, and on success echoes the links back with `ins` filled in.
/// Any per-link failure aborts the whole request with `BadRequest` and
/// commits nothing from *this* request (already-published links from
/// earlier requests are untouched).
pub async fn publish(
    session: &crate::session::Session,
    body: &[u8],
) -> Result<RdResponse, RdError> {
    let payload: RdPayload = cbor::decode(body).map_err(|_| RdError::BadRequest)?;
    if payload.di.is_empty() || payload.links.is_empty() {
        return Err(RdError::BadRequest);
    }

    let mut published_ins = Vec::with_capacity(payload.links.len());
    let mut echo_links = Vec::with_capacity(payload.links.len());

    for link in &payload.links {
        if link.href.is_empty() {
            rollback(session, &payload.di, &published_ins).await;
            return Err(RdError::BadRequest);
        }

        let observable = link.p.as_ref().is_some_and(|p| p.is_observable());
        let ins_id = match session.publish_resource(&payload.di, &link.href, observable).await {
            Ok(ins_id) => ins_id,
            Err(_) => {
                rollback(session, &payload.di, &published_ins).await;
                return Err(RdError::BadRequest);
            }
        };

        published_ins.push(ins_id);
        echo_links.push(Link { href: link.href.clone(), p: link.p.clone(), ins: Some(ins_id), extra: link.extra.clone() });
    }

    RdResponse::cbor(Code::Changed, &RdPayload { di: payload.di, links: echo_links })
        .map_err(|e| RdError::Internal(format!("{e:?}")))
}

/// Undoes a partially-applied publish before surfacing the request-level
/// `BadRequest` (spec §4.6: "no partial publication committed by this
/// request survives the failure").
async fn rollback(session: &crate::session::Session, device_id: &str, ins_ids: &[u64]) {
    if !ins_ids.is_empty() {
        let _ = session.unpublish_resource(device_id, ins_ids);
    }
}

/// `DELETE /oic/rd?di=<uuid>&ins=<int>...`.
pub fn unpublish(session: &crate::session::Session, device_id: &str, ins_ids: &[u64]) -> RdResponse {
    match session.unpublish_resource(device_id, ins_ids) {
        Ok(()) => RdResponse::empty(Code::Deleted),
        Err(_missing) => RdResponse::empty(Code::BadRequest),
    }
}

/// `POST /oic/sec/account` (southbound device registration).
pub async fn register_device(registry: &dyn Registry, body: &[u8]) -> Result<RdResponse, RdError> {
    let request: AccountRequest = cbor::decode(body).map_err(|_| RdError::BadRequest)?;
    if request.di.is_empty() || request.accesstoken.is_empty() {
        return Err(RdError::Unauthorized);
    }

    let grant = registry
        .register_principal(PrincipalKind::Device, &request.di, &request.accesstoken)
        .await
        .map_err(map_registry_error)?;

    RdResponse::cbor(
        Code::Created,
        &AccountResponse {
            accesstoken: grant.access_token,
            uid: grant.user_id,
            refreshtoken: grant.refresh_token,
            expiresin: grant.ttl_secs,
        },
    )
    .map_err(|e| RdError::Internal(format!("{e:?}")))
}

/// `POST /oic/sec/session` (login/logout). On login, binds the device to
/// this connection's session in the container so the Request Router can
/// find it later.
pub async fn session(
    registry: &dyn Registry,
    container: &SessionContainer,
    peer_address: SocketAddr,
    pod_addr: &str,
    body: &[u8],
) -> Result<RdResponse, RdError> {
    let request: SessionRequest = cbor::decode(body).map_err(|_| RdError::BadRequest)?;

    let ttl = registry
        .update_session(&request.di, &request.uid, &request.accesstoken, pod_addr, request.login)
        .await
        .map_err(map_registry_error)?;

    if request.login {
        if let Some(active) = container.find(&peer_address) {
            active.set_device_id(request.di.clone());
            container.bind_device(&request.di, peer_address);
        }
        RdResponse::cbor(Code::Created, &SessionResponse { expiresin: ttl })
            .map_err(|e| RdError::Internal(format!("{e:?}")))
    } else {
        Ok(RdResponse::empty(Code::Changed))
    }
}

/// `POST /oic/sec/tokenrefresh`.
pub async fn token_refresh(registry: &dyn Registry, body: &[u8]) -> Result<RdResponse, RdError> {
    let request: TokenRefreshRequest = cbor::decode(body).map_err(|_| RdError::BadRequest)?;
    if request.di.is_empty() || request.uid.is_empty() || request.refreshtoken.is_empty() {
        return Err(RdError::Unauthorized);
    }

    let grant = registry
        .refresh_token(PrincipalKind::Device, &request.di, &request.uid, &request.refreshtoken)
        .await
        .map_err(map_registry_error)?;

    RdResponse::cbor(
        Code::Created,
        &TokenRefreshResponse {
            accesstoken: grant.access_token,
            refreshtoken: grant.refresh_token,
            expiresin: grant.ttl_secs,
        },
    )
    .map_err(|e| RdError::Internal(format!("{e:?}")))
}

fn map_registry_error(err: registry::Error) -> RdError {
    match err {
        registry::Error::NotFound => RdError::BadRequest,
        registry::Error::Unauthorized(_) => RdError::Unauthorized,
        other => RdError::InternalServerError(other.to_string()),
    }
}


//! TCP/TLS accept loop and per-connection request dispatch (spec §4.6,
//! §5). Each accepted connection owns a [`gateway_core::Session`] and its
//! Keepalive on an independent task; inbound CoAP requests from the device
//! are read off [`crate::link::TcpDeviceLink`]'s inbound channel and
//! answered with the Resource Directory Handlers in `gateway_core::rd`.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};
use bytes::Bytes;
use gateway_core::{GatewayState, Session, router};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use wire::{
    code::{Code, ContentFormat},
    message::Message,
};

use crate::{config::Network, link::TcpDeviceLink, observer::Observer};

pub async fn run(
    state: Arc<GatewayState>,
    address: SocketAddr,
    network: Network,
    tls_acceptor: Option<TlsAcceptor>,
    observer: Observer,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(address).await?;
    log::info!("coap gateway listening on {address} ({network:?})");

    loop {
        let (stream, peer_address) = listener.accept().await?;
        let state = state.clone();
        let tls_acceptor = tls_acceptor.clone();
        let observer = observer.clone();

        tokio::spawn(async move {
            let result = match tls_acceptor {
                Some(acceptor) => match acceptor.accept(stream).await {
                    Ok(tls_stream) => {
                        handle_connection(state.clone(), peer_address, tls_stream, observer.clone()).await
                    }
                    Err(err) => {
                        log::warn!("tls handshake failed for {peer_address}: {err}");
                        return;
                    }
                },
                None => handle_connection(state.clone(), peer_address, stream, observer.clone()).await,
            };

            if let Err(err) = result {
                log::warn!("connection {peer_address} ended: {err}");
            }

            state.sessions.close(&peer_address).await;
            observer.session_closed(peer_address);
        });
    }
}

async fn handle_connection<S>(
    state: Arc<GatewayState>,
    peer_address: SocketAddr,
    stream: S,
    observer: Observer,
) -> anyhow::Result<()>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let (link, mut inbound) = TcpDeviceLink::spawn(Box::new(read_half), Box::new(write_half));

    let session = state.sessions.open(peer_address, Arc::new(link.clone()), state.keepalive);
    observer.session_opened(peer_address);

    while let Some(request) = inbound.recv().await {
        let token = request.token.clone();
        let response = dispatch(&state, &session, peer_address, request, &observer).await;
        let _ = link.respond(response.with_token(token)).await;
    }

    Ok(())
}

async fn dispatch(
    state: &GatewayState,
    session: &Session,
    peer_address: SocketAddr,
    request: Message,
    observer: &Observer,
) -> Message {
    if let Some(rejection) = validate_entry(&request) {
        return Message::new(rejection);
    }

    let device_id = session.device_id();
    let path = request.options.path();
    let result = match (path.as_str(), request.code) {
        ("/oic/rd", Code::Post) => match gateway_core::rd::publish(session, &request.payload).await {
            Ok(response) => {
                if let Some(device_id) = &device_id {
                    observer.resource_published(device_id, &path);
                }
                Ok((response.code, response.payload))
            }
            Err(err) => {
                if let Some(device_id) = &device_id {
                    observer.resource_publish_rejected(device_id);
                }
                Err(err)
            }
        },
        ("/oic/rd", Code::Delete) => {
            let queries = request.options.queries();
            let device_id =
                queries.iter().find(|(k, _)| k == "di").map(|(_, v)| v.clone()).unwrap_or_default();
            let ins_ids: Vec<u64> = queries
                .iter()
                .filter(|(k, _)| k == "ins")
                .filter_map(|(_, v)| v.parse().ok())
                .collect();
            let response = gateway_core::rd::unpublish(session, &device_id, &ins_ids);
            Ok((response.code, response.payload))
        }
        ("/oic/sec/account", Code::Post) => {
            gateway_core::rd::register_device(state.registry.as_ref(), &request.payload)
                .await
                .map(|r| (r.code, r.payload))
        }
        ("/oic/sec/session", Code::Post) => {
            match gateway_core::rd::session(
                state.registry.as_ref(),
                &state.sessions,
                peer_address,
                &state.self_pod_addr,
                &request.payload,
            )
            .await
            {
                Ok(response) => {
                    if let Some(device_id) = session.device_id() {
                        match response.code {
                            Code::Created => observer.session_login(&device_id, peer_address),
                            _ => observer.session_logout(&device_id),
                        }
                    }
                    Ok((response.code, response.payload))
                }
                Err(err) => Err(err),
            }
        }
        ("/oic/sec/tokenrefresh", Code::Post) => {
            gateway_core::rd::token_refresh(state.registry.as_ref(), &request.payload)
                .await
                .map(|r| (r.code, r.payload))
        }
        _ => return Message::new(Code::NotFound),
    };

    match result {
        Ok((code, payload)) => Message::new(code).with_payload(Bytes::from(payload)),
        Err(err) => Message::new(err.code()),
    }
}

/// Entry validation applied before every handler (spec §4.6): method must
/// be a request method, and a present Content-Format must be supported
/// CBOR. Returns `Some(rejection code)` when the request is invalid.
fn validate_entry(request: &Message) -> Option<Code> {
    if !request.code.is_request() {
        return Some(Code::MethodNotAllowed);
    }

    if let Some(format) = request.options.content_format() {
        if !ContentFormat::from(format).is_supported_cbor() {
            return Some(Code::UnsupportedContentFormat);
        }
    }

    None
}

/// Builds the mutual-TLS acceptor when the configured network is
/// `tcp-tls`; `None` for plain `tcp`.
pub fn build_acceptor(
    network: Network,
    certificate: Option<&str>,
    certificate_key: Option<&str>,
    ca_pool: Option<&str>,
) -> anyhow::Result<Option<TlsAcceptor>> {
    match network {
        Network::Tcp => Ok(None),
        Network::TcpTls => {
            let (certificate, certificate_key, ca_pool) = (
                certificate.ok_or_else(|| anyhow::anyhow!("NETWORK=tcp-tls requires TLS_CERTIFICATE"))?,
                certificate_key
                    .ok_or_else(|| anyhow::anyhow!("NETWORK=tcp-tls requires TLS_CERTIFICATE_KEY"))?,
                ca_pool.ok_or_else(|| anyhow::anyhow!("NETWORK=tcp-tls requires TLS_CA_POOL"))?,
            );
            let config = crate::tls::server_config(certificate, certificate_key, ca_pool)?;
            Ok(Some(TlsAcceptor::from(config)))
        }
    }
}

/// The pod-local HTTP face the Request Router's remote-forward branch
/// targets (spec §4.8 step 3): runs alongside the CoAP accept loop and
/// answers a forwarded request by dispatching it against this pod's own
/// `SessionContainer` — this is "the pod that owns the session" the
/// Request Router forwards to.
pub async fn run_http(state: Arc<GatewayState>, address: SocketAddr) -> anyhow::Result<()> {
    let app = Router::new().route("/{device_uuid}/{*href}", post(forward_to_local_session)).with_state(state);

    let listener = TcpListener::bind(address).await?;
    log::info!("request router HTTP listener on {address}");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn forward_to_local_session(
    State(state): State<Arc<GatewayState>>,
    Path((device_uuid, href)): Path<(String, String)>,
    body: Bytes,
) -> Response {
    let href = format!("/{href}");
    let deadline = Duration::from_secs(5);

    match router::route_locally(&state.sessions, &device_uuid, &href, &body, deadline).await {
        Ok(payload) => payload.to_vec().into_response(),
        Err(router::RouteError::LocalSessionMissing) => StatusCode::NOT_FOUND.into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

/// Supplemental feature (§11): periodic debug ticker logging session
/// counts, off by default.
pub async fn run_debug_ticker(state: Arc<GatewayState>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        log::debug!("active sessions: {}", state.sessions.len());
    }
}

//! Lifecycle logging for the southbound gateway (spec §10.2), grounded on
//! the donor's `Observer` pattern — a thin struct whose methods exist only
//! to log, called from the accept loop and the request dispatcher.

use std::net::SocketAddr;

#[derive(Clone, Default)]
pub struct Observer;

impl Observer {
    pub fn session_opened(&self, peer_address: SocketAddr) {
        log::info!("session opened: peer={peer_address}");
    }

    pub fn session_closed(&self, peer_address: SocketAddr) {
        log::info!("session closed: peer={peer_address}");
    }

    pub fn resource_published(&self, device_id: &str, path: &str) {
        log::info!("resource published: device={device_id} path={path}");
    }

    pub fn resource_publish_rejected(&self, device_id: &str) {
        log::warn!("resource publish rejected: device={device_id}");
    }

    pub fn session_login(&self, device_id: &str, peer_address: SocketAddr) {
        log::info!("device logged in: device={device_id} peer={peer_address}");
    }

    pub fn session_logout(&self, device_id: &str) {
        log::info!("device logged out: device={device_id}");
    }
}

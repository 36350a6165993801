//! Cross-module scenarios spanning the resource-directory handlers, the
//! session state machine, and the session container (spec §8's
//! end-to-end scenarios 1-4).

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use gateway_core::{
    handler::{DeviceLink, LinkError, ObservationHandle},
    keepalive::{KeepaliveOptions, PingOutcome},
    rd::{self, RdError},
    session::Session,
    session_container::SessionContainer,
};
use registry::{InMemoryRoutingCache, PrincipalKind, Registry, RegistryOptions, fake::InMemoryRegistry};
use wire::{
    cbor::{self, Link, LinkProperties, RdPayload, SessionRequest},
    code::Code,
};

struct RecordingLink {
    observed: parking_lot::Mutex<Vec<String>>,
}

struct NoopObservation;
impl ObservationHandle for NoopObservation {
    fn cancel(&self) {}
}

#[async_trait::async_trait]
impl DeviceLink for RecordingLink {
    async fn observe(&self, href: &str) -> Result<Box<dyn ObservationHandle>, LinkError> {
        self.observed.lock().push(href.to_string());
        Ok(Box::new(NoopObservation))
    }

    async fn get(&self, _href: &str) {}

    async fn post(&self, _href: &str, _body: &[u8], _deadline: Duration) -> Result<Bytes, LinkError> {
        Ok(Bytes::new())
    }

    async fn ping(&self, _deadline: Duration) -> PingOutcome {
        PingOutcome::Success
    }

    async fn close(&self) {}
}

fn new_session() -> (Arc<Session>, Arc<RecordingLink>) {
    let link = Arc::new(RecordingLink { observed: parking_lot::Mutex::new(vec![]) });
    let session = Session::new("127.0.0.1:0".parse().unwrap(), link.clone(), KeepaliveOptions::default());
    (session, link)
}

fn observable_link(href: &str) -> Link {
    Link { href: href.into(), p: Some(LinkProperties { bm: 0x2, extra: Default::default() }), ins: None, extra: Default::default() }
}

fn bare_link(href: &str) -> Link {
    Link { href: href.into(), p: None, ins: None, extra: Default::default() }
}

// Scenario 1: publishing an observable resource assigns sequential `ins`
// ids and triggers an OBSERVE against the device.
#[tokio::test]
async fn publish_observable_resource_assigns_ins_and_triggers_observe() {
    let (session, link) = new_session();
    let payload = RdPayload { di: "dev-1".into(), links: vec![bare_link("/a"), observable_link("/b")] };
    let body = cbor::encode(&payload).unwrap();

    let response = rd::publish(&session, &body).await.unwrap();
    assert_eq!(response.code, Code::Changed);

    let echoed: RdPayload = cbor::decode(&response.payload).unwrap();
    assert_eq!(echoed.links[0].ins, Some(0));
    assert_eq!(echoed.links[1].ins, Some(1));
    assert_eq!(link.observed.lock().as_slice(), ["/b"]);
}

// Scenario 2: a link with an empty href is rejected with BadRequest and
// no resource from this request is committed.
#[tokio::test]
async fn publish_with_empty_href_is_rejected_and_commits_nothing() {
    let (session, _link) = new_session();
    let payload = RdPayload { di: "dev-1".into(), links: vec![bare_link("/a"), bare_link("")] };
    let body = cbor::encode(&payload).unwrap();

    let err = rd::publish(&session, &body).await.unwrap_err();
    assert!(matches!(err, RdError::BadRequest));

    // Neither link survives: "/a" was rolled back alongside the rejected "".
    assert_eq!(session.unpublish_resource("dev-1", &[0]), Err(vec![0]));
}

// Scenario 3: unpublish rejects an unknown ins, accepts a known one, and a
// bare device id with no ins list removes every resource.
#[tokio::test]
async fn unpublish_sequence() {
    let (session, _link) = new_session();
    let payload = RdPayload { di: "dev-1".into(), links: vec![bare_link("/a"), observable_link("/b")] };
    let body = cbor::encode(&payload).unwrap();
    rd::publish(&session, &body).await.unwrap();

    let unknown = rd::unpublish(&session, "dev-1", &[99]);
    assert_eq!(unknown.code, Code::BadRequest);

    let known = rd::unpublish(&session, "dev-1", &[0]);
    assert_eq!(known.code, Code::Deleted);

    let remove_all = rd::unpublish(&session, "dev-1", &[]);
    assert_eq!(remove_all.code, Code::Deleted);
    assert_eq!(rd::unpublish(&session, "dev-1", &[]).code, Code::BadRequest);
}

// Scenario 4: a device logs in, the Request Router can find its session
// through the container, then logging out clears the binding and the
// routing cache entry.
#[tokio::test]
async fn login_then_logout_round_trips_through_the_container_and_cache() {
    let cache = Arc::new(InMemoryRoutingCache::default());
    let registry = InMemoryRegistry::new(cache.clone(), RegistryOptions::default());
    let container = SessionContainer::default();
    let peer: std::net::SocketAddr = "127.0.0.1:4100".parse().unwrap();

    let user_token = registry.register_user("carol", "local").await.unwrap();
    let mediator_token = registry.provision_mediator("carol", &user_token).await.unwrap();
    let one_time =
        registry.provision_principal(PrincipalKind::Device, "dev-login", &mediator_token).await.unwrap();
    let grant = registry.register_principal(PrincipalKind::Device, "dev-login", &one_time).await.unwrap();

    let link = Arc::new(RecordingLink { observed: parking_lot::Mutex::new(vec![]) });
    container.open(peer, link, KeepaliveOptions::default());

    let login_req = SessionRequest {
        di: "dev-login".into(),
        uid: grant.user_id.clone(),
        accesstoken: grant.access_token.clone(),
        login: true,
    };
    let login_response =
        rd::session(&registry, &container, peer, "10.0.0.5:5684", &cbor::encode(&login_req).unwrap())
            .await
            .unwrap();
    assert_eq!(login_response.code, Code::Created);
    assert!(container.find_by_device("dev-login").is_some());

    let logout_req = SessionRequest {
        di: "dev-login".into(),
        uid: grant.user_id.clone(),
        accesstoken: grant.access_token.clone(),
        login: false,
    };
    let logout_response =
        rd::session(&registry, &container, peer, "10.0.0.5:5684", &cbor::encode(&logout_req).unwrap())
            .await
            .unwrap();
    assert_eq!(logout_response.code, Code::Changed);
}

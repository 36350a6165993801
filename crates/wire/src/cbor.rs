//! Typed OCF CBOR payload schemas.
//!
//! Design note: the original decodes `/oic/rd` payloads into dynamic,
//! untyped maps. Here each payload gets an explicit schema with a
//! `serde(flatten)` bucket for fields the schema doesn't know about, so a
//! device that sends extra OCF link attributes (`rt`, `if`, `anchor`, ...)
//! round-trips them unchanged instead of silently dropping them.

use std::collections::BTreeMap;

use ciborium::Value;
use serde::{Deserialize, Serialize};

use crate::Error;

/// `p.bm` bit 2 marks a link observable.
pub const BITMASK_OBSERVABLE: u64 = 0x2;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LinkProperties {
    #[serde(default)]
    pub bm: u64,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl LinkProperties {
    pub fn is_observable(&self) -> bool {
        self.bm & BITMASK_OBSERVABLE != 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Link {
    pub href: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p: Option<LinkProperties>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ins: Option<u64>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// The `/oic/rd` publish/unpublish payload: `{di, links: [...]}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RdPayload {
    pub di: String,
    pub links: Vec<Link>,
}

/// `/oic/sec/account` request: `{di, accesstoken}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountRequest {
    pub di: String,
    pub accesstoken: String,
}

/// `/oic/sec/account` response: `{accesstoken, uid, refreshtoken, expiresin}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountResponse {
    pub accesstoken: String,
    pub uid: String,
    pub refreshtoken: String,
    pub expiresin: u64,
}

/// `/oic/sec/session` request: `{di, uid, accesstoken, login}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRequest {
    pub di: String,
    pub uid: String,
    pub accesstoken: String,
    pub login: bool,
}

/// `/oic/sec/session` login response: `{expiresin}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResponse {
    pub expiresin: u64,
}

/// `/oic/sec/tokenrefresh` request: `{di, uid, refreshtoken}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRefreshRequest {
    pub di: String,
    pub uid: String,
    pub refreshtoken: String,
}

/// `/oic/sec/tokenrefresh` response: `{accesstoken, refreshtoken, expiresin}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRefreshResponse {
    pub accesstoken: String,
    pub refreshtoken: String,
    pub expiresin: u64,
}

/// Decodes a CBOR payload into `T`.
///
/// # Test
///
/// ```
/// use wire::cbor::{decode, encode, RdPayload, Link};
///
/// let payload = RdPayload {
///     di: "a".into(),
///     links: vec![Link { href: "/a".into(), p: None, ins: None, extra: Default::default() }],
/// };
///
/// let bytes = encode(&payload).unwrap();
/// let decoded: RdPayload = decode(&bytes).unwrap();
/// assert_eq!(decoded.di, "a");
/// assert_eq!(decoded.links[0].href, "/a");
/// ```
pub fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, Error> {
    ciborium::de::from_reader(bytes).map_err(|e| Error::Cbor(e.to_string()))
}

/// Encodes `T` into a CBOR byte buffer.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, Error> {
    let mut out = Vec::new();
    ciborium::ser::into_writer(value, &mut out).map_err(|e| Error::Cbor(e.to_string()))?;
    Ok(out)
}

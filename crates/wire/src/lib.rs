//! ## Constrained Application Protocol (CoAP) over TCP
//!
//! [RFC7252]: https://datatracker.ietf.org/doc/html/rfc7252
//! [RFC8323]: https://datatracker.ietf.org/doc/html/rfc8323
//!
//! This crate is the wire boundary assumed by the gateway: CoAP-over-TCP
//! framing ([RFC8323] section 3.2), the method/response code registry
//! ([RFC7252] section 12.1), a minimal set of options (Uri-Path, Uri-Query,
//! Content-Format), and the OCF CBOR payload schemas used by the resource
//! directory handlers. It does not implement DTLS, blockwise transfer, or
//! the full IANA options registry — only what `/oic/rd` and its siblings
//! require.

pub mod cbor;
pub mod code;
pub mod message;

pub use cbor::{Link, LinkProperties, RdPayload};
pub use code::Code;
pub use message::{Message, Option_, Options};

use std::{array::TryFromSliceError, str::Utf8Error};

#[derive(Debug)]
pub enum Error {
    Truncated,
    InvalidInput,
    UnknownCode(u8),
    Utf8Error(Utf8Error),
    TryFromSliceError(TryFromSliceError),
    Cbor(String),
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<Utf8Error> for Error {
    fn from(value: Utf8Error) -> Self {
        Self::Utf8Error(value)
    }
}

impl From<TryFromSliceError> for Error {
    fn from(value: TryFromSliceError) -> Self {
        Self::TryFromSliceError(value)
    }
}

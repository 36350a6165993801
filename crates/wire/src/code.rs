use num_enum::{IntoPrimitive, TryFromPrimitive};

/// CoAP request/response code registry.
///
/// [RFC7252 Section 12.1]: https://datatracker.ietf.org/doc/html/rfc7252#section-12.1
///
/// Codes are encoded as `(class << 5) | detail`, e.g. `2.04` (Changed) is
/// `0x44`. Only the subset of methods and response codes used by the
/// resource directory handlers is represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Code {
    Empty = 0x00,
    Get = 0x01,
    Post = 0x02,
    Put = 0x03,
    Delete = 0x04,

    Created = 0x41,
    Deleted = 0x42,
    Valid = 0x43,
    Changed = 0x44,
    Content = 0x45,

    BadRequest = 0x80,
    Unauthorized = 0x81,
    Forbidden = 0x83,
    NotFound = 0x84,
    MethodNotAllowed = 0x85,
    UnsupportedContentFormat = 0x8f,

    InternalServerError = 0xa0,

    /// RFC8323 §4.3 CoAP-over-TCP signaling codes, used by the keepalive
    /// engine in place of the UDP-only Empty-message ping.
    Ping = 0xe2,
    Pong = 0xe3,
}

impl Code {
    pub fn is_request(&self) -> bool {
        matches!(self, Code::Get | Code::Post | Code::Put | Code::Delete)
    }

    pub fn class(&self) -> u8 {
        (u8::from(*self)) >> 5
    }
}

/// Content-Format identifiers relevant to OCF-flavored CBOR exchanges.
///
/// [RFC7252 Section 12.3]: https://datatracker.ietf.org/doc/html/rfc7252#section-12.3
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentFormat {
    Cbor,
    OcfCbor,
    Other(u16),
}

impl From<u16> for ContentFormat {
    fn from(value: u16) -> Self {
        match value {
            60 => ContentFormat::Cbor,
            10000 => ContentFormat::OcfCbor,
            other => ContentFormat::Other(other),
        }
    }
}

impl ContentFormat {
    /// # Test
    ///
    /// ```
    /// use wire::code::ContentFormat;
    ///
    /// assert!(ContentFormat::from(60u16).is_supported_cbor());
    /// assert!(ContentFormat::from(10000u16).is_supported_cbor());
    /// assert!(!ContentFormat::from(0u16).is_supported_cbor());
    /// ```
    pub fn is_supported_cbor(&self) -> bool {
        matches!(self, ContentFormat::Cbor | ContentFormat::OcfCbor)
    }
}

use bytes::{BufMut, Bytes, BytesMut};

use crate::{Error, code::Code};

/// A single CoAP option, already delta/length decoded.
///
/// [RFC7252 Section 3.1]: https://datatracker.ietf.org/doc/html/rfc7252#section-3.1
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Option_ {
    pub number: u16,
    pub value: Bytes,
}

pub const OPT_OBSERVE: u16 = 6;
pub const OPT_URI_PATH: u16 = 11;
pub const OPT_CONTENT_FORMAT: u16 = 12;
pub const OPT_URI_QUERY: u16 = 15;

/// A decoded set of options, queryable by option number.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Options(pub Vec<Option_>);

impl Options {
    pub fn get_all(&self, number: u16) -> impl Iterator<Item = &Option_> {
        self.0.iter().filter(move |o| o.number == number)
    }

    /// Reassembles the Uri-Path option repeats into a `/`-joined path.
    ///
    /// # Test
    ///
    /// ```
    /// use wire::message::{Options, Option_, OPT_URI_PATH};
    /// use bytes::Bytes;
    ///
    /// let opts = Options(vec![
    ///     Option_ { number: OPT_URI_PATH, value: Bytes::from_static(b"oic") },
    ///     Option_ { number: OPT_URI_PATH, value: Bytes::from_static(b"rd") },
    /// ]);
    ///
    /// assert_eq!(opts.path(), "/oic/rd");
    /// ```
    pub fn path(&self) -> String {
        let mut out = String::new();
        for opt in self.get_all(OPT_URI_PATH) {
            out.push('/');
            out.push_str(&String::from_utf8_lossy(&opt.value));
        }
        out
    }

    /// Reassembles the Uri-Query option repeats into `key=value` pairs.
    pub fn queries(&self) -> Vec<(String, String)> {
        self.get_all(OPT_URI_QUERY)
            .filter_map(|opt| {
                let s = String::from_utf8_lossy(&opt.value);
                s.split_once('=').map(|(k, v)| (k.to_string(), v.to_string()))
            })
            .collect()
    }

    pub fn content_format(&self) -> Option<u16> {
        self.get_all(OPT_CONTENT_FORMAT)
            .next()
            .map(|opt| decode_uint(&opt.value) as u16)
    }
}

fn decode_uint(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0u32, |acc, b| (acc << 8) | *b as u32)
}

fn encode_uint(value: u32) -> Bytes {
    if value == 0 {
        Bytes::new()
    } else if value < 256 {
        Bytes::copy_from_slice(&[value as u8])
    } else {
        Bytes::copy_from_slice(&(value as u16).to_be_bytes())
    }
}

/// A decoded CoAP-over-TCP message: `Len/TKL` header, extended length,
/// Code, Token, Options, and an optional payload after the `0xFF` marker.
///
/// [RFC8323 Section 3.2]: https://datatracker.ietf.org/doc/html/rfc8323#section-3.2
#[derive(Debug, Clone)]
pub struct Message {
    pub code: Code,
    pub token: Bytes,
    pub options: Options,
    pub payload: Bytes,
}

impl Message {
    pub fn new(code: Code) -> Self {
        Self {
            code,
            token: Bytes::new(),
            options: Options::default(),
            payload: Bytes::new(),
        }
    }

    pub fn with_token(mut self, token: Bytes) -> Self {
        self.token = token;
        self
    }

    pub fn with_payload(mut self, payload: Bytes) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_option(mut self, number: u16, value: impl Into<Bytes>) -> Self {
        self.options.0.push(Option_ { number, value: value.into() });
        self
    }

    pub fn with_content_format(self, format: u16) -> Self {
        self.with_option(OPT_CONTENT_FORMAT, encode_uint(format as u32))
    }

    /// Sets the Observe option: `0` registers, `1` deregisters.
    ///
    /// [RFC7641]: https://datatracker.ietf.org/doc/html/rfc7641
    pub fn with_observe(self, value: u32) -> Self {
        self.with_option(OPT_OBSERVE, encode_uint(value))
    }

    pub fn with_path(mut self, path: &str) -> Self {
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            self.options.0.push(Option_ {
                number: OPT_URI_PATH,
                value: Bytes::copy_from_slice(segment.as_bytes()),
            });
        }
        self
    }

    /// Decodes a single frame from `bytes`, returning the message and the
    /// number of bytes consumed. `bytes` may contain trailing data from a
    /// subsequent frame; only the leading frame is parsed.
    ///
    /// # Test
    ///
    /// ```
    /// use wire::message::Message;
    /// use wire::code::Code;
    /// use bytes::Bytes;
    ///
    /// let msg = Message::new(Code::Get).with_path("/oic/rd");
    /// let bytes = msg.encode();
    ///
    /// let (decoded, used) = Message::decode(&bytes).unwrap();
    /// assert_eq!(used, bytes.len());
    /// assert_eq!(decoded.code, Code::Get);
    /// assert_eq!(decoded.options.path(), "/oic/rd");
    /// ```
    pub fn decode(bytes: &[u8]) -> Result<(Self, usize), Error> {
        if bytes.is_empty() {
            return Err(Error::Truncated);
        }

        let first = bytes[0];
        let len_nibble = first >> 4;
        let tkl = (first & 0x0f) as usize;
        if tkl > 8 {
            return Err(Error::InvalidInput);
        }

        let mut offset = 1usize;
        let extended_len: usize = match len_nibble {
            0..=12 => len_nibble as usize,
            13 => {
                let b = *bytes.get(offset).ok_or(Error::Truncated)? as usize;
                offset += 1;
                13 + b
            }
            14 => {
                let hi = *bytes.get(offset).ok_or(Error::Truncated)? as usize;
                let lo = *bytes.get(offset + 1).ok_or(Error::Truncated)? as usize;
                offset += 2;
                269 + (hi << 8 | lo)
            }
            _ => {
                let b0 = *bytes.get(offset).ok_or(Error::Truncated)? as usize;
                let b1 = *bytes.get(offset + 1).ok_or(Error::Truncated)? as usize;
                let b2 = *bytes.get(offset + 2).ok_or(Error::Truncated)? as usize;
                let b3 = *bytes.get(offset + 3).ok_or(Error::Truncated)? as usize;
                offset += 4;
                65805 + (b0 << 24 | b1 << 16 | b2 << 8 | b3)
            }
        };

        let code_byte = *bytes.get(offset).ok_or(Error::Truncated)?;
        let code = Code::try_from(code_byte).map_err(|_| Error::UnknownCode(code_byte))?;
        offset += 1;

        let token_end = offset + tkl;
        let token = Bytes::copy_from_slice(
            bytes.get(offset..token_end).ok_or(Error::Truncated)?,
        );
        offset = token_end;

        let body_end = offset + extended_len;
        let body = bytes.get(offset..body_end).ok_or(Error::Truncated)?;
        let (options, payload) = decode_options_and_payload(body)?;

        Ok((
            Self { code, token, options, payload: Bytes::copy_from_slice(payload) },
            body_end,
        ))
    }

    /// Encodes this message into a complete CoAP-over-TCP frame.
    pub fn encode(&self) -> Bytes {
        let mut body = BytesMut::new();
        let mut prev = 0u16;
        for opt in &self.options.0 {
            encode_option(&mut body, &mut prev, opt);
        }
        if !self.payload.is_empty() {
            body.put_u8(0xff);
            body.extend_from_slice(&self.payload);
        }

        let len = body.len();
        let mut out = BytesMut::new();
        if len <= 12 {
            out.put_u8(((len as u8) << 4) | self.token.len() as u8);
        } else if len <= 12 + 255 {
            out.put_u8((13 << 4) | self.token.len() as u8);
            out.put_u8((len - 13) as u8);
        } else if len <= 269 + 65535 {
            out.put_u8((14 << 4) | self.token.len() as u8);
            out.put_u16((len - 269) as u16);
        } else {
            out.put_u8((15 << 4) | self.token.len() as u8);
            out.put_u32((len - 65805) as u32);
        }
        out.put_u8(self.code.into());
        out.extend_from_slice(&self.token);
        out.extend_from_slice(&body);
        out.freeze()
    }
}

fn encode_option(out: &mut BytesMut, prev: &mut u16, opt: &Option_) {
    let delta = opt.number - *prev;
    *prev = opt.number;
    let len = opt.value.len();

    let (delta_nibble, delta_ext) = nibble_and_ext(delta as usize);
    let (len_nibble, len_ext) = nibble_and_ext(len);

    out.put_u8((delta_nibble << 4) | len_nibble);
    out.extend_from_slice(&delta_ext);
    out.extend_from_slice(&len_ext);
    out.extend_from_slice(&opt.value);
}

fn nibble_and_ext(value: usize) -> (u8, Vec<u8>) {
    if value <= 12 {
        (value as u8, vec![])
    } else if value <= 12 + 255 {
        (13, vec![(value - 13) as u8])
    } else {
        let v = (value - 269) as u16;
        (14, v.to_be_bytes().to_vec())
    }
}

fn decode_options_and_payload(body: &[u8]) -> Result<(Options, &[u8]), Error> {
    let mut options = Vec::new();
    let mut offset = 0usize;
    let mut prev = 0u16;

    while offset < body.len() {
        if body[offset] == 0xff {
            return Ok((Options(options), &body[offset + 1..]));
        }

        let first = body[offset];
        let delta_nibble = first >> 4;
        let len_nibble = first & 0x0f;
        offset += 1;

        let delta = read_ext(body, &mut offset, delta_nibble)?;
        let len = read_ext(body, &mut offset, len_nibble)? as usize;

        let number = prev + delta as u16;
        prev = number;

        let value = body.get(offset..offset + len).ok_or(Error::Truncated)?;
        offset += len;

        options.push(Option_ { number, value: Bytes::copy_from_slice(value) });
    }

    Ok((Options(options), &body[body.len()..]))
}

fn read_ext(body: &[u8], offset: &mut usize, nibble: u8) -> Result<u32, Error> {
    Ok(match nibble {
        0..=12 => nibble as u32,
        13 => {
            let b = *body.get(*offset).ok_or(Error::Truncated)? as u32;
            *offset += 1;
            13 + b
        }
        14 => {
            let hi = *body.get(*offset).ok_or(Error::Truncated)? as u32;
            let lo = *body.get(*offset + 1).ok_or(Error::Truncated)? as u32;
            *offset += 2;
            269 + (hi << 8 | lo)
        }
        _ => return Err(Error::InvalidInput),
    })
}

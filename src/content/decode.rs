//! Body normalization: dechunk, decompress, transcode to UTF-8, and back.

use bytes::Bytes;
use encoding_rs::{Encoding, UTF_8};
use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};
use flate2::write::{DeflateEncoder, GzEncoder, ZlibEncoder};
use flate2::Compression;
use http::header::{CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderValue, Response};
use log::{debug, warn};
use std::borrow::Cow;
use std::fmt;
use std::io::{Read, Write};

use super::{charset, chunked};
use crate::error::{ContentError, ContentResult};

/// Cap on decompressed size used by [`decode`] and [`decode_response`].
pub const DEFAULT_DECODED_LIMIT: usize = 8 * 1024 * 1024;

/// `Content-Encoding` of a body as it arrived.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ContentCoding {
    #[default]
    Identity,
    Gzip,
    /// `deflate` with a zlib wrapper.
    Deflate,
    /// `deflate` sent as a bare DEFLATE stream.
    RawDeflate,
    /// A coding this crate does not decompress; bytes pass through untouched.
    Passthrough(String),
}

impl ContentCoding {
    fn detect(headers: &HeaderMap, body: &[u8]) -> Self {
        let value = header_str(headers, CONTENT_ENCODING).trim().to_ascii_lowercase();
        match value.as_str() {
            "" | "identity" => ContentCoding::Identity,
            "gzip" | "x-gzip" => ContentCoding::Gzip,
            "deflate" if has_zlib_header(body) => ContentCoding::Deflate,
            "deflate" => ContentCoding::RawDeflate,
            _ => ContentCoding::Passthrough(value),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ContentCoding::Identity => "identity",
            ContentCoding::Gzip => "gzip",
            ContentCoding::Deflate | ContentCoding::RawDeflate => "deflate",
            ContentCoding::Passthrough(_) => "passthrough",
        }
    }

    /// Inflate `body`, reading at most one byte past `limit`.
    fn decompress(&self, body: &[u8], limit: usize) -> ContentResult<Vec<u8>> {
        let mut out = Vec::with_capacity(body.len().saturating_mul(2).min(limit));
        let cap = (limit as u64).saturating_add(1);
        let result = match self {
            ContentCoding::Identity | ContentCoding::Passthrough(_) => return Ok(body.to_vec()),
            ContentCoding::Gzip => GzDecoder::new(body).take(cap).read_to_end(&mut out),
            ContentCoding::Deflate => ZlibDecoder::new(body).take(cap).read_to_end(&mut out),
            ContentCoding::RawDeflate => DeflateDecoder::new(body).take(cap).read_to_end(&mut out),
        };
        result.map_err(|source| ContentError::Decompress {
            coding: self.label(),
            source,
        })?;
        if out.len() > limit {
            return Err(ContentError::TooLarge { limit });
        }
        Ok(out)
    }

    fn compress(&self, body: &[u8]) -> ContentResult<Vec<u8>> {
        let level = Compression::default();
        let result = match self {
            ContentCoding::Identity | ContentCoding::Passthrough(_) => return Ok(body.to_vec()),
            ContentCoding::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), level);
                encoder.write_all(body).and_then(|_| encoder.finish())
            }
            ContentCoding::Deflate => {
                let mut encoder = ZlibEncoder::new(Vec::new(), level);
                encoder.write_all(body).and_then(|_| encoder.finish())
            }
            ContentCoding::RawDeflate => {
                let mut encoder = DeflateEncoder::new(Vec::new(), level);
                encoder.write_all(body).and_then(|_| encoder.finish())
            }
        };
        result.map_err(|source| ContentError::Compress {
            coding: self.label(),
            source,
        })
    }
}

impl fmt::Display for ContentCoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentCoding::Passthrough(name) => write!(f, "{}", name),
            other => write!(f, "{}", other.label()),
        }
    }
}

/// A body after transfer/content decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedBody {
    /// UTF-8 text, unless the declared charset was unknown, in which case
    /// the decompressed bytes are kept as they were.
    pub content: Vec<u8>,
    /// Charset label as discovered, lowercased. Empty for an empty body
    /// without a declared charset.
    pub charset: String,
    pub coding: ContentCoding,
    /// The body arrived with chunk framing that was removed.
    pub chunked: bool,
    encoding: Option<&'static Encoding>,
}

impl DecodedBody {
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.content)
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    /// Reverse the decode: transcode `content` back into the original
    /// charset and re-apply the original content coding. Chunk framing is
    /// not restored; callers send the result with a `Content-Length`.
    pub fn encode(&self, content: &[u8]) -> ContentResult<Vec<u8>> {
        let raw = match self.encoding {
            Some(encoding) if encoding != UTF_8 => {
                let text = String::from_utf8_lossy(content);
                let (bytes, _, unmappable) = encoding.encode(&text);
                if unmappable {
                    debug!(
                        "characters not representable in {} replaced with numeric references",
                        self.charset
                    );
                }
                bytes.into_owned()
            }
            _ => content.to_vec(),
        };
        self.coding.compress(&raw)
    }
}

fn header_str(headers: &HeaderMap, name: http::header::HeaderName) -> &str {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
}

fn has_zlib_header(body: &[u8]) -> bool {
    match body {
        [cmf, flg, ..] => cmf & 0x0F == 8 && (u16::from(*cmf) << 8 | u16::from(*flg)) % 31 == 0,
        _ => false,
    }
}

fn is_chunked(headers: &HeaderMap) -> bool {
    headers
        .get_all(TRANSFER_ENCODING)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|coding| coding.trim().eq_ignore_ascii_case("chunked"))
}

/// Decode a body using the framing, coding and charset announced by
/// `headers`, falling back to `<meta>` and DOCTYPE sniffing for the charset.
pub fn decode(headers: &HeaderMap, body: &[u8]) -> ContentResult<DecodedBody> {
    decode_limited(headers, body, DEFAULT_DECODED_LIMIT)
}

/// [`decode`] with an explicit cap on the decompressed size. A body that
/// inflates past `limit` fails with [`ContentError::TooLarge`].
pub fn decode_limited(headers: &HeaderMap, body: &[u8], limit: usize) -> ContentResult<DecodedBody> {
    let declared = charset::header_charset(header_str(headers, CONTENT_TYPE));

    let mut dechunked = false;
    let mut bytes = Cow::Borrowed(body);
    if is_chunked(headers) && !body.is_empty() {
        match chunked::dechunk(body) {
            Some(plain) => {
                dechunked = true;
                bytes = Cow::Owned(plain);
            }
            None => warn!("malformed chunked framing, inspecting raw body"),
        }
    }

    let coding = ContentCoding::detect(headers, &bytes);
    if bytes.is_empty() {
        return Ok(DecodedBody {
            content: Vec::new(),
            charset: declared.unwrap_or_default(),
            coding,
            chunked: dechunked,
            encoding: None,
        });
    }
    if let ContentCoding::Passthrough(name) = &coding {
        debug!("content coding {} not decompressed", name);
    }
    let plain = coding.decompress(&bytes, limit)?;

    let label = match declared {
        Some(label) => label,
        None => charset::meta_charset(&plain)
            .or_else(|| charset::has_xhtml_doctype(&plain).then(|| "utf-8".to_string()))
            .ok_or(ContentError::CharsetUndetermined)?,
    };

    let (content, encoding) = match charset::lookup(&label) {
        Some(encoding) if encoding == UTF_8 => (plain, Some(encoding)),
        Some(encoding) => {
            let (text, _, malformed) = encoding.decode(&plain);
            if malformed {
                debug!("malformed {} sequences replaced while decoding", label);
            }
            (text.into_owned().into_bytes(), Some(encoding))
        }
        None => {
            debug!("unknown charset {}, body kept as-is", label);
            (plain, None)
        }
    };

    Ok(DecodedBody {
        content,
        charset: label,
        coding,
        chunked: dechunked,
        encoding,
    })
}

pub fn decode_response(response: &Response<Bytes>) -> ContentResult<DecodedBody> {
    decode(response.headers(), response.body())
}

/// Install a re-encoded body on `response`, fixing up the framing headers.
pub fn apply_encoded_body(response: &mut Response<Bytes>, body: Vec<u8>) {
    let headers = response.headers_mut();
    headers.remove(TRANSFER_ENCODING);
    headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
    *response.body_mut() = Bytes::from(body);
}

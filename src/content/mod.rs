//! Content normalization.
//!
//! Detectors need to see what the client or origin actually meant, so bodies
//! are dechunked, decompressed and transcoded to UTF-8 before inspection, and
//! encoded back the same way after a rewrite.

pub mod charset;
pub mod chunked;
pub mod decode;
pub mod form;
pub mod rewrite;

pub use decode::{
    apply_encoded_body, decode, decode_limited, decode_response, ContentCoding, DecodedBody, DEFAULT_DECODED_LIMIT,
};
pub use form::{is_form_content_type, parse_form};
pub use rewrite::{replace_body_content, replace_url_content};

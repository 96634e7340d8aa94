//! Charset discovery for HTTP bodies.

use encoding_rs::Encoding;
use once_cell::sync::Lazy;
use regex::Regex;

/// How far into a body the `<meta>` and DOCTYPE sniffing looks.
pub const SNIFF_LIMIT: usize = 1024;

static CHARSET_PARAM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)charset\s*=\s*["']?\s*([a-z0-9_\-:.]+)"#).unwrap());

static META_CHARSET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<meta[^>]*?charset\s*=\s*["']?\s*([a-z0-9_\-:.]+)"#).unwrap()
});

static XHTML_DOCTYPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<!doctype[^>]*xhtml[^>]*\.dtd").unwrap());

/// Known encoding for `label`, per the WHATWG label table.
pub fn lookup(label: &str) -> Option<&'static Encoding> {
    Encoding::for_label(label.trim().as_bytes())
}

/// `charset` parameter of a `Content-Type` value, lowercased.
pub fn header_charset(content_type: &str) -> Option<String> {
    CHARSET_PARAM
        .captures(content_type)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_ascii_lowercase())
}

fn sniff_window(body: &[u8]) -> String {
    let end = body.len().min(SNIFF_LIMIT);
    String::from_utf8_lossy(&body[..end]).into_owned()
}

/// Charset declared by a `<meta charset>` or `<meta http-equiv>` tag near the
/// start of the document. Labels no encoding answers to are ignored.
pub fn meta_charset(body: &[u8]) -> Option<String> {
    let window = sniff_window(body);
    META_CHARSET
        .captures_iter(&window)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().to_ascii_lowercase())
        .find(|label| lookup(label).is_some())
}

/// True when the document starts with a DOCTYPE referencing an XHTML DTD,
/// which implies UTF-8.
pub fn has_xhtml_doctype(body: &[u8]) -> bool {
    XHTML_DOCTYPE.is_match(&sniff_window(body))
}

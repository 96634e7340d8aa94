//! In-place request rewriting.

use bytes::Bytes;
use http::header::CONTENT_LENGTH;
use http::uri::PathAndQuery;
use http::{HeaderValue, Request, Uri};
use memchr::memmem;
use std::borrow::Cow;

use crate::error::{ContentError, ContentResult};

/// Replace every occurrence of `old` in `haystack`. Returns `None` when
/// there was nothing to replace.
pub fn replace_bytes(haystack: &[u8], old: &[u8], new: &[u8]) -> Option<Vec<u8>> {
    if old.is_empty() {
        return None;
    }
    let mut out = Vec::with_capacity(haystack.len());
    let mut last = 0;
    for start in memmem::find_iter(haystack, old) {
        out.extend_from_slice(&haystack[last..start]);
        out.extend_from_slice(new);
        last = start + old.len();
    }
    if last == 0 {
        return None;
    }
    out.extend_from_slice(&haystack[last..]);
    Some(out)
}

/// Literal byte replacement over the request body. Binary payloads are fine.
/// `Content-Length` is updated when the request carries one; no other header
/// is touched.
pub fn replace_body_content<S: AsRef<str>>(request: &mut Request<Bytes>, olds: &[S], new: &str) {
    let mut body: Cow<'_, [u8]> = Cow::Borrowed(request.body().as_ref());
    for old in olds {
        if let Some(replaced) = replace_bytes(&body, old.as_ref().as_bytes(), new.as_bytes()) {
            body = Cow::Owned(replaced);
        }
    }
    let Cow::Owned(body) = body else {
        return;
    };

    if request.headers().contains_key(CONTENT_LENGTH) {
        request
            .headers_mut()
            .insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
    }
    *request.body_mut() = Bytes::from(body);
}

/// Characters allowed unescaped in a path segment besides ASCII
/// alphanumerics (RFC 3986 `pchar`).
const PCHAR_EXTRA: &str = "-._~!$&'()*+,;=:@";

fn encode_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    let mut buf = [0u8; 4];
    for c in segment.chars() {
        if c.is_ascii_alphanumeric() || PCHAR_EXTRA.contains(c) {
            out.push(c);
        } else {
            out.push_str(&urlencoding::encode(c.encode_utf8(&mut buf)));
        }
    }
    out
}

fn encode_path(path: &str) -> String {
    path.split('/').map(encode_segment).collect::<Vec<_>>().join("/")
}

/// Replace text in the percent-decoded request path. Scheme, authority and
/// the raw query string are kept byte-for-byte.
pub fn replace_url_content<S: AsRef<str>>(
    request: &mut Request<Bytes>,
    olds: &[S],
    new: &str,
) -> ContentResult<()> {
    let uri = request.uri();
    let original = urlencoding::decode_binary(uri.path().as_bytes());
    let original = String::from_utf8_lossy(&original);

    let mut path = original.to_string();
    for old in olds.iter().map(AsRef::as_ref).filter(|old| !old.is_empty()) {
        path = path.replace(old, new);
    }
    if path == original {
        return Ok(());
    }

    let mut rebuilt = encode_path(&path);
    if !rebuilt.starts_with('/') {
        rebuilt.insert(0, '/');
    }
    if let Some(query) = uri.query() {
        rebuilt.push('?');
        rebuilt.push_str(query);
    }

    let path_and_query = PathAndQuery::try_from(rebuilt.as_str())
        .map_err(|e| ContentError::InvalidUri(e.to_string()))?;
    let mut parts = uri.clone().into_parts();
    parts.path_and_query = Some(path_and_query);
    let uri = Uri::from_parts(parts).map_err(|e| ContentError::InvalidUri(e.to_string()))?;

    *request.uri_mut() = uri;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::CONTENT_TYPE;

    fn post(body: &'static [u8]) -> Request<Bytes> {
        Request::builder()
            .method("POST")
            .uri("http://origin.com/submit")
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(CONTENT_LENGTH, body.len())
            .body(Bytes::from_static(body))
            .unwrap()
    }

    #[test]
    fn test_replace_body_content() {
        let mut req = post(b"user=admin&note=admin rights");
        replace_body_content(&mut req, &["admin"], "guest");
        assert_eq!(req.body().as_ref(), b"user=guest&note=guest rights");
        assert_eq!(req.headers()[CONTENT_LENGTH], "28");
        assert_eq!(req.headers()[CONTENT_TYPE], "application/octet-stream");
    }

    #[test]
    fn test_replace_body_binary_payload() {
        let mut req = post(b"\x00\x01secret\x00secret\xff");
        replace_body_content(&mut req, &["secret", ""], "x");
        assert_eq!(req.body().as_ref(), b"\x00\x01x\x00x\xff");
        assert_eq!(req.headers()[CONTENT_LENGTH], "6");
    }

    #[test]
    fn test_replace_body_without_content_length() {
        let mut req = Request::builder()
            .uri("/")
            .body(Bytes::from_static(b"aaa"))
            .unwrap();
        replace_body_content(&mut req, &["a"], "bb");
        assert_eq!(req.body().as_ref(), b"bbbbbb");
        assert!(req.headers().get(CONTENT_LENGTH).is_none());
    }

    #[test]
    fn test_replace_body_no_match_untouched() {
        let mut req = post(b"nothing here");
        replace_body_content(&mut req, &["absent"], "x");
        assert_eq!(req.body().as_ref(), b"nothing here");
        assert_eq!(req.headers()[CONTENT_LENGTH], "12");
    }

    #[test]
    fn test_replace_url_content_keeps_query() {
        let mut req = Request::builder()
            .uri("http://origin.com/test%20/scan?q=hello%2520world&n=1%2B1")
            .body(Bytes::new())
            .unwrap();
        replace_url_content(&mut req, &["test "], "demo").unwrap();
        assert_eq!(req.uri().path(), "/demo/scan");
        assert_eq!(req.uri().query(), Some("q=hello%2520world&n=1%2B1"));
        assert_eq!(req.uri().host(), Some("origin.com"));
        assert_eq!(req.uri().scheme_str(), Some("http"));
    }

    #[test]
    fn test_replace_url_reencodes_segments() {
        let mut req = Request::builder()
            .uri("/files/old/report.pdf")
            .body(Bytes::new())
            .unwrap();
        replace_url_content(&mut req, &["old"], "new dir").unwrap();
        assert_eq!(req.uri().path(), "/files/new%20dir/report.pdf");
        assert_eq!(req.uri().query(), None);
    }

    #[test]
    fn test_replace_url_keeps_segment_delimiters() {
        let mut req = Request::builder()
            .uri("/users/old;v=1/@me:profile+x,y/%E6%B5%8B%E8%AF%95")
            .body(Bytes::new())
            .unwrap();
        replace_url_content(&mut req, &["old"], "new").unwrap();
        assert_eq!(
            req.uri().path(),
            "/users/new;v=1/@me:profile+x,y/%E6%B5%8B%E8%AF%95"
        );
    }

    #[test]
    fn test_replace_url_no_match() {
        let mut req = Request::builder()
            .uri("/a%2Fb?x=1")
            .body(Bytes::new())
            .unwrap();
        replace_url_content(&mut req, &["zzz"], "y").unwrap();
        assert_eq!(req.uri().to_string(), "/a%2Fb?x=1");
    }
}

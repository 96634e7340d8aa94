use serde::Serialize;

/// Path prefix ACME HTTP-01 challenges are served under.
pub const DEFAULT_ACME_CHALLENGE_PATH: &str = "/.well-known/acme-challenge/";

/// Split `host[:port]`, accepting bracketed IPv6 literals.
pub fn split_host_port(host: &str) -> (&str, Option<&str>) {
    if let Some(rest) = host.strip_prefix('[') {
        return match rest.split_once(']') {
            Some((name, tail)) => (name, tail.strip_prefix(':').filter(|p| !p.is_empty())),
            None => (host, None),
        };
    }
    match host.rsplit_once(':') {
        // a bare IPv6 address has more than one colon
        Some((name, port)) if !name.contains(':') && !port.is_empty() => (name, Some(port)),
        _ => (host, None),
    }
}

/// Host matching used for HTTPS upgrades and policy lookup. `configured` may
/// carry a port or a leading `*.` wildcard, which matches any strictly
/// deeper subdomain at a label boundary.
pub(crate) fn host_matches(configured: &str, request_host: &str, request_name: &str) -> bool {
    if configured.eq_ignore_ascii_case(request_host) || configured.eq_ignore_ascii_case(request_name) {
        return true;
    }
    let (configured_name, _) = split_host_port(configured);
    match configured_name.strip_prefix('*') {
        Some(suffix) if suffix.starts_with('.') && suffix.len() > 1 => {
            let name = request_name.to_ascii_lowercase();
            let suffix = suffix.to_ascii_lowercase();
            name.len() > suffix.len() && name.ends_with(&suffix)
        }
        _ => false,
    }
}

/// Decide whether a plain-HTTP request should be redirected to HTTPS.
///
/// Returns the request host with its port stripped when it should.
pub fn should_auto_jump_https(
    request_host: &str,
    configured_host: &str,
    path: &str,
    auto_jump_https: bool,
    ssl: bool,
    acme_challenge_path: &str,
) -> (bool, String) {
    let no = (false, String::new());
    if !auto_jump_https || !ssl {
        return no;
    }
    if !acme_challenge_path.is_empty() && path.starts_with(acme_challenge_path) {
        return no;
    }

    let (name, port) = split_host_port(request_host);
    match port {
        Some(port) if port != "443" => {}
        _ => return no,
    }

    if host_matches(configured_host, request_host, name) {
        (true, name.to_string())
    } else {
        no
    }
}

/// Where the transport should send a redirected client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RedirectTarget {
    pub scheme: String,
    pub host: String,
    pub path_and_query: String,
}

impl RedirectTarget {
    pub fn https(host: impl Into<String>, path_and_query: &str) -> Self {
        let path_and_query = if path_and_query.is_empty() {
            "/".to_string()
        } else {
            path_and_query.to_string()
        };
        Self {
            scheme: "https".to_string(),
            host: host.into(),
            path_and_query,
        }
    }

    /// Value for a `Location` header.
    pub fn location(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        format!("{}://{}{}", self.scheme, host, self.path_and_query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jump(request_host: &str, configured: &str, path: &str) -> (bool, String) {
        should_auto_jump_https(request_host, configured, path, true, true, DEFAULT_ACME_CHALLENGE_PATH)
    }

    #[test]
    fn test_flags_must_both_be_set() {
        let acme = DEFAULT_ACME_CHALLENGE_PATH;
        assert!(!should_auto_jump_https("example.com:80", "example.com", "/test", false, true, acme).0);
        assert!(!should_auto_jump_https("example.com:80", "example.com", "/test", true, false, acme).0);
    }

    #[test]
    fn test_acme_challenge_excluded() {
        assert!(!jump("example.com:80", "example.com", "/.well-known/acme-challenge/xxxxx").0);
        assert!(!jump("example.com:80", "example.com", "/.well-known/acme-challenge/").0);
        // a custom prefix replaces the default one
        let custom = should_auto_jump_https(
            "example.com:80",
            "example.com",
            "/.well-known/acme-challenge/x",
            true,
            true,
            "/acme/",
        );
        assert!(custom.0);
    }

    #[test]
    fn test_ports() {
        for port in ["80", "8080", "8888", "9090", "3000", "5000"] {
            let host = format!("example.com:{}", port);
            assert_eq!(jump(&host, "example.com", "/test"), (true, "example.com".to_string()));
        }
        assert!(!jump("example.com:443", "example.com", "/test").0);
        assert!(!jump("example.com", "example.com", "/test").0);
    }

    #[test]
    fn test_exact_match() {
        assert!(jump("example.com:80", "example.com", "/test").0);
        assert!(!jump("test.com:80", "example.com", "/test").0);
        assert_eq!(
            jump("example.com:8080", "example.com:8080", "/test"),
            (true, "example.com".to_string())
        );
    }

    #[test]
    fn test_wildcard_levels() {
        for host in [
            "aaa.samwaf.com:80",
            "bbb.samwaf.com:8080",
            "bbb.aaa.samwaf.com:80",
            "ccc.bbb.samwaf.com:8080",
            "ddd.ccc.bbb.samwaf.com:80",
            "eee.ddd.ccc.samwaf.com:8888",
            "e.d.c.b.a.samwaf.com:80",
        ] {
            let expected = host.split(':').next().unwrap().to_string();
            assert_eq!(jump(host, "*.samwaf.com", "/test"), (true, expected), "{}", host);
        }
    }

    #[test]
    fn test_wildcard_rejects_apex_and_partial_labels() {
        assert!(!jump("samwaf.com:80", "*.samwaf.com", "/test").0);
        assert!(!jump("aaasamwaf.com:80", "*.samwaf.com", "/test").0);
    }

    #[test]
    fn test_wildcard_suffixes_and_characters() {
        assert_eq!(jump("test.example.cn:80", "*.example.cn", "/test").1, "test.example.cn");
        assert_eq!(jump("api.service.io:8080", "*.service.io", "/api/v1").1, "api.service.io");
        assert_eq!(jump("test-api.example.com:80", "*.example.com", "/test").1, "test-api.example.com");
        assert_eq!(jump("api123.example.com:80", "*.example.com", "/test").1, "api123.example.com");
    }

    #[test]
    fn test_paths() {
        assert!(jump("example.com:80", "example.com", "").0);
        assert!(jump("example.com:80", "example.com", "/").0);
        assert!(jump("example.com:80", "example.com", "/test?param=value").0);
    }

    #[test]
    fn test_split_host_port() {
        assert_eq!(split_host_port("example.com:80"), ("example.com", Some("80")));
        assert_eq!(split_host_port("example.com"), ("example.com", None));
        assert_eq!(split_host_port("[::1]:8080"), ("::1", Some("8080")));
        assert_eq!(split_host_port("::1"), ("::1", None));
    }

    #[test]
    fn test_redirect_target() {
        assert_eq!(
            RedirectTarget::https("example.com", "/a?b=1").location(),
            "https://example.com/a?b=1"
        );
        assert_eq!(RedirectTarget::https("example.com", "").location(), "https://example.com/");
        assert_eq!(RedirectTarget::https("::1", "/").location(), "https://[::1]/");
    }
}

use std::net::{IpAddr, Ipv4Addr};

/// Transport facts about an intercepted request that are not part of the
/// HTTP message itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// Socket peer address.
    pub peer_addr: IpAddr,
    /// The connection is already TLS.
    pub tls: bool,
    /// Port the request was accepted on, used when `Host` carries none.
    pub listen_port: u16,
}

impl RequestContext {
    pub fn new(peer_addr: IpAddr, tls: bool, listen_port: u16) -> Self {
        Self {
            peer_addr,
            tls,
            listen_port,
        }
    }

    pub fn scheme(&self) -> &'static str {
        if self.tls {
            "https"
        } else {
            "http"
        }
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new(IpAddr::V4(Ipv4Addr::LOCALHOST), false, 80)
    }
}

/// Which request an upstream response belongs to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseContext {
    /// `Host` of the originating request.
    pub host: String,
}

impl ResponseContext {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }
}

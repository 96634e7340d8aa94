pub mod https_redirect;
pub mod ip_filter;
pub mod xss_detector;

pub use https_redirect::*;
pub use ip_filter::*;
pub use xss_detector::*;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::rules::RequestFact;

/// Which built-in stage produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Detector {
    AllowIp,
    Xss,
    Rule,
    HttpsRedirect,
    /// Response body could not be decoded.
    Decoder,
}

impl Detector {
    pub fn name(&self) -> &'static str {
        match self {
            Detector::AllowIp => "allow_ip",
            Detector::Xss => "xss",
            Detector::Rule => "rule",
            Detector::HttpsRedirect => "https_redirect",
            Detector::Decoder => "decoder",
        }
    }
}

impl fmt::Display for Detector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of a single detector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetectionResult {
    pub detector: Detector,
    /// Skip the remaining heuristic checks without blocking.
    pub bypass_further_guards: bool,
    pub is_blocked: bool,
    pub title: String,
    pub content: String,
}

impl DetectionResult {
    pub fn pass(detector: Detector) -> Self {
        Self {
            detector,
            bypass_further_guards: false,
            is_blocked: false,
            title: String::new(),
            content: String::new(),
        }
    }

    pub fn bypass(detector: Detector) -> Self {
        Self {
            bypass_further_guards: true,
            ..Self::pass(detector)
        }
    }

    pub fn block(detector: Detector, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            is_blocked: true,
            title: title.into(),
            content: content.into(),
            ..Self::pass(detector)
        }
    }
}

/// Where a host takes the client address from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpMode {
    /// Socket peer address.
    #[default]
    Nic,
    /// First address in the forwarding headers.
    Proxy,
}

impl IpMode {
    pub fn client_ip<'a>(&self, fact: &'a RequestFact) -> &'a str {
        match self {
            IpMode::Nic => &fact.net_src_ip,
            IpMode::Proxy => &fact.src_ip,
        }
    }
}

/// Per-host protection settings, owned by the management side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostPolicy {
    /// Host name, optionally with a port or a leading `*.` wildcard.
    pub host: String,
    pub ip_mode: IpMode,
    pub ip_whitelist: IpAllowList,
    pub guard_enabled: bool,
    pub ssl: bool,
    pub auto_jump_https: bool,
}

impl Default for HostPolicy {
    fn default() -> Self {
        Self {
            host: String::new(),
            ip_mode: IpMode::default(),
            ip_whitelist: IpAllowList::default(),
            guard_enabled: true,
            ssl: false,
            auto_jump_https: false,
        }
    }
}

impl HostPolicy {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    /// Whether `request_host` (with or without a port) is served by this
    /// policy, either exactly or through a `*.` wildcard.
    pub fn matches_host(&self, request_host: &str) -> bool {
        let (name, _) = https_redirect::split_host_port(request_host);
        https_redirect::host_matches(&self.host, request_host, name)
    }
}

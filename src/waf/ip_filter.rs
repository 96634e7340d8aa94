use http::HeaderMap;
use ipnetwork::IpNetwork;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::str::FromStr;

use super::{DetectionResult, Detector, HostPolicy};
use crate::rules::RequestFact;

/// IP allow-list with CIDR notation support
///
/// Entries may be individual addresses ("192.168.1.1", treated as /32 or
/// /128) or CIDR ranges ("10.0.0.0/8", "2001:db8::/32"). Entries that parse
/// as neither are dropped with a warning and never match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct IpAllowList {
    entries: Vec<String>,
    networks: Vec<IpNetwork>,
}

impl IpAllowList {
    pub fn new<S: AsRef<str>>(entries: &[S]) -> Self {
        let mut list = Self::default();
        for entry in entries {
            if let Err(e) = list.add(entry.as_ref()) {
                warn!("Ignoring allow-list entry: {}", e);
            }
        }
        list
    }

    /// Add an IP or CIDR range
    pub fn add(&mut self, ip_or_cidr: &str) -> Result<(), String> {
        let network = parse_ip_or_cidr(ip_or_cidr.trim())?;
        self.entries.push(ip_or_cidr.to_string());
        self.networks.push(network);
        Ok(())
    }

    /// Check whether `ip` falls inside any entry. Unparsable input never
    /// matches. IPv4 and IPv4-mapped IPv6 forms of an address match entries
    /// of either family.
    pub fn contains(&self, ip: &str) -> bool {
        let Ok(ip) = IpAddr::from_str(ip.trim()) else {
            return false;
        };
        let v4 = canonical(ip);
        let mapped = match v4 {
            IpAddr::V4(v4) => IpAddr::V6(v4.to_ipv6_mapped()),
            v6 => v6,
        };
        self.networks
            .iter()
            .any(|network| network.contains(v4) || network.contains(mapped))
    }

    pub fn len(&self) -> usize {
        self.networks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }
}

impl From<Vec<String>> for IpAllowList {
    fn from(entries: Vec<String>) -> Self {
        Self::new(&entries)
    }
}

impl From<IpAllowList> for Vec<String> {
    fn from(list: IpAllowList) -> Self {
        list.entries
    }
}

/// Parse an IP address or CIDR notation string into an IpNetwork
///
/// - "192.168.1.1" -> 192.168.1.1/32
/// - "192.168.1.0/24" -> 192.168.1.0/24
/// - "::1" -> ::1/128
fn parse_ip_or_cidr(input: &str) -> Result<IpNetwork, String> {
    if let Ok(network) = IpNetwork::from_str(input) {
        return Ok(network);
    }

    match IpAddr::from_str(input) {
        Ok(ip) => {
            let ip = canonical(ip);
            let prefix = if ip.is_ipv4() { 32 } else { 128 };
            IpNetwork::new(ip, prefix).map_err(|e| e.to_string())
        }
        Err(_) => Err(format!("Invalid IP address or CIDR notation: {}", input)),
    }
}

/// IPv4-mapped IPv6 addresses are compared as IPv4.
fn canonical(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(ip),
        v4 => v4,
    }
}

/// Client address as seen through proxies: first `X-Forwarded-For` entry,
/// then `X-Real-IP`, then the socket peer.
pub fn client_ip_from_headers(headers: &HeaderMap, peer: IpAddr) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());
    let real_ip = || {
        headers
            .get("x-real-ip")
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
    };

    forwarded
        .or_else(real_ip)
        .map(str::to_string)
        .unwrap_or_else(|| canonical(peer).to_string())
}

/// Allow-list check: the host's own list first, then the global list when
/// the global guard is on. Each scope derives the client address with its
/// own IP mode. A hit lets the request skip the remaining guards.
pub fn check_allow_ip(fact: &RequestFact, local: &HostPolicy, global: &HostPolicy) -> DetectionResult {
    let client_ip = local.ip_mode.client_ip(fact);
    if local.ip_whitelist.contains(client_ip) {
        debug!("{} allow-listed for host {}", client_ip, local.host);
        return DetectionResult::bypass(Detector::AllowIp);
    }

    if global.guard_enabled {
        let client_ip = global.ip_mode.client_ip(fact);
        if global.ip_whitelist.contains(client_ip) {
            debug!("{} allow-listed globally", client_ip);
            return DetectionResult::bypass(Detector::AllowIp);
        }
    }

    DetectionResult::pass(Detector::AllowIp)
}

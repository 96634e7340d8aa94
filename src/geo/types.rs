use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::GeoError;

/// Country value used when an address belongs to a private network.
pub const PRIVATE_NETWORK: &str = "Intranet";
/// Country value returned for input that does not parse as an IP address.
pub const INVALID_IP: &str = "Invalid IP";
/// Country value returned when the backend failed to answer.
pub const LOOKUP_FAILED: &str = "Lookup failed";
/// Country value returned when the backend has no entry for the address.
pub const UNKNOWN: &str = "Unknown";
/// Country value returned when no backend is loaded for the address family.
pub const UNCONFIGURED: &str = "Unconfigured";

/// Unified geolocation answer, independent of the backend that produced it.
///
/// Fields a backend cannot provide stay empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoResult {
    pub country: String,
    pub province: String,
    pub city: String,
    pub isp: String,
    pub region: String,
    pub district: String,
}

impl GeoResult {
    pub(crate) fn with_country(country: impl Into<String>) -> Self {
        Self {
            country: country.into(),
            ..Self::default()
        }
    }

    /// Fields in the legacy slot order: country, region, province, city, ISP.
    pub fn legacy_fields(&self) -> [&str; 5] {
        [
            &self.country,
            &self.region,
            &self.province,
            &self.city,
            &self.isp,
        ]
    }
}

/// Field layout of an ip2region region string.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbFormat {
    /// country|region|province|city|isp
    #[default]
    Legacy,
    /// country|province|city|isp
    OpenSource,
    /// continent|country|province|city|district|isp|other
    Full,
    /// country|province|city|district|isp|other
    Standard,
    /// country|province|city|isp|other
    Compact,
}

impl DbFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            DbFormat::Legacy => "legacy",
            DbFormat::OpenSource => "opensource",
            DbFormat::Full => "full",
            DbFormat::Standard => "standard",
            DbFormat::Compact => "compact",
        }
    }
}

impl fmt::Display for DbFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DbFormat {
    type Err = GeoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "legacy" => Ok(DbFormat::Legacy),
            "opensource" => Ok(DbFormat::OpenSource),
            "full" => Ok(DbFormat::Full),
            "standard" => Ok(DbFormat::Standard),
            "compact" => Ok(DbFormat::Compact),
            other => Err(GeoError::InvalidDatabase {
                source_kind: "ip2region",
                reason: format!("unknown region format '{}'", other),
            }),
        }
    }
}

/// On-disk database family backing one address family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbSource {
    Ip2Region,
    GeoLite2,
}

impl DbSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DbSource::Ip2Region => "ip2region",
            DbSource::GeoLite2 => "geolite2",
        }
    }
}

impl fmt::Display for DbSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DbSource {
    type Err = GeoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ip2region" => Ok(DbSource::Ip2Region),
            "geolite2" => Ok(DbSource::GeoLite2),
            other => Err(GeoError::UnknownSource(other.to_string())),
        }
    }
}

/// Address family a backend serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpFamily {
    V4,
    V6,
}

impl IpFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            IpFamily::V4 => "ipv4",
            IpFamily::V6 => "ipv6",
        }
    }
}

impl fmt::Display for IpFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IpFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ipv4" | "v4" | "4" => Ok(IpFamily::V4),
            "ipv6" | "v6" | "6" => Ok(IpFamily::V6),
            other => Err(format!("invalid address family '{}', expected ipv4 or ipv6", other)),
        }
    }
}

/// Snapshot of what is loaded for each family.
///
/// Times use `%Y-%m-%d %H:%M:%S` and are empty when unset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbStatus {
    pub ipv4_source: String,
    pub ipv4_format: String,
    pub ipv4_file_size: u64,
    pub ipv4_load_time: String,
    pub ipv4_create_time: String,

    pub ipv6_source: String,
    pub ipv6_format: String,
    pub ipv6_file_size: u64,
    pub ipv6_load_time: String,
    pub ipv6_create_time: String,
}

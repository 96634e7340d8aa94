//! MaxMind GeoLite2 country backend.

use std::net::IpAddr;

use log::debug;
use maxminddb::{geoip2, MaxMindDBError, Reader};

use crate::error::GeoError;

use super::types::IpFamily;

const PREFERRED_LANGUAGES: [&str; 2] = ["zh-CN", "en"];

fn invalid(err: MaxMindDBError) -> GeoError {
    GeoError::InvalidDatabase {
        source_kind: "geolite2",
        reason: err.to_string(),
    }
}

/// Country database held fully in memory.
pub struct GeoLiteReader {
    reader: Reader<Vec<u8>>,
}

impl std::fmt::Debug for GeoLiteReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeoLiteReader")
            .field("database_type", &self.reader.metadata.database_type)
            .field("ip_version", &self.reader.metadata.ip_version)
            .field("node_count", &self.reader.metadata.node_count)
            .finish()
    }
}

impl GeoLiteReader {
    /// Parse `buffer` and check it can answer lookups for `family`.
    pub fn from_buffer(family: IpFamily, buffer: Vec<u8>) -> Result<Self, GeoError> {
        let reader = Reader::from_source(buffer).map_err(invalid)?;
        if family == IpFamily::V6 && reader.metadata.ip_version != 6 {
            return Err(GeoError::InvalidDatabase {
                source_kind: "geolite2",
                reason: format!(
                    "ipv{} database cannot serve ipv6 lookups",
                    reader.metadata.ip_version
                ),
            });
        }
        debug!(
            "Parsed {} database with {} nodes",
            reader.metadata.database_type, reader.metadata.node_count
        );
        Ok(Self { reader })
    }

    /// Build time from the metadata, seconds since the Unix epoch.
    pub fn build_epoch(&self) -> u64 {
        self.reader.metadata.build_epoch
    }

    /// Localised country name for `ip`, `None` when the database has no
    /// record or the record carries no usable name.
    pub fn country_name(&self, ip: IpAddr) -> Result<Option<String>, GeoError> {
        let record: geoip2::Country = match self.reader.lookup(ip) {
            Ok(record) => record,
            Err(MaxMindDBError::AddressNotFoundError(_)) => return Ok(None),
            Err(err) => return Err(invalid(err)),
        };

        let name = record
            .country
            .and_then(|country| country.names)
            .and_then(|names| {
                PREFERRED_LANGUAGES
                    .iter()
                    .filter_map(|lang| names.get(*lang))
                    .find(|name| !name.is_empty())
                    .map(|name| name.to_string())
            });
        Ok(name)
    }
}

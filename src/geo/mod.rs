//! Dual-stack IP geolocation with hot-swappable backends.
//!
//! Each address family is served by its own backend, either an ip2region
//! `xdb` buffer or a GeoLite2 country database. Loading builds the new
//! backend completely before it replaces the old one, so a failed reload
//! leaves the previous database serving lookups.

pub mod format;
pub mod geolite;
pub mod store;
pub mod types;
pub mod xdb;

#[cfg(test)]
pub(crate) mod test_support;

pub use format::parse_region;
pub use geolite::GeoLiteReader;
pub use store::GeoStore;
pub use types::*;
pub use xdb::XdbSearcher;

use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, Local, TimeZone};
use log::{info, warn};
use parking_lot::RwLock;

use crate::error::GeoLoadResult;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug)]
enum Backend {
    Ip2Region(XdbSearcher),
    GeoLite2(GeoLiteReader),
}

impl Backend {
    fn source(&self) -> DbSource {
        match self {
            Backend::Ip2Region(_) => DbSource::Ip2Region,
            Backend::GeoLite2(_) => DbSource::GeoLite2,
        }
    }

    fn created_at(&self) -> Option<DateTime<Local>> {
        let secs = match self {
            Backend::Ip2Region(xdb) => i64::from(xdb.created_at()),
            Backend::GeoLite2(reader) => i64::try_from(reader.build_epoch()).ok()?,
        };
        if secs <= 0 {
            return None;
        }
        Local.timestamp_opt(secs, 0).single()
    }
}

#[derive(Debug)]
struct LoadedDb {
    backend: Backend,
    file_size: u64,
    loaded_at: DateTime<Local>,
}

/// A validated backend that is not serving lookups yet.
#[derive(Debug)]
pub(crate) struct PreparedDb(Arc<LoadedDb>);

#[derive(Debug, Default)]
struct Slots {
    v4: Option<Arc<LoadedDb>>,
    v6: Option<Arc<LoadedDb>>,
    v4_format: DbFormat,
    v6_format: DbFormat,
}

impl Slots {
    fn slot_mut(&mut self, family: IpFamily) -> &mut Option<Arc<LoadedDb>> {
        match family {
            IpFamily::V4 => &mut self.v4,
            IpFamily::V6 => &mut self.v6,
        }
    }

    fn format_mut(&mut self, family: IpFamily) -> &mut DbFormat {
        match family {
            IpFamily::V4 => &mut self.v4_format,
            IpFamily::V6 => &mut self.v6_format,
        }
    }
}

/// Geolocation front end shared by the inspector, the rule tester and the
/// admin commands.
#[derive(Debug, Default)]
pub struct GeoManager {
    slots: RwLock<Slots>,
}

impl GeoManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a textual address. Unparsable input yields the
    /// [`INVALID_IP`] sentinel.
    pub fn lookup(&self, ip: &str) -> GeoResult {
        match ip.trim().parse::<IpAddr>() {
            Ok(addr) => self.lookup_addr(addr),
            Err(_) => GeoResult::with_country(INVALID_IP),
        }
    }

    /// Resolve an address. IPv4-mapped IPv6 addresses use the IPv4 backend.
    pub fn lookup_addr(&self, ip: IpAddr) -> GeoResult {
        let ip = match ip {
            IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
                Some(v4) => IpAddr::V4(v4),
                None => IpAddr::V6(v6),
            },
            v4 => v4,
        };
        let family = match ip {
            IpAddr::V4(_) => IpFamily::V4,
            IpAddr::V6(_) => IpFamily::V6,
        };

        let (db, format) = {
            let slots = self.slots.read();
            match family {
                IpFamily::V4 => (slots.v4.clone(), slots.v4_format),
                IpFamily::V6 => (slots.v6.clone(), slots.v6_format),
            }
        };
        let Some(db) = db else {
            return GeoResult::with_country(UNCONFIGURED);
        };

        match &db.backend {
            Backend::Ip2Region(searcher) => match searcher.search(ip) {
                Ok(region) if region.is_empty() => GeoResult::with_country(UNKNOWN),
                Ok(region) => parse_region(&region, format),
                Err(e) => {
                    warn!("ip2region lookup for {} failed: {}", ip, e);
                    GeoResult::with_country(LOOKUP_FAILED)
                }
            },
            Backend::GeoLite2(reader) => match reader.country_name(ip) {
                Ok(Some(name)) => GeoResult::with_country(name),
                // An empty v6 record reads as a private network; v4 stays blank.
                Ok(None) => match family {
                    IpFamily::V4 => GeoResult::default(),
                    IpFamily::V6 => GeoResult::with_country(PRIVATE_NETWORK),
                },
                Err(e) => {
                    warn!("GeoLite2 lookup for {} failed: {}", ip, e);
                    GeoResult::with_country(LOOKUP_FAILED)
                }
            },
        }
    }

    pub fn load_v4_ip2region(&self, buffer: Vec<u8>, format: DbFormat) -> GeoLoadResult<()> {
        self.load(IpFamily::V4, buffer, DbSource::Ip2Region, format)
    }

    pub fn load_v6_ip2region(&self, buffer: Vec<u8>, format: DbFormat) -> GeoLoadResult<()> {
        self.load(IpFamily::V6, buffer, DbSource::Ip2Region, format)
    }

    pub fn load_v4_geolite2(&self, buffer: Vec<u8>) -> GeoLoadResult<()> {
        let format = self.slots.read().v4_format;
        self.load(IpFamily::V4, buffer, DbSource::GeoLite2, format)
    }

    pub fn load_v6_geolite2(&self, buffer: Vec<u8>) -> GeoLoadResult<()> {
        let format = self.slots.read().v6_format;
        self.load(IpFamily::V6, buffer, DbSource::GeoLite2, format)
    }

    pub fn reload_v4(&self, buffer: Vec<u8>, source: DbSource, format: DbFormat) -> GeoLoadResult<()> {
        self.load(IpFamily::V4, buffer, source, format)
    }

    pub fn reload_v6(&self, buffer: Vec<u8>, source: DbSource, format: DbFormat) -> GeoLoadResult<()> {
        self.load(IpFamily::V6, buffer, source, format)
    }

    /// Build a backend for `family` from `buffer` and swap it in.
    pub fn load(
        &self,
        family: IpFamily,
        buffer: Vec<u8>,
        source: DbSource,
        format: DbFormat,
    ) -> GeoLoadResult<()> {
        let prepared = Self::prepare(family, buffer, source)?;
        self.publish(family, prepared, format);
        Ok(())
    }

    /// Validate `buffer` and build a backend without touching the live one.
    pub(crate) fn prepare(family: IpFamily, buffer: Vec<u8>, source: DbSource) -> GeoLoadResult<PreparedDb> {
        let file_size = buffer.len() as u64;
        let backend = match source {
            DbSource::Ip2Region => Backend::Ip2Region(XdbSearcher::from_buffer(family, buffer)?),
            DbSource::GeoLite2 => Backend::GeoLite2(GeoLiteReader::from_buffer(family, buffer)?),
        };
        Ok(PreparedDb(Arc::new(LoadedDb {
            backend,
            file_size,
            loaded_at: Local::now(),
        })))
    }

    /// Make a prepared backend live for `family`.
    pub(crate) fn publish(&self, family: IpFamily, prepared: PreparedDb, format: DbFormat) {
        let PreparedDb(loaded) = prepared;
        let source = loaded.backend.source();
        let file_size = loaded.file_size;
        {
            let mut slots = self.slots.write();
            *slots.slot_mut(family) = Some(loaded);
            *slots.format_mut(family) = format;
        }

        info!(
            "Loaded {} {} database ({} bytes, format {})",
            family, source, file_size, format
        );
    }

    pub fn set_v4_format(&self, format: DbFormat) {
        self.slots.write().v4_format = format;
    }

    pub fn set_v6_format(&self, format: DbFormat) {
        self.slots.write().v6_format = format;
    }

    /// Whether a backend is loaded for `family`.
    pub fn is_loaded(&self, family: IpFamily) -> bool {
        let slots = self.slots.read();
        match family {
            IpFamily::V4 => slots.v4.is_some(),
            IpFamily::V6 => slots.v6.is_some(),
        }
    }

    /// Drop both backends. Lookups report [`UNCONFIGURED`] afterwards.
    pub fn close(&self) {
        let mut slots = self.slots.write();
        slots.v4 = None;
        slots.v6 = None;
        info!("Closed geolocation databases");
    }

    pub fn status(&self) -> DbStatus {
        let slots = self.slots.read();
        let mut status = DbStatus::default();

        if let Some(db) = &slots.v4 {
            status.ipv4_source = db.backend.source().to_string();
            status.ipv4_format = slots.v4_format.to_string();
            status.ipv4_file_size = db.file_size;
            status.ipv4_load_time = db.loaded_at.format(TIME_FORMAT).to_string();
            status.ipv4_create_time = format_time(db.backend.created_at());
        }
        if let Some(db) = &slots.v6 {
            status.ipv6_source = db.backend.source().to_string();
            status.ipv6_format = slots.v6_format.to_string();
            status.ipv6_file_size = db.file_size;
            status.ipv6_load_time = db.loaded_at.format(TIME_FORMAT).to_string();
            status.ipv6_create_time = format_time(db.backend.created_at());
        }

        status
    }
}

pub(crate) fn format_time(time: Option<DateTime<Local>>) -> String {
    time.map(|t| t.format(TIME_FORMAT).to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::test_support::{MmdbBuilder, XdbBuilder};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    fn v4_xdb(region: &str) -> Vec<u8> {
        XdbBuilder::new(IpFamily::V4)
            .range("1.0.0.0", "1.0.0.255", region)
            .range("192.168.0.0", "192.168.255.255", "0|0|0|内网IP|内网IP")
            .build()
    }

    #[test]
    fn test_unconfigured_and_invalid() {
        let manager = GeoManager::new();
        assert_eq!(manager.lookup("1.0.0.1").country, UNCONFIGURED);
        assert_eq!(manager.lookup("::1").country, UNCONFIGURED);
        assert_eq!(manager.lookup("not-an-ip").country, INVALID_IP);
        assert_eq!(manager.lookup("").country, INVALID_IP);
    }

    #[test]
    fn test_ip2region_lookup() {
        let manager = GeoManager::new();
        manager
            .load_v4_ip2region(v4_xdb("中国|0|福建省|福州市|电信"), DbFormat::Legacy)
            .unwrap();

        let result = manager.lookup("1.0.0.7");
        assert_eq!(result.country, "中国");
        assert_eq!(result.province, "福建省");
        assert_eq!(result.isp, "电信");

        assert_eq!(manager.lookup("192.168.1.1").country, PRIVATE_NETWORK);
        assert_eq!(manager.lookup("9.9.9.9").country, UNKNOWN);
    }

    #[test]
    fn test_ipv4_mapped_uses_v4_backend() {
        let manager = GeoManager::new();
        manager
            .load_v4_ip2region(v4_xdb("中国|0|福建省|福州市|电信"), DbFormat::Legacy)
            .unwrap();
        assert_eq!(manager.lookup("::ffff:1.0.0.7").country, "中国");
    }

    #[test]
    fn test_set_format_changes_parsing() {
        let manager = GeoManager::new();
        manager
            .load_v4_ip2region(v4_xdb("中国|福建省|福州市|电信"), DbFormat::Legacy)
            .unwrap();
        assert_eq!(manager.lookup("1.0.0.7").province, "福州市");

        manager.set_v4_format(DbFormat::OpenSource);
        let result = manager.lookup("1.0.0.7");
        assert_eq!(result.province, "福建省");
        assert_eq!(result.isp, "电信");
    }

    #[test]
    fn test_geolite_family_asymmetry() {
        let manager = GeoManager::new();
        let v4 = MmdbBuilder::new(4)
            .country("8.8.8.0", 24, &[("en", "United States")])
            .build();
        let v6 = MmdbBuilder::new(6)
            .country("2001:db8::", 32, &[("zh-CN", "德国")])
            .build();
        manager.load_v4_geolite2(v4).unwrap();
        manager.load_v6_geolite2(v6).unwrap();

        assert_eq!(manager.lookup("8.8.8.8").country, "United States");
        assert_eq!(manager.lookup("2001:db8::5").country, "德国");

        assert_eq!(manager.lookup("4.4.4.4").country, "");
        assert_eq!(manager.lookup("2a00::1").country, PRIVATE_NETWORK);
    }

    #[test]
    fn test_failed_reload_keeps_previous_backend() {
        let manager = GeoManager::new();
        manager
            .load_v4_ip2region(v4_xdb("中国|0|福建省|福州市|电信"), DbFormat::Legacy)
            .unwrap();
        let before = manager.status();

        let err = manager.reload_v4(vec![0u8; 64], DbSource::Ip2Region, DbFormat::Full);
        assert!(err.is_err());

        assert_eq!(manager.lookup("1.0.0.7").country, "中国");
        let after = manager.status();
        assert_eq!(after.ipv4_format, "legacy");
        assert_eq!(after.ipv4_file_size, before.ipv4_file_size);
    }

    #[test]
    fn test_status_and_close() {
        let manager = GeoManager::new();
        let buffer = v4_xdb("中国|0|福建省|福州市|电信");
        let size = buffer.len() as u64;
        manager.load_v4_ip2region(buffer, DbFormat::Full).unwrap();

        let status = manager.status();
        assert_eq!(status.ipv4_source, "ip2region");
        assert_eq!(status.ipv4_format, "full");
        assert_eq!(status.ipv4_file_size, size);
        assert_eq!(status.ipv4_load_time.len(), 19);
        assert_eq!(status.ipv4_create_time.len(), 19);
        assert_eq!(status.ipv6_source, "");

        manager.close();
        assert!(!manager.is_loaded(IpFamily::V4));
        assert_eq!(manager.lookup("1.0.0.7").country, UNCONFIGURED);
        assert_eq!(manager.status(), DbStatus::default());
    }

    #[test]
    fn test_concurrent_reload_and_lookup() {
        let manager = Arc::new(GeoManager::new());
        manager
            .load_v4_ip2region(v4_xdb("甲|0|0|0|0"), DbFormat::Legacy)
            .unwrap();
        let stop = Arc::new(AtomicBool::new(false));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let manager = Arc::clone(&manager);
                let stop = Arc::clone(&stop);
                thread::spawn(move || {
                    while !stop.load(Ordering::Relaxed) {
                        let country = manager.lookup("1.0.0.1").country;
                        assert!(country == "甲" || country == "乙", "torn read: {}", country);
                    }
                })
            })
            .collect();

        let a = v4_xdb("甲|0|0|0|0");
        let b = v4_xdb("乙|0|0|0|0");
        for i in 0..20 {
            let buffer = if i % 2 == 0 { b.clone() } else { a.clone() };
            manager
                .reload_v4(buffer, DbSource::Ip2Region, DbFormat::Legacy)
                .unwrap();
        }

        stop.store(true, Ordering::Relaxed);
        for reader in readers {
            reader.join().unwrap();
        }
    }
}

//! On-disk database management for the geolocation manager.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Local};
use log::{error, info, warn};
use parking_lot::Mutex;

use crate::config::{GeoBackendConfig, GeolocationConfig};
use crate::error::{GeoError, GeoLoadResult};
use crate::metrics::MetricsCollector;

use super::{format_time, DbSource, DbStatus, GeoManager, IpFamily};

pub const IP2REGION_V4_FILE: &str = "ip2region.xdb";
pub const IP2REGION_V6_FILE: &str = "ip2region_v6.xdb";
pub const GEOLITE2_FILE: &str = "GeoLite2-Country.mmdb";

/// File name a database of `source` is stored under for `family`.
pub fn file_name_for(family: IpFamily, source: DbSource) -> &'static str {
    match (source, family) {
        (DbSource::Ip2Region, IpFamily::V4) => IP2REGION_V4_FILE,
        (DbSource::Ip2Region, IpFamily::V6) => IP2REGION_V6_FILE,
        (DbSource::GeoLite2, _) => GEOLITE2_FILE,
    }
}

/// Backend kind implied by an uploaded file name.
pub fn source_for_file(file_name: &str) -> GeoLoadResult<DbSource> {
    let extension = Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());
    match extension.as_deref() {
        Some("xdb") => Ok(DbSource::Ip2Region),
        Some("mmdb") => Ok(DbSource::GeoLite2),
        _ => Err(GeoError::UnsupportedFile(file_name.to_string())),
    }
}

/// Data directory plus the configured backend per family.
pub struct GeoStore {
    manager: Arc<GeoManager>,
    data_dir: PathBuf,
    ipv4: Mutex<GeoBackendConfig>,
    ipv6: Mutex<GeoBackendConfig>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl GeoStore {
    pub fn new(manager: Arc<GeoManager>, config: &GeolocationConfig) -> Self {
        Self {
            manager,
            data_dir: PathBuf::from(&config.data_dir),
            ipv4: Mutex::new(config.ipv4.clone()),
            ipv6: Mutex::new(config.ipv6.clone()),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn manager(&self) -> &Arc<GeoManager> {
        &self.manager
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn backend(&self, family: IpFamily) -> GeoBackendConfig {
        match family {
            IpFamily::V4 => self.ipv4.lock().clone(),
            IpFamily::V6 => self.ipv6.lock().clone(),
        }
    }

    /// Path of the database currently configured for `family`.
    pub fn path_for(&self, family: IpFamily) -> PathBuf {
        let backend = self.backend(family);
        self.data_dir.join(file_name_for(family, backend.source))
    }

    fn record(&self, family: IpFamily, success: bool) {
        if let Some(metrics) = &self.metrics {
            metrics.record_geo_reload(family, success);
        }
    }

    /// Store an uploaded database for `family` and make it live.
    ///
    /// The bytes are validated first, then written to a temporary file that
    /// replaces the stored database. The manager switches over only after
    /// the file is in place. Any failure removes the temporary file and
    /// leaves both disk and manager untouched.
    pub fn install(&self, family: IpFamily, file_name: &str, bytes: Vec<u8>) -> GeoLoadResult<PathBuf> {
        let source = source_for_file(file_name)?;
        let target = self.data_dir.join(file_name_for(family, source));
        let tmp = PathBuf::from(format!("{}.tmp", target.display()));

        fs::create_dir_all(&self.data_dir)?;
        fs::write(&tmp, &bytes)?;

        let prepared = match GeoManager::prepare(family, bytes, source) {
            Ok(prepared) => prepared,
            Err(e) => {
                error!("Rejected uploaded {} database {}: {}", family, file_name, e);
                self.record(family, false);
                let _ = fs::remove_file(&tmp);
                return Err(e);
            }
        };

        if let Err(e) = fs::rename(&tmp, &target) {
            error!("Failed to move {} into place: {}", tmp.display(), e);
            self.record(family, false);
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }

        let format = self.backend(family).format;
        self.manager.publish(family, prepared, format);
        match family {
            IpFamily::V4 => self.ipv4.lock().source = source,
            IpFamily::V6 => self.ipv6.lock().source = source,
        }
        self.record(family, true);
        info!("Installed {} database at {}", family, target.display());
        Ok(target)
    }

    /// Load every configured database file that exists.
    ///
    /// Returns the families that were loaded. The first failure aborts.
    pub fn reload(&self) -> GeoLoadResult<Vec<IpFamily>> {
        let mut loaded = Vec::new();
        for family in [IpFamily::V4, IpFamily::V6] {
            let backend = self.backend(family);
            let path = self.path_for(family);
            if !path.exists() {
                warn!("No {} database at {}, skipping", family, path.display());
                continue;
            }

            let result = fs::read(&path)
                .map_err(GeoError::from)
                .and_then(|bytes| self.manager.load(family, bytes, backend.source, backend.format));
            self.record(family, result.is_ok());
            if let Err(e) = result {
                error!("Failed to reload {}: {}", path.display(), e);
                return Err(e);
            }
            loaded.push(family);
        }
        Ok(loaded)
    }

    /// Manager status with create times taken from file modification times
    /// where the files exist.
    pub fn status(&self) -> DbStatus {
        let mut status = self.manager.status();
        let mtime = |family| -> Option<String> {
            let modified = fs::metadata(self.path_for(family)).ok()?.modified().ok()?;
            Some(format_time(Some(DateTime::<Local>::from(modified))))
        };

        if self.manager.is_loaded(IpFamily::V4) {
            if let Some(time) = mtime(IpFamily::V4) {
                status.ipv4_create_time = time;
            }
        }
        if self.manager.is_loaded(IpFamily::V6) {
            if let Some(time) = mtime(IpFamily::V6) {
                status.ipv6_create_time = time;
            }
        }
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::test_support::{MmdbBuilder, XdbBuilder};
    use crate::geo::{DbFormat, UNCONFIGURED};
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> GeoStore {
        let config = GeolocationConfig {
            data_dir: dir.path().to_string_lossy().into_owned(),
            ..GeolocationConfig::default()
        };
        GeoStore::new(Arc::new(GeoManager::new()), &config)
    }

    fn xdb() -> Vec<u8> {
        XdbBuilder::new(IpFamily::V4)
            .range("1.0.0.0", "1.0.0.255", "中国|0|福建省|福州市|电信")
            .build()
    }

    #[test]
    fn test_source_for_file() {
        assert_eq!(source_for_file("ip2region.XDB").unwrap(), DbSource::Ip2Region);
        assert_eq!(source_for_file("GeoLite2-Country.mmdb").unwrap(), DbSource::GeoLite2);
        assert!(matches!(
            source_for_file("db.csv"),
            Err(GeoError::UnsupportedFile(_))
        ));
    }

    #[test]
    fn test_install_writes_and_loads() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let path = store.install(IpFamily::V4, "upload.xdb", xdb()).unwrap();
        assert_eq!(path, dir.path().join(IP2REGION_V4_FILE));
        assert!(path.exists());
        assert!(!dir.path().join("ip2region.xdb.tmp").exists());
        assert_eq!(store.manager().lookup("1.0.0.1").country, "中国");
    }

    #[test]
    fn test_install_invalid_leaves_nothing_behind() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        assert!(store.install(IpFamily::V4, "bad.xdb", vec![1, 2, 3]).is_err());
        assert!(!dir.path().join(IP2REGION_V4_FILE).exists());
        assert!(!dir.path().join("ip2region.xdb.tmp").exists());
        assert_eq!(store.manager().lookup("1.0.0.1").country, UNCONFIGURED);
    }

    #[test]
    fn test_install_failing_rename_keeps_live_database() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store
            .manager()
            .load_v4_ip2region(xdb(), DbFormat::Legacy)
            .unwrap();
        // a directory in the way makes the final rename fail
        fs::create_dir(dir.path().join(IP2REGION_V4_FILE)).unwrap();
        fs::write(dir.path().join(IP2REGION_V4_FILE).join("keep"), b"x").unwrap();
        let before = store.manager().status();

        let replacement = XdbBuilder::new(IpFamily::V4)
            .range("1.0.0.0", "1.0.0.255", "日本|0|东京都|东京|NTT")
            .build();
        assert!(store.install(IpFamily::V4, "upload.xdb", replacement).is_err());

        assert_eq!(store.manager().status(), before);
        assert_eq!(store.manager().lookup("1.0.0.1").country, "中国");
        assert!(!dir.path().join("ip2region.xdb.tmp").exists());
    }

    #[test]
    fn test_install_switches_source() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let mmdb = MmdbBuilder::new(6)
            .country("2001:db8::", 32, &[("en", "Japan")])
            .build();

        store.install(IpFamily::V6, "GeoLite2-Country.mmdb", mmdb).unwrap();
        assert_eq!(store.path_for(IpFamily::V6), dir.path().join(GEOLITE2_FILE));
        assert_eq!(store.manager().lookup("2001:db8::1").country, "Japan");
    }

    #[test]
    fn test_reload_from_disk() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(IP2REGION_V4_FILE), xdb()).unwrap();
        let store = store(&dir);

        let loaded = store.reload().unwrap();
        assert_eq!(loaded, vec![IpFamily::V4]);
        assert_eq!(store.manager().lookup("1.0.0.1").province, "福建省");

        let status = store.status();
        assert_eq!(status.ipv4_source, "ip2region");
        assert_eq!(status.ipv4_format, DbFormat::Legacy.to_string());
        assert_eq!(status.ipv4_create_time.len(), 19);
        assert_eq!(status.ipv6_source, "");
    }

    #[test]
    fn test_reload_aborts_on_corrupt_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(IP2REGION_V4_FILE), b"corrupt").unwrap();
        let store = store(&dir);
        assert!(store.reload().is_err());
    }
}

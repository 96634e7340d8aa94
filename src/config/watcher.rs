use log::{error, info, warn};
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::geo::store::GeoStore;
use crate::geo::IpFamily;

/// Whether `path` names a geolocation database (not an in-progress upload).
pub fn is_database_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("xdb") | Some("mmdb")
    )
}

/// Watches the geolocation data directory and reloads the databases when a
/// file in it changes.
pub struct GeoDbWatcher {
    data_dir: PathBuf,
    watcher: Option<RecommendedWatcher>,
    enabled: bool,
}

impl GeoDbWatcher {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            watcher: None,
            enabled: false,
        }
    }

    /// Start watching for database changes
    ///
    /// Returns a receiver that yields the families reloaded after each
    /// change.
    pub fn start_watching(&mut self, store: Arc<GeoStore>) -> Result<mpsc::Receiver<Vec<IpFamily>>, String> {
        let (tx, rx) = mpsc::channel::<Vec<IpFamily>>();
        let (notify_tx, notify_rx) = mpsc::channel::<Result<Event, notify::Error>>();

        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = notify_tx.send(res);
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )
        .map_err(|e| format!("Failed to create file watcher: {}", e))?;

        watcher
            .watch(&self.data_dir, RecursiveMode::NonRecursive)
            .map_err(|e| format!("Failed to watch {}: {}", self.data_dir.display(), e))?;
        self.watcher = Some(watcher);

        thread::spawn(move || {
            let debounce = Duration::from_secs(2);
            let mut last_reload: Option<Instant> = None;

            loop {
                match notify_rx.recv_timeout(Duration::from_secs(5)) {
                    Ok(Ok(event)) => {
                        let relevant = (event.kind.is_modify() || event.kind.is_create())
                            && event.paths.iter().any(|p| is_database_file(p));
                        if !relevant {
                            continue;
                        }
                        if last_reload.is_some_and(|at| at.elapsed() < debounce) {
                            continue;
                        }

                        info!("Geolocation database changed, reloading...");

                        // Give the writer time to finish
                        thread::sleep(Duration::from_millis(100));

                        match store.reload() {
                            Ok(families) => {
                                last_reload = Some(Instant::now());
                                if tx.send(families).is_err() {
                                    info!("Geolocation watcher receiver dropped");
                                    break;
                                }
                            }
                            Err(e) => {
                                error!("Failed to reload geolocation databases: {}", e);
                                warn!("Keeping previously loaded databases");
                            }
                        }
                    }
                    Ok(Err(e)) => {
                        error!("File watch error: {}", e);
                    }
                    Err(mpsc::RecvTimeoutError::Timeout) => {}
                    Err(mpsc::RecvTimeoutError::Disconnected) => {
                        info!("Geolocation watcher channel disconnected");
                        break;
                    }
                }
            }
        });

        self.enabled = true;
        info!("Watching geolocation databases in {}", self.data_dir.display());

        Ok(rx)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

use std::fs;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::config::STAGING_PREFIX;
use crate::session::SessionTable;
use crate::store::{read_sidecar, ContentStore};
use crate::{DropError, DropResult, ObjectId, StoreConfig};

const GIGABYTE: f64 = 1_000_000_000.0;
const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Lifetime of an object of `size` bytes: `minutes_per_gigabyte` scaled by 1 GB / size.
///
/// Empty objects are treated as one byte long.
pub fn ttl_for_size(size: u64, minutes_per_gigabyte: f64) -> Duration {
    let size = size.max(1) as f64;
    let secs = minutes_per_gigabyte * (GIGABYTE / size) * 60.0;
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

/// Outcome of one age-based sweep
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub staging_removed: usize,
    pub skipped: usize,
}

/// Age-based expiry and capacity eviction over the content directory
pub struct RetentionManager {
    store: Arc<ContentStore>,
    sessions: SessionTable,
    config: StoreConfig,
}

impl RetentionManager {
    pub fn new(store: Arc<ContentStore>, sessions: SessionTable, config: StoreConfig) -> Self {
        Self {
            store,
            sessions,
            config,
        }
    }

    /// Run the sweep at startup and then every `sweep_interval`
    pub async fn start(self: Arc<Self>) {
        let mut ticker = interval(self.config.sweep_interval.max(MIN_SWEEP_INTERVAL));
        let mut startup = true;

        info!("Starting retention sweep with interval: {:?}", self.config.sweep_interval);

        loop {
            ticker.tick().await;

            let manager = self.clone();
            let sweep = tokio::task::spawn_blocking(move || {
                manager.sweep_expired(Utc::now(), startup)
            })
            .await;

            match sweep {
                Ok(Ok(report)) => {
                    if report.expired > 0 || report.staging_removed > 0 {
                        info!(
                            expired = report.expired,
                            staging_removed = report.staging_removed,
                            skipped = report.skipped,
                            "retention sweep finished"
                        );
                    } else {
                        debug!("No expired objects found");
                    }
                }
                Ok(Err(e)) => warn!("Error during retention sweep: {}", e),
                Err(e) => warn!("Retention sweep task failed: {}", e),
            }

            self.sessions.evict_stale(self.config.max_wait);
            startup = false;
        }
    }

    /// Delete every published object whose age has reached its TTL.
    ///
    /// Staging artifacts are purged once older than both the sweep interval and
    /// `max_wait`, so chunks of a session that may still complete are kept. All of
    /// them go when `purge_all_staging` is set.
    pub fn sweep_expired(&self, now: DateTime<Utc>, purge_all_staging: bool) -> DropResult<SweepReport> {
        let mut report = SweepReport::default();
        let now_sys: SystemTime = now.into();
        let staging_max_age = self.config.sweep_interval.max(self.config.max_wait);

        for entry in fs::read_dir(self.store.root())? {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "failed to read content directory entry");
                    continue;
                }
            };
            let name = entry.file_name().to_string_lossy().into_owned();
            let path = entry.path();

            if name.starts_with(STAGING_PREFIX) {
                let stale = purge_all_staging
                    || entry
                        .metadata()
                        .and_then(|m| m.modified())
                        .map(|modified| {
                            now_sys.duration_since(modified).unwrap_or(Duration::ZERO)
                                >= staging_max_age
                        })
                        .unwrap_or(false);
                if stale {
                    let removed = if path.is_dir() {
                        fs::remove_dir_all(&path)
                    } else {
                        fs::remove_file(&path)
                    };
                    match removed {
                        Ok(()) => {
                            debug!(path = %path.display(), "removed staging artifact");
                            report.staging_removed += 1;
                        }
                        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove staging artifact"),
                    }
                }
                continue;
            }

            if !path.is_dir() {
                continue;
            }

            let id = ObjectId(name);
            let object = match read_sidecar(&path.join(id.sidecar_name())) {
                Ok(object) => object,
                Err(e) => {
                    debug!(id = %id, error = %e, "skipping directory without readable metadata");
                    report.skipped += 1;
                    continue;
                }
            };

            if now < object.expires_at(self.config.minutes_per_gigabyte) {
                continue;
            }

            match self.store.remove(&id) {
                Ok(()) => {
                    info!(id = %id, size = object.size, "expired object");
                    report.expired += 1;
                }
                Err(e) => warn!(id = %id, error = %e, "failed to remove expired object"),
            }
        }

        Ok(report)
    }

    /// Evict the largest objects until the directory fits `max_bytes_total`.
    ///
    /// Returns the number of objects evicted.
    pub fn enforce_capacity(&self) -> DropResult<usize> {
        let mut evicted = 0;

        for _ in 0..self.config.trim_max_iterations {
            let snapshot = self.store.snapshot()?;
            if snapshot.total_bytes <= self.config.max_bytes_total {
                break;
            }
            let Some((id, bytes)) = snapshot.largest else {
                break;
            };

            match self.store.remove(&id) {
                Ok(()) => {
                    info!(
                        id = %id,
                        bytes,
                        total = snapshot.total_bytes,
                        max = self.config.max_bytes_total,
                        "evicted largest object over capacity"
                    );
                    evicted += 1;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!(id = %id, "object already removed");
                }
                Err(e) => {
                    warn!(id = %id, error = %e, "failed to evict object");
                    return Err(DropError::from(e));
                }
            }
        }

        Ok(evicted)
    }
}

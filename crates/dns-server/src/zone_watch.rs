use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use dns_types::zones::types::{Zone, ZoneStore};
use tokio::sync::RwLock;
use tokio::time::{interval, Duration};

/// Load every configured zone file into a fresh `ZoneStore`.
pub async fn load_all(zone_files: &[PathBuf]) -> ZoneStore {
    let mut store = ZoneStore::new();
    for path in zone_files {
        match load_one(path).await {
            Ok(zone) => store.insert(zone),
            Err(error) => tracing::warn!(?path, ?error, "could not load zone file"),
        }
    }
    store
}

async fn load_one(path: &Path) -> Result<Zone, LoadError> {
    let data = tokio::fs::read_to_string(path)
        .await
        .map_err(LoadError::Io)?;
    let mtime = tokio::fs::metadata(path)
        .await
        .and_then(|m| m.modified())
        .unwrap_or_else(|_| SystemTime::now());
    let mut zone = Zone::deserialise(&data).map_err(LoadError::Parse)?;
    zone.set_source(path.to_path_buf(), mtime);
    Ok(zone)
}

#[derive(Debug)]
enum LoadError {
    Io(std::io::Error),
    Parse(dns_types::zones::deserialise::Error),
}

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadError::Io(e) => write!(f, "{e}"),
            LoadError::Parse(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for LoadError {}

/// Periodically re-check every loaded zone file's mtime, and reload
/// and swap in any which changed. Runs until the process exits.
pub async fn poll_for_changes(
    zone_files: Vec<PathBuf>,
    store: Arc<RwLock<ZoneStore>>,
    period: Duration,
) {
    let mut ticker = interval(period);
    loop {
        ticker.tick().await;

        for path in &zone_files {
            let current_mtime = match tokio::fs::metadata(path).await.and_then(|m| m.modified()) {
                Ok(mtime) => mtime,
                Err(error) => {
                    tracing::warn!(?path, ?error, "could not stat zone file");
                    continue;
                }
            };

            let needs_reload = {
                let guard = store.read().await;
                let apex = guard
                    .zones()
                    .values()
                    .find(|z| z.source().is_some_and(|s| &s.path == path))
                    .map(|z| z.get_apex().clone());
                match apex {
                    Some(apex) => guard
                        .zones()
                        .get(&apex)
                        .and_then(|z| z.source())
                        .is_some_and(|s| s.loaded_mtime < current_mtime),
                    None => true,
                }
            };

            if !needs_reload {
                continue;
            }

            match load_one(path).await {
                Ok(zone) => {
                    tracing::info!(?path, apex = %zone.get_apex().to_dotted_string(), "reloaded zone");
                    store.write().await.insert(zone);
                }
                Err(error) => {
                    tracing::warn!(?path, ?error, "could not reload zone file, keeping old data");
                }
            }
        }
    }
}

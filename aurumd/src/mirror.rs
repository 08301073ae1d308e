//! Account snapshot mirror.
//!
//! Periodically rewrites `account_info.json` with the latest account
//! snapshot, last writer wins. A passive output for an external
//! dashboard; nothing in the trading path reads it back.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use aurum_bridge::MarketDataCache;
use tempfile::NamedTempFile;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Spawn the mirror task.
pub fn spawn_account_mirror(
    cache: Arc<MarketDataCache>,
    path: PathBuf,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }

            let Some(account) = cache.latest_account() else {
                continue;
            };
            if let Err(e) = write_snapshot(&path, &account) {
                warn!(error = %e, "Account mirror write failed");
            } else {
                debug!(balance = %account.balance, "Account mirror updated");
            }
        }
    })
}

fn write_snapshot(
    path: &PathBuf,
    account: &aurum_domain::AccountSnapshot,
) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
    let tmp = NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(tmp.as_file(), account)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::observability::WAL_COMPACTIONS_TOTAL;
use crate::store::{Database, StoreError};

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that rewrites the WAL once enough appends pile up.
pub async fn run_compactor(db: Arc<Database>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        if let Err(e) = compact_if_needed(&db, threshold).await {
            warn!("WAL compaction failed: {e}");
        }
    }
}

/// Returns whether a compaction ran.
pub async fn compact_if_needed(db: &Database, threshold: u64) -> Result<bool, StoreError> {
    let appends = db.wal_appends_since_compact().await;
    if appends < threshold {
        debug!("{appends} WAL appends since last compaction, below {threshold}");
        return Ok(false);
    }
    db.compact_wal().await?;
    metrics::counter!(WAL_COMPACTIONS_TOTAL).increment(1);
    info!("compacted WAL after {appends} appends");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use crate::notify::NotifyHub;
    use crate::store::Store;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("slotkeeper_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn client(name: &str) -> Client {
        Client {
            id: Ulid::new(),
            full_name: name.into(),
            email: None,
            phone: None,
            notes: None,
        }
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let path = test_wal_path("threshold.wal");
        let db = Database::open(path.clone(), Arc::new(NotifyHub::new())).unwrap();

        let mut marta = client("Marta Gil");
        db.save_client(marta.clone()).await.unwrap();
        for phone in ["1", "2", "3"] {
            marta.phone = Some(phone.into());
            db.save_client(marta.clone()).await.unwrap();
        }

        assert!(!compact_if_needed(&db, 10).await.unwrap());
        assert_eq!(db.wal_appends_since_compact().await, 4);

        assert!(compact_if_needed(&db, 4).await.unwrap());
        assert_eq!(db.wal_appends_since_compact().await, 0);
        drop(db);

        let reopened = Database::open(path, Arc::new(NotifyHub::new())).unwrap();
        let stored = reopened.get_client(marta.id).await.unwrap().unwrap();
        assert_eq!(stored.phone.as_deref(), Some("3"));
    }
}

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error};

use crate::engine::Engine;
use crate::observability;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that rewrites the WAL once enough events have piled up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_due(&engine, threshold).await;
    }
}

/// Returns true when a compaction ran and succeeded.
pub async fn compact_if_due(engine: &Engine, threshold: u64) -> bool {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match engine.compact_wal().await {
        Ok(events) => {
            debug!(appends, events, "compaction finished");
            metrics::counter!(observability::COMPACTIONS_TOTAL).increment(1);
            true
        }
        Err(e) => {
            error!("WAL compaction failed: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BookingPolicy;
    use crate::model::NewRoom;
    use std::path::PathBuf;
    use tokio_test::assert_ok;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("roombook_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn room(id: Ulid) -> NewRoom {
        NewRoom {
            id,
            building_id: Ulid::new(),
            category_id: Ulid::new(),
            name: "Lab 2".into(),
            capacity: 20,
            status: None,
            hours: None,
            requires_approval: None,
        }
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let path = test_wal_path("threshold.wal");
        let engine = Engine::new(path, BookingPolicy::default()).unwrap();

        assert_ok!(engine.create_room(room(Ulid::new())).await);
        assert!(!compact_if_due(&engine, 2).await);
        assert_eq!(engine.wal_appends_since_compact().await, 1);

        assert_ok!(engine.create_room(room(Ulid::new())).await);
        assert!(compact_if_due(&engine, 2).await);
        assert_eq!(engine.wal_appends_since_compact().await, 0);
        assert_eq!(engine.list_rooms().await.len(), 2);
    }
}

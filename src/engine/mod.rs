mod availability;
mod bookings;
mod conflict;
mod error;
mod mutations;
mod queries;
mod store;

pub use availability::{
    check_date, check_range, free_windows, merge_overlapping, resolve_rules, subtract_windows,
    AvailabilityResult, Blocker, Occupancy, Unavailability, UnavailableReason,
};
pub use bookings::Decision;
pub use error::EngineError;
pub use store::RoomStore;

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, OwnedRwLockWriteGuard, RwLock};
use tracing::info;
use ulid::Ulid;

use crate::config::BookingPolicy;
use crate::model::*;
use crate::wal::Wal;

pub type SharedRoomState = Arc<RwLock<RoomState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Drain every Append already queued (the batch window).
/// 3. One flush_sync for the whole batch, then answer every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }
                commit_batch(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so half-written bytes don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let _ = response.send(wal.compact(&events));
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let mut batch = vec![(event, response)];
            commit_batch(wal, &mut batch);
        }
    }
}

pub struct Engine {
    pub(super) store: RoomStore,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Room creation holds this shared; compaction holds it exclusively.
    pub(super) rooms_gate: RwLock<()>,
    pub policy: BookingPolicy,
}

impl Engine {
    /// Replay the log at `wal_path` and start its writer task. Must run inside a Tokio runtime.
    pub fn new(wal_path: PathBuf, policy: BookingPolicy) -> io::Result<Self> {
        let (wal, records) = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let store = RoomStore::new();
        // Rebuild plain states first, then share them; no locks during replay.
        let mut rooms: HashMap<Ulid, RoomState> = HashMap::new();
        for record in &records {
            match &record.event {
                Event::RoomCreated { room } => {
                    rooms.insert(room.id, RoomState::new(room.clone()));
                }
                other => {
                    if let Some(rs) = rooms.get_mut(&other.room_id()) {
                        store.apply_event(rs, other);
                    }
                }
            }
        }
        let room_count = rooms.len();
        for (id, rs) in rooms {
            store.insert_room(id, Arc::new(RwLock::new(rs)));
        }
        info!(
            records = records.len(),
            rooms = room_count,
            "replayed {}",
            wal_path.display()
        );

        Ok(Self {
            store,
            wal_tx,
            rooms_gate: RwLock::new(()),
            policy,
        })
    }

    /// Write event to the WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_room(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.store.get_room(id)
    }

    /// WAL-append then apply, with the room's write lock held by the caller.
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut RoomState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.store.apply_event(rs, event);
        Ok(())
    }

    /// Write lock on a room that exists and is not soft-deleted.
    pub(super) async fn live_room_write(
        &self,
        room_id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<RoomState>, EngineError> {
        let rs = self
            .store
            .get_room(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.write_owned().await;
        if guard.room.deleted_at.is_some() {
            return Err(EngineError::NotFound(room_id));
        }
        Ok(guard)
    }

    /// Persist the event that introduces `entity_id`, claiming the id first.
    /// Two racing inserts of one id cannot both pass; the loser gets `AlreadyExists`.
    pub(super) async fn persist_new_entity(
        &self,
        entity_id: Ulid,
        rs: &mut RoomState,
        event: &Event,
    ) -> Result<(), EngineError> {
        if !self.store.reserve_entity(entity_id, rs.room.id) {
            return Err(EngineError::AlreadyExists(entity_id));
        }
        let result = self.persist_and_apply(rs, event).await;
        if result.is_err() {
            self.store.release_entity(&entity_id);
        }
        result
    }

    /// `resolve_entity_write` for changes that need the owning room to still exist.
    pub(super) async fn live_entity_write(
        &self,
        entity_id: &Ulid,
    ) -> Result<(Ulid, OwnedRwLockWriteGuard<RoomState>), EngineError> {
        let (room_id, guard) = self.resolve_entity_write(entity_id).await?;
        if guard.room.deleted_at.is_some() {
            return Err(EngineError::NotFound(room_id));
        }
        Ok((room_id, guard))
    }

    /// Lookup entity → room, then take that room's write lock.
    pub(super) async fn resolve_entity_write(
        &self,
        entity_id: &Ulid,
    ) -> Result<(Ulid, OwnedRwLockWriteGuard<RoomState>), EngineError> {
        let room_id = self
            .store
            .room_for_entity(entity_id)
            .ok_or(EngineError::NotFound(*entity_id))?;
        let rs = self
            .store
            .get_room(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.write_owned().await;
        Ok((room_id, guard))
    }
}

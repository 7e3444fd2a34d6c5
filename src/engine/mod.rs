mod adjacency;
mod aggregate;
mod classify;
mod conflict;
mod error;
mod mutations;
mod queries;
mod store;
mod workflow;
#[cfg(test)]
mod tests;

pub use adjacency::{adjacent, resolve_many};
pub use aggregate::aggregate;
pub use classify::{classify, parse_bucket, parse_page};
pub use conflict::{find_conflict, has_conflict};
pub use error::{EngineError, Entity, ErrorKind};
pub use store::{InMemoryStore, SharedItemState};
pub use workflow::{Decision, transition};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{RwLock, RwLockReadGuard, mpsc, oneshot};

use crate::clock::Clock;
use crate::model::*;
use crate::wal::Wal;

use store::event_item_id;

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

/// Background task that owns the WAL and batches appends for group commit:
/// take the first append, drain whatever else is already queued, write the
/// whole batch with a single fsync, then answer every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_non_append(&mut wal, cmd);
            continue;
        };

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
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush of {} events failed: {e}", batch.len());
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let append_result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so a partial record never leaks into
    // the next batch.
    let flush_result = wal.flush_sync();
    append_result.and(flush_result)
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
            commit_batch(wal, &mut vec![(event, response)]);
        }
    }
}

/// Booking engine for one tenant: in-memory tables, durable through the WAL.
pub struct Engine {
    pub store: InMemoryStore,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Shared by every mutation, exclusive for compaction. Taken before any
    /// item lock.
    gate: RwLock<()>,
    clock: Arc<dyn Clock>,
}

impl Engine {
    /// Replay `wal_path` and start the WAL writer. Must run inside a tokio runtime.
    pub fn new(wal_path: PathBuf, clock: Arc<dyn Clock>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            store: InMemoryStore::new(),
            wal_tx,
            gate: RwLock::new(()),
            clock,
        };

        // Sole owner of every lock here, so try_write never contends.
        for event in &events {
            match event_item_id(event) {
                None => engine.store.apply_event(event),
                Some(item_id) => {
                    if let Some(st) = engine.store.get_item(item_id)
                        && let Ok(mut guard) = st.try_write()
                    {
                        engine.store.apply_to_item(&mut guard, event);
                    }
                }
            }
        }
        tracing::debug!(
            "replayed {} events: {} users, {} items",
            events.len(),
            engine.store.user_count(),
            engine.store.item_count()
        );

        Ok(engine)
    }

    /// Current instant. Operations read it once and pass it down.
    pub fn now(&self) -> Ms {
        self.clock.now_ms()
    }

    pub(super) async fn mutation_gate(&self) -> RwLockReadGuard<'_, ()> {
        self.gate.read().await
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
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

    /// WAL-append then apply a table-level event.
    pub(super) async fn persist(&self, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.store.apply_event(event);
        Ok(())
    }

    /// WAL-append then apply an item-scoped event. Caller holds the item's write lock.
    pub(super) async fn persist_to_item(
        &self,
        st: &mut ItemState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.store.apply_to_item(st, event);
        Ok(())
    }

    pub(super) fn require_user(&self, id: UserId) -> Result<User, EngineError> {
        self.store.get_user(id).ok_or_else(|| {
            tracing::warn!("user {id} not found");
            EngineError::NotFound(Entity::User, id)
        })
    }

    pub(super) fn require_item(&self, id: ItemId) -> Result<SharedItemState, EngineError> {
        self.store.get_item(id).ok_or_else(|| {
            tracing::warn!("item {id} not found");
            EngineError::NotFound(Entity::Item, id)
        })
    }

    pub(super) fn require_request(&self, id: RequestId) -> Result<ItemRequest, EngineError> {
        self.store.get_request(id).ok_or_else(|| {
            tracing::warn!("request {id} not found");
            EngineError::NotFound(Entity::Request, id)
        })
    }

    /// Booking id → owning item's state.
    pub(super) fn resolve_booking(&self, id: BookingId) -> Result<SharedItemState, EngineError> {
        self.store
            .item_of_booking(id)
            .and_then(|item_id| self.store.get_item(item_id))
            .ok_or_else(|| {
                tracing::warn!("booking {id} not found");
                EngineError::NotFound(Entity::Booking, id)
            })
    }
}

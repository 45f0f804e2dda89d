// Background population of cache misses from the persistence store.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn};

use crate::cache::{Insertion, PlayerCache};
use crate::db::PlayerStore;
use crate::player::PlayerRecord;
use crate::protocol::{PlayerId, Resolution, SlotTicket, WorkerEvent};

/// Resolves player records for view slots, loading misses off the dispatcher
/// loop and reporting back through `tx`.
#[derive(Clone)]
pub struct Populator {
    cache: Arc<PlayerCache>,
    store: Arc<dyn PlayerStore>,
    tx: mpsc::Sender<WorkerEvent>,
}

impl Populator {
    pub fn new(
        cache: Arc<PlayerCache>,
        store: Arc<dyn PlayerStore>,
        tx: mpsc::Sender<WorkerEvent>,
    ) -> Self {
        Self { cache, store, tx }
    }

    /// Return the cached record for `id`, or start a background load and
    /// return `None`. The load finishes with a [`WorkerEvent::Populated`]
    /// carrying `ticket`.
    pub fn ensure(&self, id: PlayerId, ticket: SlotTicket) -> Option<PlayerRecord> {
        if let Some(record) = self.cache.get(id) {
            return Some(record);
        }

        let epoch = self.cache.epoch();
        let cache = Arc::clone(&self.cache);
        let store = Arc::clone(&self.store);
        let tx = self.tx.clone();

        tokio::spawn(async move {
            let (record, resolution) = load(&store, id).await;

            let (record, resolution) = match cache.insert_for_epoch(epoch, record.clone()) {
                Insertion::Inserted => (record, resolution),
                Insertion::Present(existing) => (existing, Resolution::Cached),
                Insertion::Superseded => {
                    debug!("Population of player {id} superseded by a newer game");
                    (record, resolution)
                }
            };

            let event = WorkerEvent::Populated {
                ticket,
                record,
                resolution,
            };
            if tx.send(event).await.is_err() {
                debug!("Dispatcher gone; dropping population result for player {id}");
            }
        });

        None
    }
}

/// Query the store on the blocking pool. Misses and failures both yield a
/// placeholder.
async fn load(store: &Arc<dyn PlayerStore>, id: PlayerId) -> (PlayerRecord, Resolution) {
    let store = Arc::clone(store);
    let started = Instant::now();
    let result = tokio::task::spawn_blocking(move || store.get_player(id)).await;
    trace!("Player {id} query took {:?}", started.elapsed());

    match result {
        Ok(Ok(Some(record))) => (record, Resolution::Stored),
        Ok(Ok(None)) => (PlayerRecord::placeholder(id), Resolution::Placeholder),
        Ok(Err(e)) => {
            warn!("Failed to load player {id}: {e:#}");
            (PlayerRecord::placeholder(id), Resolution::Placeholder)
        }
        Err(e) => {
            error!("Player {id} lookup task failed: {e}");
            (PlayerRecord::placeholder(id), Resolution::Placeholder)
        }
    }
}

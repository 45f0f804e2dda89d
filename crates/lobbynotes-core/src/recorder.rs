// Game storage: persists lobbies and folds finished games into player records,
// and moves the whole store to and from JSON export files.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::db::{ExportBundle, PlayerStore};
use crate::player::PlayerRecord;
use crate::protocol::{EndOfGameSnapshot, LobbySnapshot, WorkerEvent};

/// Writes observed games to the store on the blocking pool and reports
/// updated players to the dispatcher loop.
#[derive(Clone)]
pub struct Recorder {
    store: Arc<dyn PlayerStore>,
    tx: mpsc::Sender<WorkerEvent>,
}

impl Recorder {
    pub fn new(store: Arc<dyn PlayerStore>, tx: mpsc::Sender<WorkerEvent>) -> Self {
        Self { store, tx }
    }

    /// Persist `lobby` in the background. Failures are logged.
    pub fn record_lobby(&self, lobby: LobbySnapshot) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || {
            if let Err(e) = store.record_lobby(&lobby).and_then(|()| store.commit()) {
                warn!("Failed to record lobby {}: {e:#}", lobby.game_id);
            }
        })
    }

    /// Persist `game` in the background and emit a
    /// [`WorkerEvent::PlayerUpdated`] for every player it touched.
    pub fn record_game(
        &self,
        game: EndOfGameSnapshot,
        observed_at: i64,
    ) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let tx = self.tx.clone();
        tokio::task::spawn_blocking(move || match fold_game(store.as_ref(), &game, observed_at) {
            Ok(updated) => {
                if !updated.is_empty() {
                    info!("Recorded game {} ({} players)", game.game_id, updated.len());
                }
                for record in updated {
                    if tx.blocking_send(WorkerEvent::PlayerUpdated(record)).is_err() {
                        debug!("Dispatcher gone; dropping player updates");
                        break;
                    }
                }
            }
            Err(e) => error!("Failed to record game {}: {e:#}", game.game_id),
        })
    }

    /// Write the store to `path` in the background and report the outcome
    /// as a [`WorkerEvent::Notice`].
    pub fn export(&self, path: PathBuf) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let tx = self.tx.clone();
        tokio::task::spawn_blocking(move || {
            let notice = match export_to_file(store.as_ref(), &path) {
                Ok(players) => {
                    info!("Exported {players} players to {}", path.display());
                    format!("Exported {players} players to {}", path.display())
                }
                Err(e) => {
                    warn!("Export to {} failed: {e:#}", path.display());
                    format!("Export failed: {e:#}")
                }
            };
            let _ = tx.blocking_send(WorkerEvent::Notice(notice));
        })
    }

    /// Merge the export file at `path` into the store in the background. Every
    /// imported player is re-read and reported as
    /// [`WorkerEvent::PlayerUpdated`], followed by a notice.
    pub fn import(&self, path: PathBuf) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let tx = self.tx.clone();
        tokio::task::spawn_blocking(move || {
            let notice = match import_from_file(store.as_ref(), &path) {
                Ok(players) => {
                    let count = players.len();
                    info!("Imported {count} players from {}", path.display());
                    for record in players {
                        if tx.blocking_send(WorkerEvent::PlayerUpdated(record)).is_err() {
                            debug!("Dispatcher gone; dropping imported players");
                            return;
                        }
                    }
                    format!("Imported {count} players from {}", path.display())
                }
                Err(e) => {
                    warn!("Import from {} failed: {e:#}", path.display());
                    format!("Import failed: {e:#}")
                }
            };
            let _ = tx.blocking_send(WorkerEvent::Notice(notice));
        })
    }
}

/// Write an [`ExportBundle`] of `store` to `path` as JSON. Returns the number
/// of exported players.
pub fn export_to_file(store: &dyn PlayerStore, path: &Path) -> Result<usize> {
    let bundle = store.export_bundle()?;
    let json = serde_json::to_string_pretty(&bundle).context("failed to serialize export")?;
    std::fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(bundle.players.len())
}

/// Merge the bundle stored at `path` into `store`. Returns the stored record
/// of every player the bundle mentions, after the merge.
pub fn import_from_file(store: &dyn PlayerStore, path: &Path) -> Result<Vec<PlayerRecord>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let bundle: ExportBundle = serde_json::from_str(&text)
        .with_context(|| format!("{} is not an export file", path.display()))?;
    store.import_bundle(&bundle)?;

    let mut merged = Vec::with_capacity(bundle.players.len());
    for player in &bundle.players {
        if let Some(record) = store.get_player(player.id)? {
            merged.push(record);
        }
    }
    Ok(merged)
}

/// Store `game` and, if it was not stored before, fold every stat summary
/// into the corresponding player. Returns the updated records.
pub fn fold_game(
    store: &dyn PlayerStore,
    game: &EndOfGameSnapshot,
    observed_at: i64,
) -> Result<Vec<PlayerRecord>> {
    if !store.record_game(game, observed_at)? {
        debug!("Game {} already recorded", game.game_id);
        store.commit()?;
        return Ok(Vec::new());
    }

    let mut updated = Vec::new();
    for summary in game.summaries() {
        let mut record = store
            .get_player(summary.user_id)?
            .unwrap_or_else(|| PlayerRecord::placeholder(summary.user_id));
        record.apply_summary(summary, observed_at);
        store.record_player(&record)?;
        updated.push(record);
    }
    store.commit()?;
    Ok(updated)
}

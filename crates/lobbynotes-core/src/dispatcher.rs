// Reconciliation loop: owns the active game, the per-slot state and the call
// log, and turns reader, worker and user events into view updates.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::cache::{PlayerCache, Upsert};
use crate::config::Config;
use crate::db::PlayerStore;
use crate::inspector::{inspect, CallLog, CapturedCall};
use crate::payload::TreeBuilder;
use crate::player::PlayerRecord;
use crate::populator::Populator;
use crate::protocol::{
    now_millis, ConnectionStatus, EndOfGameSnapshot, LobbySnapshot, Participant,
    PlayerParticipant, PlayerId, Resolution, SlotRef, SlotTicket, TeamSide, UserCommand,
    ViewUpdate, WireMessage, WorkerEvent,
};
use crate::reader::ReaderEvent;
use crate::recorder::Recorder;
use crate::roster::same_rosters;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// What the loop remembers about one view slot.
#[derive(Debug, Clone, Default)]
struct SlotState {
    /// Sequence number of the latest ticket issued for this slot.
    seq: u64,
    loading: bool,
    /// Name of the participant assigned to the slot.
    name: String,
    shown: Option<PlayerRecord>,
}

/// State owned by the dispatcher loop. Only [`PlayerCache`] is shared with
/// other tasks.
pub struct DispatcherState {
    pub team_size: usize,
    pub cache: Arc<PlayerCache>,
    store: Arc<dyn PlayerStore>,
    populator: Populator,
    recorder: Recorder,
    /// Lobby of the active game; `None` while idle.
    pub current_game: Option<LobbySnapshot>,
    slots: [Vec<SlotState>; 2],
    next_seq: u64,
    pub dev_mode: bool,
    pub calls: CallLog,
    tree: TreeBuilder,
    pub connection_status: ConnectionStatus,
}

impl DispatcherState {
    /// `worker_tx` is the sending half of the channel `run` receives worker
    /// events on.
    pub fn new(
        config: &Config,
        store: Arc<dyn PlayerStore>,
        worker_tx: mpsc::Sender<WorkerEvent>,
    ) -> Self {
        let cache = Arc::new(PlayerCache::new());
        let team_size = config.roster.team_size;
        Self {
            team_size,
            populator: Populator::new(Arc::clone(&cache), Arc::clone(&store), worker_tx.clone()),
            recorder: Recorder::new(Arc::clone(&store), worker_tx),
            cache,
            store,
            current_game: None,
            slots: [
                vec![SlotState::default(); team_size],
                vec![SlotState::default(); team_size],
            ],
            next_seq: 0,
            dev_mode: config.inspector.dev_mode,
            calls: CallLog::new(config.inspector.max_entries),
            tree: TreeBuilder::new(config.inspector.max_depth),
            connection_status: ConnectionStatus::Disconnected,
        }
    }

    fn slot(&self, slot: SlotRef) -> Option<&SlotState> {
        self.slots[slot.team.index()].get(slot.index)
    }

    fn slot_mut(&mut self, slot: SlotRef) -> Option<&mut SlotState> {
        self.slots[slot.team.index()].get_mut(slot.index)
    }

    /// Record currently displayed in `slot`.
    pub fn slot_record(&self, slot: SlotRef) -> Option<&PlayerRecord> {
        self.slot(slot)?.shown.as_ref()
    }

    pub fn is_loading(&self, slot: SlotRef) -> bool {
        self.slot(slot).is_some_and(|s| s.loading)
    }

    /// Clear `slot` and issue a fresh ticket for it, invalidating any
    /// population still in flight. Returns the ticket and whether the slot
    /// was loading.
    fn reset_slot(&mut self, slot: SlotRef) -> (SlotTicket, bool) {
        self.next_seq += 1;
        let seq = self.next_seq;
        let was_loading = match self.slot_mut(slot) {
            Some(state) => {
                let was_loading = state.loading;
                *state = SlotState {
                    seq,
                    ..SlotState::default()
                };
                was_loading
            }
            None => false,
        };
        (SlotTicket { slot, seq }, was_loading)
    }
}

// ---------------------------------------------------------------------------
// Main event loop
// ---------------------------------------------------------------------------

/// Run the dispatcher loop.
///
/// Listens on three channels using `tokio::select!`:
/// 1. Reader events from the loader connection
/// 2. Worker events (population results, recorder updates)
/// 3. User commands
///
/// Pushes view updates through `ui_tx`. Returns on `Quit` or when the command
/// channel closes, flushing buffered store writes on the way out.
pub async fn run(
    mut reader_rx: mpsc::Receiver<ReaderEvent>,
    mut worker_rx: mpsc::Receiver<WorkerEvent>,
    mut cmd_rx: mpsc::Receiver<UserCommand>,
    ui_tx: mpsc::Sender<ViewUpdate>,
    mut state: DispatcherState,
) -> anyhow::Result<()> {
    info!("Dispatcher loop started");

    // Closed channels are masked out so tokio::select! never spins on them.
    let mut reader_open = true;
    let mut worker_open = true;

    loop {
        tokio::select! {
            // --- Reader events ---
            event = reader_rx.recv(), if reader_open => {
                match event {
                    Some(event) => handle_reader_event(&mut state, event, &ui_tx).await,
                    None => {
                        info!("Reader channel closed");
                        reader_open = false;
                    }
                }
            }

            // --- Worker events ---
            event = worker_rx.recv(), if worker_open => {
                match event {
                    Some(event) => handle_worker_event(&mut state, event, &ui_tx).await,
                    None => {
                        info!("Worker channel closed");
                        worker_open = false;
                    }
                }
            }

            // --- User commands ---
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(UserCommand::Quit) => {
                        info!("Quit command received, shutting down");
                        break;
                    }
                    Some(cmd) => handle_user_command(&mut state, cmd, &ui_tx).await,
                    None => {
                        info!("Command channel closed, shutting down");
                        break;
                    }
                }
            }
        }
    }

    let store = Arc::clone(&state.store);
    match tokio::task::spawn_blocking(move || store.commit()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Failed to flush store on shutdown: {e:#}"),
        Err(e) => warn!("Store flush task failed: {e}"),
    }

    info!("Dispatcher loop exiting");
    Ok(())
}

async fn handle_reader_event(
    state: &mut DispatcherState,
    event: ReaderEvent,
    ui_tx: &mpsc::Sender<ViewUpdate>,
) {
    match event {
        ReaderEvent::Connected { addr } => {
            info!("Loader connected from {addr}");
            state.connection_status = ConnectionStatus::Connected;
            let _ = ui_tx
                .send(ViewUpdate::ConnectionStatus(ConnectionStatus::Connected))
                .await;
        }
        ReaderEvent::Disconnected => {
            info!("Loader disconnected");
            state.connection_status = ConnectionStatus::Disconnected;
            let _ = ui_tx
                .send(ViewUpdate::ConnectionStatus(ConnectionStatus::Disconnected))
                .await;
        }
        ReaderEvent::Message(json) => handle_reader_message(state, &json, ui_tx).await,
    }
}

/// Handle one JSON frame from the loader.
async fn handle_reader_message(
    state: &mut DispatcherState,
    json: &str,
    ui_tx: &mpsc::Sender<ViewUpdate>,
) {
    let msg: WireMessage = match serde_json::from_str(json) {
        Ok(m) => m,
        Err(e) => {
            warn!("Failed to parse loader message: {e}");
            return;
        }
    };

    match msg {
        WireMessage::Lobby { payload, .. } => handle_lobby(state, payload, ui_tx).await,
        WireMessage::EndOfGame { timestamp, payload } => {
            handle_end_of_game(state, payload, timestamp, ui_tx).await
        }
        WireMessage::Call { payload, .. } => {
            if state.dev_mode {
                capture(state, payload.into(), ui_tx).await;
            }
        }
        WireMessage::Notify { payload, .. } => {
            if state.dev_mode {
                capture(state, payload.into(), ui_tx).await;
            }
        }
        WireMessage::Heartbeat { .. } => trace!("Loader heartbeat"),
    }
}

// ---------------------------------------------------------------------------
// Lobby / end of game
// ---------------------------------------------------------------------------

/// Adopt or diff an incoming lobby snapshot.
///
/// A different game id (or no active game) clears the cache and becomes the
/// active game before any slot is touched. For the same id the active
/// snapshot stays in place and only the view is redrawn; identical rosters
/// are a no-op for the cache and the view.
async fn handle_lobby(
    state: &mut DispatcherState,
    lobby: LobbySnapshot,
    ui_tx: &mpsc::Sender<ViewUpdate>,
) {
    state.recorder.record_lobby(lobby.clone());

    match &state.current_game {
        Some(active) if active.game_id == lobby.game_id => {
            if same_rosters(active, &lobby) {
                trace!("Lobby for game {} unchanged", lobby.game_id);
                return;
            }
            debug!("Rosters changed for game {}", lobby.game_id);
        }
        _ => {
            info!("New game {}", lobby.game_id);
            state.cache.clear();
            state.current_game = Some(lobby.clone());
        }
    }

    for side in TeamSide::BOTH {
        let Some(team) = lobby.team(side) else {
            hide_team(state, side, ui_tx).await;
            continue;
        };
        let _ = ui_tx
            .send(ViewUpdate::SetTeamVisible {
                team: side,
                visible: true,
            })
            .await;
        for index in 0..state.team_size {
            let slot = SlotRef::new(side, index);
            match team.get(index) {
                Some(participant @ Participant::Player(p)) => {
                    show_player(state, slot, participant.clone(), p.id, ui_tx).await
                }
                Some(participant) => show_named(state, slot, participant.clone(), ui_tx).await,
                None => hide_slot(state, slot, ui_tx).await,
            }
        }
    }
}

/// Record a finished game and show its players.
async fn handle_end_of_game(
    state: &mut DispatcherState,
    game: EndOfGameSnapshot,
    timestamp: i64,
    ui_tx: &mpsc::Sender<ViewUpdate>,
) {
    let observed_at = if timestamp > 0 { timestamp } else { now_millis() };
    info!("End of game {}", game.game_id);
    state.recorder.record_game(game.clone(), observed_at);

    for side in TeamSide::BOTH {
        let Some(stats) = game.team(side) else {
            hide_team(state, side, ui_tx).await;
            continue;
        };
        let _ = ui_tx
            .send(ViewUpdate::SetTeamVisible {
                team: side,
                visible: true,
            })
            .await;
        for index in 0..state.team_size {
            let slot = SlotRef::new(side, index);
            match stats.get(index) {
                Some(summary) => {
                    let provisional = Participant::Player(PlayerParticipant {
                        id: summary.user_id,
                        name: summary.summoner_name.clone(),
                        champion: None,
                    });
                    show_player(state, slot, provisional, summary.user_id, ui_tx).await;
                }
                None => hide_slot(state, slot, ui_tx).await,
            }
        }
    }
}

/// Show the cached record for `id`, or mark the slot loading with a
/// provisional participant and start population.
async fn show_player(
    state: &mut DispatcherState,
    slot: SlotRef,
    provisional: Participant,
    id: PlayerId,
    ui_tx: &mpsc::Sender<ViewUpdate>,
) {
    let (ticket, was_loading) = state.reset_slot(slot);
    let cached = state.populator.ensure(id, ticket);

    let Some(entry) = state.slot_mut(slot) else {
        return;
    };
    entry.name = provisional.name().to_string();

    match cached {
        Some(mut record) => {
            debug!("Player {id} cached for {slot:?}");
            if record.name.is_empty() {
                record.name = entry.name.clone();
            }
            entry.shown = Some(record.clone());
            if was_loading {
                let _ = ui_tx
                    .send(ViewUpdate::SetLoading {
                        slot,
                        loading: false,
                    })
                    .await;
            }
            if record.is_placeholder() {
                let _ = ui_tx
                    .send(ViewUpdate::SetParticipant {
                        slot,
                        participant: provisional,
                    })
                    .await;
                let _ = ui_tx.send(ViewUpdate::SetNoStats { slot }).await;
            } else {
                let _ = ui_tx.send(ViewUpdate::SetPlayer { slot, record }).await;
            }
        }
        None => {
            debug!("Player {id} not cached; populating {slot:?}");
            entry.loading = true;
            let _ = ui_tx
                .send(ViewUpdate::SetLoading {
                    slot,
                    loading: true,
                })
                .await;
            let _ = ui_tx
                .send(ViewUpdate::SetParticipant {
                    slot,
                    participant: provisional,
                })
                .await;
        }
    }
}

async fn show_named(
    state: &mut DispatcherState,
    slot: SlotRef,
    participant: Participant,
    ui_tx: &mpsc::Sender<ViewUpdate>,
) {
    let (_, was_loading) = state.reset_slot(slot);
    if let Some(entry) = state.slot_mut(slot) {
        entry.name = participant.name().to_string();
    }
    if was_loading {
        let _ = ui_tx
            .send(ViewUpdate::SetLoading {
                slot,
                loading: false,
            })
            .await;
    }
    let _ = ui_tx
        .send(ViewUpdate::SetParticipant { slot, participant })
        .await;
}

async fn hide_slot(state: &mut DispatcherState, slot: SlotRef, ui_tx: &mpsc::Sender<ViewUpdate>) {
    let (_, was_loading) = state.reset_slot(slot);
    if was_loading {
        let _ = ui_tx
            .send(ViewUpdate::SetLoading {
                slot,
                loading: false,
            })
            .await;
    }
    let _ = ui_tx.send(ViewUpdate::HideSlot { slot }).await;
}

async fn hide_team(state: &mut DispatcherState, team: TeamSide, ui_tx: &mpsc::Sender<ViewUpdate>) {
    let _ = ui_tx
        .send(ViewUpdate::SetTeamVisible {
            team,
            visible: false,
        })
        .await;
    for index in 0..state.team_size {
        let slot = SlotRef::new(team, index);
        let (_, was_loading) = state.reset_slot(slot);
        if was_loading {
            let _ = ui_tx
                .send(ViewUpdate::SetLoading {
                    slot,
                    loading: false,
                })
                .await;
        }
    }
}

// ---------------------------------------------------------------------------
// Worker events
// ---------------------------------------------------------------------------

async fn handle_worker_event(
    state: &mut DispatcherState,
    event: WorkerEvent,
    ui_tx: &mpsc::Sender<ViewUpdate>,
) {
    match event {
        WorkerEvent::Populated {
            ticket,
            record,
            resolution,
        } => handle_populated(state, ticket, record, resolution, ui_tx).await,
        WorkerEvent::PlayerUpdated(record) => handle_player_updated(state, record, ui_tx).await,
        WorkerEvent::Notice(msg) => {
            let _ = ui_tx.send(ViewUpdate::Notice(msg)).await;
        }
    }
}

/// Apply a population result if its ticket is still the slot's latest.
async fn handle_populated(
    state: &mut DispatcherState,
    ticket: SlotTicket,
    record: PlayerRecord,
    resolution: Resolution,
    ui_tx: &mpsc::Sender<ViewUpdate>,
) {
    if state.slot(ticket.slot).map(|s| s.seq) != Some(ticket.seq) {
        trace!(
            "Dropping superseded population of player {} for {:?}",
            record.id,
            ticket.slot
        );
        return;
    }

    debug!(
        "Player {} resolved for {:?} ({resolution:?})",
        record.id, ticket.slot
    );

    // The recorder may have cached fresher data while the lookup ran.
    let mut record = match state.cache.get(record.id) {
        Some(cached) if cached.observed_at > record.observed_at => cached,
        _ => record,
    };

    let slot = ticket.slot;
    let Some(entry) = state.slot_mut(slot) else {
        return;
    };
    if record.name.is_empty() {
        record.name = entry.name.clone();
    }
    entry.loading = false;
    entry.shown = Some(record.clone());

    let _ = ui_tx
        .send(ViewUpdate::SetLoading {
            slot,
            loading: false,
        })
        .await;
    if record.is_placeholder() {
        let _ = ui_tx.send(ViewUpdate::SetNoStats { slot }).await;
    } else {
        let _ = ui_tx.send(ViewUpdate::SetPlayer { slot, record }).await;
    }
}

/// Cache fresh recorder output and refresh every settled slot showing an
/// older-or-equal copy of the player.
async fn handle_player_updated(
    state: &mut DispatcherState,
    record: PlayerRecord,
    ui_tx: &mpsc::Sender<ViewUpdate>,
) {
    if state.cache.upsert(record.clone()) == Upsert::Stale {
        trace!("Dropping stale update for player {}", record.id);
        return;
    }

    let mut refreshed = Vec::new();
    for side in TeamSide::BOTH {
        for (index, entry) in state.slots[side.index()].iter_mut().enumerate() {
            if entry.loading {
                continue;
            }
            let is_older_copy = entry
                .shown
                .as_ref()
                .is_some_and(|s| s.id == record.id && s.observed_at <= record.observed_at);
            if is_older_copy {
                entry.shown = Some(record.clone());
                refreshed.push(SlotRef::new(side, index));
            }
        }
    }

    for slot in refreshed {
        let _ = ui_tx
            .send(ViewUpdate::SetPlayer {
                slot,
                record: record.clone(),
            })
            .await;
    }
}

// ---------------------------------------------------------------------------
// User commands
// ---------------------------------------------------------------------------

async fn handle_user_command(
    state: &mut DispatcherState,
    cmd: UserCommand,
    ui_tx: &mpsc::Sender<ViewUpdate>,
) {
    match cmd {
        UserCommand::EditNote { slot, note, color } => {
            update_note(state, slot, note, color, ui_tx).await
        }
        UserCommand::ClearNote { slot } => {
            update_note(state, slot, String::new(), None, ui_tx).await
        }
        UserCommand::SetDevMode(enabled) => {
            info!("Dev mode {}", if enabled { "enabled" } else { "disabled" });
            state.dev_mode = enabled;
        }
        UserCommand::InspectCall(id) => match state.calls.get(id) {
            Some(entry) => {
                let roots = inspect(entry, &state.tree);
                let _ = ui_tx.send(ViewUpdate::CallTree { id, roots }).await;
            }
            None => warn!("No captured call with id {id}"),
        },
        UserCommand::ClearCalls => {
            state.calls.clear();
            let _ = ui_tx.send(ViewUpdate::CallsCleared).await;
        }
        UserCommand::Export { path } => {
            info!("Exporting store to {}", path.display());
            state.recorder.export(path);
        }
        UserCommand::Import { path } => {
            info!("Importing store from {}", path.display());
            state.recorder.import(path);
        }
        UserCommand::Quit => {}
    }
}

/// Set the note of the player shown in `slot`, refresh the slot and persist
/// the record in the background.
async fn update_note(
    state: &mut DispatcherState,
    slot: SlotRef,
    note: String,
    color: Option<String>,
    ui_tx: &mpsc::Sender<ViewUpdate>,
) {
    let Some(shown) = state.slot_record(slot).cloned() else {
        warn!("No player in {slot:?} to annotate");
        return;
    };

    let mut record = match state.cache.get(shown.id) {
        Some(cached) if cached.observed_at > shown.observed_at => cached,
        _ => shown,
    };
    record.note = note;
    record.note_color = color;

    state.cache.upsert(record.clone());
    if let Some(entry) = state.slot_mut(slot) {
        entry.shown = Some(record.clone());
    }
    let _ = ui_tx
        .send(ViewUpdate::SetPlayer {
            slot,
            record: record.clone(),
        })
        .await;

    let store = Arc::clone(&state.store);
    tokio::task::spawn_blocking(move || {
        if let Err(e) = store.commit_player(&record, true) {
            warn!("Failed to save note for player {}: {e:#}", record.id);
        }
    });
}

// ---------------------------------------------------------------------------
// Inspector
// ---------------------------------------------------------------------------

async fn capture(state: &mut DispatcherState, entry: CapturedCall, ui_tx: &mpsc::Sender<ViewUpdate>) {
    let summary = entry.summary();
    let id = state.calls.push(entry);
    trace!("Captured call {id}: {summary}");
    let _ = ui_tx.send(ViewUpdate::CallLogged { id, summary }).await;
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

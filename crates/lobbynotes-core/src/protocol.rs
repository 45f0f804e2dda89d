// Message types exchanged between the network reader, background workers,
// the dispatcher loop, and the view layer.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::payload::DisplayNode;
use crate::player::PlayerRecord;

/// Stable player identity as reported by the game server.
pub type PlayerId = i64;

/// Identifier of a lobby / game.
pub type GameId = i64;

// ---------------------------------------------------------------------------
// Wire format (JSON text frames from the loader)
// ---------------------------------------------------------------------------

/// A frame forwarded by the network loader. Every frame carries the time the
/// loader observed it, in epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WireMessage {
    Lobby {
        #[serde(default)]
        timestamp: i64,
        payload: LobbySnapshot,
    },
    EndOfGame {
        #[serde(default)]
        timestamp: i64,
        payload: EndOfGameSnapshot,
    },
    /// A client call together with the server's answer.
    Call {
        #[serde(default)]
        timestamp: i64,
        payload: CallPayload,
    },
    /// A server-initiated message.
    Notify {
        #[serde(default)]
        timestamp: i64,
        payload: NotifyPayload,
    },
    Heartbeat {
        #[serde(default)]
        timestamp: i64,
    },
}

/// A participant in a lobby roster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Participant {
    /// A fully identified player.
    Player(PlayerParticipant),
    /// A participant only known by name (bots, hidden players).
    Named { name: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerParticipant {
    pub id: PlayerId,
    pub name: String,
    /// Champion currently picked in champ select, if any.
    #[serde(default)]
    pub champion: Option<String>,
}

impl Participant {
    /// Name shown for this participant regardless of how it is identified.
    pub fn name(&self) -> &str {
        match self {
            Participant::Player(p) => &p.name,
            Participant::Named { name } => name,
        }
    }

    pub fn player_id(&self) -> Option<PlayerId> {
        match self {
            Participant::Player(p) => Some(p.id),
            Participant::Named { .. } => None,
        }
    }
}

/// Champion-select / lobby state for one game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbySnapshot {
    pub game_id: GameId,
    #[serde(default)]
    pub team_one: Option<Vec<Participant>>,
    #[serde(default)]
    pub team_two: Option<Vec<Participant>>,
}

impl LobbySnapshot {
    pub fn team(&self, side: TeamSide) -> Option<&[Participant]> {
        match side {
            TeamSide::One => self.team_one.as_deref(),
            TeamSide::Two => self.team_two.as_deref(),
        }
    }
}

/// Per-player results reported at the end of a game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatSummary {
    pub user_id: PlayerId,
    pub summoner_name: String,
    #[serde(default)]
    pub won: bool,
    #[serde(default)]
    pub leaver: bool,
    #[serde(default)]
    pub kills: u32,
    #[serde(default)]
    pub deaths: u32,
    #[serde(default)]
    pub assists: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndOfGameSnapshot {
    pub game_id: GameId,
    #[serde(default)]
    pub team_player_stats: Option<Vec<StatSummary>>,
    #[serde(default)]
    pub other_team_player_stats: Option<Vec<StatSummary>>,
}

impl EndOfGameSnapshot {
    /// The own team maps to panel one, the other team to panel two.
    pub fn team(&self, side: TeamSide) -> Option<&[StatSummary]> {
        match side {
            TeamSide::One => self.team_player_stats.as_deref(),
            TeamSide::Two => self.other_team_player_stats.as_deref(),
        }
    }

    pub fn summaries(&self) -> impl Iterator<Item = &StatSummary> {
        TeamSide::BOTH
            .into_iter()
            .flat_map(move |side| self.team(side).unwrap_or_default())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallPayload {
    pub call: NotifyPayload,
    pub result: NotifyPayload,
}

/// A raw service call: method name plus untyped arguments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotifyPayload {
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub arguments: Vec<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Slots
// ---------------------------------------------------------------------------

/// One of the two team panels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TeamSide {
    One,
    Two,
}

impl TeamSide {
    pub const BOTH: [TeamSide; 2] = [TeamSide::One, TeamSide::Two];

    pub fn index(self) -> usize {
        match self {
            TeamSide::One => 0,
            TeamSide::Two => 1,
        }
    }
}

/// Position of a slot within a team panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotRef {
    pub team: TeamSide,
    pub index: usize,
}

impl SlotRef {
    pub fn new(team: TeamSide, index: usize) -> Self {
        SlotRef { team, index }
    }
}

/// Identifies one population request for a slot. Only the most recent ticket
/// of a slot is allowed to update it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotTicket {
    pub slot: SlotRef,
    pub seq: u64,
}

// ---------------------------------------------------------------------------
// Channel messages
// ---------------------------------------------------------------------------

/// How a populated record was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Loaded from the persistent store by this request.
    Stored,
    /// Another request cached the identity first; this is its entry.
    Cached,
    /// Nothing stored (or the lookup failed); identity-only record.
    Placeholder,
}

/// Messages sent from background tasks to the dispatcher loop.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    Populated {
        ticket: SlotTicket,
        record: PlayerRecord,
        resolution: Resolution,
    },
    /// Fresh player data produced by the recorder.
    PlayerUpdated(PlayerRecord),
    /// Outcome of a background export or import, for the user.
    Notice(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

/// Updates pushed from the dispatcher loop to the view layer.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewUpdate {
    SetLoading { slot: SlotRef, loading: bool },
    SetPlayer { slot: SlotRef, record: PlayerRecord },
    /// Provisional content while a slot is loading, or a name-only participant.
    SetParticipant { slot: SlotRef, participant: Participant },
    SetNoStats { slot: SlotRef },
    HideSlot { slot: SlotRef },
    SetTeamVisible { team: TeamSide, visible: bool },
    ConnectionStatus(ConnectionStatus),
    CallLogged { id: u64, summary: String },
    CallsCleared,
    CallTree { id: u64, roots: Vec<DisplayNode> },
    /// A one-line status message.
    Notice(String),
}

/// Commands from the user.
#[derive(Debug, Clone, PartialEq)]
pub enum UserCommand {
    EditNote {
        slot: SlotRef,
        note: String,
        color: Option<String>,
    },
    ClearNote {
        slot: SlotRef,
    },
    SetDevMode(bool),
    InspectCall(u64),
    ClearCalls,
    /// Write every stored player, lobby and game to a JSON file.
    Export { path: PathBuf },
    /// Merge a JSON file written by `Export` into the store.
    Import { path: PathBuf },
    Quit,
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lobby_frame_parses_both_participant_kinds() {
        let json = r#"{
            "type": "LOBBY",
            "timestamp": 1700000000000,
            "payload": {
                "gameId": 42,
                "teamOne": [
                    {"kind": "player", "id": 7, "name": "Alice"},
                    {"kind": "named", "name": "Bot Annie"}
                ]
            }
        }"#;

        let msg: WireMessage = serde_json::from_str(json).unwrap();
        let WireMessage::Lobby { timestamp, payload } = msg else {
            panic!("expected a lobby frame");
        };
        assert_eq!(timestamp, 1_700_000_000_000);
        assert_eq!(payload.game_id, 42);
        assert!(payload.team_two.is_none());

        let team = payload.team(TeamSide::One).unwrap();
        assert_eq!(team.len(), 2);
        assert_eq!(team[0].player_id(), Some(7));
        assert_eq!(team[0].name(), "Alice");
        assert_eq!(team[1].player_id(), None);
        assert_eq!(team[1].name(), "Bot Annie");
    }

    #[test]
    fn end_of_game_frame_defaults_missing_stats() {
        let json = r#"{
            "type": "END_OF_GAME",
            "payload": {
                "gameId": 9,
                "teamPlayerStats": [{"userId": 1, "summonerName": "Alice", "won": true}],
                "otherTeamPlayerStats": [{"userId": 2, "summonerName": "Bob"}]
            }
        }"#;

        let msg: WireMessage = serde_json::from_str(json).unwrap();
        let WireMessage::EndOfGame { timestamp, payload } = msg else {
            panic!("expected an end-of-game frame");
        };
        assert_eq!(timestamp, 0);
        let ids: Vec<PlayerId> = payload.summaries().map(|s| s.user_id).collect();
        assert_eq!(ids, vec![1, 2]);
        let bob = &payload.team(TeamSide::Two).unwrap()[0];
        assert!(!bob.won);
        assert_eq!(bob.kills, 0);
    }

    #[test]
    fn heartbeat_and_notify_frames_parse() {
        let hb: WireMessage = serde_json::from_str(r#"{"type":"HEARTBEAT"}"#).unwrap();
        assert_eq!(hb, WireMessage::Heartbeat { timestamp: 0 });

        let notify: WireMessage = serde_json::from_str(
            r#"{"type":"NOTIFY","payload":{"method":"receive","arguments":[{"body":1}]}}"#,
        )
        .unwrap();
        let WireMessage::Notify { payload, .. } = notify else {
            panic!("expected a notify frame");
        };
        assert_eq!(payload.method, "receive");
        assert_eq!(payload.arguments.len(), 1);
    }

    #[test]
    fn unknown_frame_type_is_rejected() {
        let result = serde_json::from_str::<WireMessage>(r#"{"type":"SOMETHING_ELSE"}"#);
        assert!(result.is_err());
    }
}

// SQLite persistence for players, lobbies and finished games.

use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::player::{PlayerRecord, PlayerStats};
use crate::protocol::{now_millis, EndOfGameSnapshot, LobbySnapshot, PlayerId};

/// Persistence collaborator used by the populator, the recorder and note
/// edits. Implementations are called from the blocking pool.
pub trait PlayerStore: Send + Sync {
    fn get_player(&self, id: PlayerId) -> Result<Option<PlayerRecord>>;

    /// Write a user-edited record. The note is always taken from `record`;
    /// name, stats and timestamp only when not older than the stored row.
    fn commit_player(&self, record: &PlayerRecord, flush_immediately: bool) -> Result<()>;

    /// Write game-derived player data without touching the stored note.
    /// Buffered until [`PlayerStore::commit`].
    fn record_player(&self, record: &PlayerRecord) -> Result<()>;

    fn record_lobby(&self, lobby: &LobbySnapshot) -> Result<()>;

    /// Store a finished game. Returns `false` if the game was already stored.
    fn record_game(&self, game: &EndOfGameSnapshot, observed_at: i64) -> Result<bool>;

    /// Flush buffered writes.
    fn commit(&self) -> Result<()>;

    /// Snapshot every stored player, lobby and game.
    fn export_bundle(&self) -> Result<ExportBundle>;

    /// Merge `bundle` into the store. Newer player rows win.
    fn import_bundle(&self, bundle: &ExportBundle) -> Result<()>;
}

/// A finished game together with the time it was observed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedGame {
    pub observed_at: i64,
    pub game: EndOfGameSnapshot,
}

/// Everything the database holds, in a form that can be written to a file and
/// merged back into another database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportBundle {
    pub exported_at: DateTime<Utc>,
    pub players: Vec<PlayerRecord>,
    pub lobbies: Vec<LobbySnapshot>,
    pub games: Vec<RecordedGame>,
}

const UPSERT_GAME_DATA: &str = "
    INSERT INTO players (id, name, observed_at, note, note_color, stats)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
    ON CONFLICT(id) DO UPDATE SET
        name        = excluded.name,
        observed_at = excluded.observed_at,
        stats       = excluded.stats
    WHERE excluded.observed_at >= players.observed_at";

const UPSERT_USER_EDIT: &str = "
    INSERT INTO players (id, name, observed_at, note, note_color, stats)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
    ON CONFLICT(id) DO UPDATE SET
        note        = excluded.note,
        note_color  = excluded.note_color,
        name        = CASE WHEN excluded.observed_at >= players.observed_at
                           THEN excluded.name ELSE players.name END,
        stats       = CASE WHEN excluded.observed_at >= players.observed_at
                           THEN excluded.stats ELSE players.stats END,
        observed_at = MAX(excluded.observed_at, players.observed_at)";

const UPSERT_IMPORTED: &str = "
    INSERT INTO players (id, name, observed_at, note, note_color, stats)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
    ON CONFLICT(id) DO UPDATE SET
        name        = excluded.name,
        observed_at = excluded.observed_at,
        note        = excluded.note,
        note_color  = excluded.note_color,
        stats       = excluded.stats
    WHERE excluded.observed_at >= players.observed_at";

/// SQLite-backed [`PlayerStore`].
///
/// Buffered writes run inside a transaction that is opened lazily by the
/// first buffered write and closed by [`PlayerStore::commit`], a flushed
/// write, or dropping the database.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a database at `path` and ensure the schema exists.
    /// `":memory:"` gives an ephemeral database for tests.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {path}"))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to set database pragmas")?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS players (
                id          INTEGER PRIMARY KEY,
                name        TEXT NOT NULL,
                observed_at INTEGER NOT NULL,
                note        TEXT NOT NULL DEFAULT '',
                note_color  TEXT,
                stats       TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS lobbies (
                game_id     INTEGER PRIMARY KEY,
                payload     TEXT NOT NULL,
                recorded_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS games (
                game_id     INTEGER PRIMARY KEY,
                observed_at INTEGER NOT NULL,
                payload     TEXT NOT NULL,
                recorded_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_players_observed_at ON players(observed_at);
            ",
        )
        .context("failed to create database schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open the buffered-write transaction unless one is already running.
    fn begin_pending(conn: &Connection) -> Result<()> {
        if conn.is_autocommit() {
            conn.execute_batch("BEGIN")
                .context("failed to begin pending transaction")?;
        }
        Ok(())
    }

    fn commit_pending(conn: &Connection) -> Result<()> {
        if !conn.is_autocommit() {
            conn.execute_batch("COMMIT")
                .context("failed to commit pending transaction")?;
        }
        Ok(())
    }

    fn write_player(conn: &Connection, sql: &str, record: &PlayerRecord) -> Result<()> {
        let stats_json =
            serde_json::to_string(&record.stats).context("failed to serialize player stats")?;
        conn.execute(
            sql,
            params![
                record.id,
                record.name,
                record.observed_at,
                record.note,
                record.note_color,
                stats_json,
            ],
        )
        .with_context(|| format!("failed to write player {}", record.id))?;
        Ok(())
    }

    /// Whether buffered writes are waiting for a commit.
    pub fn has_pending_writes(&self) -> bool {
        !self.conn().is_autocommit()
    }
}

impl PlayerStore for Database {
    fn get_player(&self, id: PlayerId) -> Result<Option<PlayerRecord>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT name, observed_at, note, note_color, stats FROM players WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()
            .with_context(|| format!("failed to load player {id}"))?;

        row.map(|(name, observed_at, note, note_color, stats_json)| -> Result<PlayerRecord> {
            let stats = serde_json::from_str(&stats_json)
                .with_context(|| format!("corrupt stats for player {id}"))?;
            Ok(PlayerRecord {
                id,
                name,
                observed_at,
                note,
                note_color,
                stats,
            })
        })
        .transpose()
    }

    fn commit_player(&self, record: &PlayerRecord, flush_immediately: bool) -> Result<()> {
        let conn = self.conn();
        Self::begin_pending(&conn)?;
        Self::write_player(&conn, UPSERT_USER_EDIT, record)?;
        if flush_immediately {
            Self::commit_pending(&conn)?;
        }
        Ok(())
    }

    fn record_player(&self, record: &PlayerRecord) -> Result<()> {
        let conn = self.conn();
        Self::begin_pending(&conn)?;
        Self::write_player(&conn, UPSERT_GAME_DATA, record)
    }

    fn record_lobby(&self, lobby: &LobbySnapshot) -> Result<()> {
        let conn = self.conn();
        let json = serde_json::to_string(lobby).context("failed to serialize lobby")?;
        Self::begin_pending(&conn)?;
        conn.execute(
            "INSERT OR REPLACE INTO lobbies (game_id, payload, recorded_at)
             VALUES (?1, ?2, ?3)",
            params![lobby.game_id, json, now_millis()],
        )
        .context("failed to record lobby")?;
        Ok(())
    }

    fn record_game(&self, game: &EndOfGameSnapshot, observed_at: i64) -> Result<bool> {
        let conn = self.conn();
        let json = serde_json::to_string(game).context("failed to serialize game")?;
        Self::begin_pending(&conn)?;
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO games (game_id, observed_at, payload, recorded_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![game.game_id, observed_at, json, now_millis()],
            )
            .context("failed to record game")?;
        Ok(inserted > 0)
    }

    fn commit(&self) -> Result<()> {
        Self::commit_pending(&self.conn())
    }

    fn export_bundle(&self) -> Result<ExportBundle> {
        let conn = self.conn();

        let players = conn
            .prepare(
                "SELECT id, name, observed_at, note, note_color, stats
                 FROM players ORDER BY id",
            )
            .context("failed to prepare player export query")?
            .query_map([], |row| {
                let stats_json: String = row.get(5)?;
                Ok((
                    PlayerRecord {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        observed_at: row.get(2)?,
                        note: row.get(3)?,
                        note_color: row.get(4)?,
                        stats: PlayerStats::default(),
                    },
                    stats_json,
                ))
            })
            .context("failed to query players")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map player rows")?
            .into_iter()
            .map(|(mut record, stats_json)| -> Result<PlayerRecord> {
                record.stats = serde_json::from_str(&stats_json)
                    .with_context(|| format!("corrupt stats for player {}", record.id))?;
                Ok(record)
            })
            .collect::<Result<Vec<_>>>()?;

        let lobbies = conn
            .prepare("SELECT payload FROM lobbies ORDER BY game_id")
            .context("failed to prepare lobby export query")?
            .query_map([], |row| row.get::<_, String>(0))
            .context("failed to query lobbies")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map lobby rows")?
            .iter()
            .map(|json| serde_json::from_str(json).context("corrupt lobby payload"))
            .collect::<Result<Vec<LobbySnapshot>>>()?;

        let games = conn
            .prepare("SELECT observed_at, payload FROM games ORDER BY game_id")
            .context("failed to prepare game export query")?
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))
            .context("failed to query games")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map game rows")?
            .into_iter()
            .map(|(observed_at, json)| -> Result<RecordedGame> {
                let game = serde_json::from_str(&json).context("corrupt game payload")?;
                Ok(RecordedGame { observed_at, game })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(ExportBundle {
            exported_at: Utc::now(),
            players,
            lobbies,
            games,
        })
    }

    /// Merge `bundle` in a single transaction. Newer player rows win; games
    /// already stored are kept; lobbies are replaced.
    fn import_bundle(&self, bundle: &ExportBundle) -> Result<()> {
        let mut conn = self.conn();
        Self::commit_pending(&conn)?;
        let tx = conn
            .transaction()
            .context("failed to begin import transaction")?;

        for record in &bundle.players {
            Self::write_player(&tx, UPSERT_IMPORTED, record)?;
        }

        let recorded_at = now_millis();
        for lobby in &bundle.lobbies {
            let json = serde_json::to_string(lobby).context("failed to serialize lobby")?;
            tx.execute(
                "INSERT OR REPLACE INTO lobbies (game_id, payload, recorded_at)
                 VALUES (?1, ?2, ?3)",
                params![lobby.game_id, json, recorded_at],
            )
            .context("failed to import lobby")?;
        }
        for recorded in &bundle.games {
            let json = serde_json::to_string(&recorded.game).context("failed to serialize game")?;
            tx.execute(
                "INSERT OR IGNORE INTO games (game_id, observed_at, payload, recorded_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![recorded.game.game_id, recorded.observed_at, json, recorded_at],
            )
            .context("failed to import game")?;
        }

        tx.commit().context("failed to commit import")?;
        Ok(())
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Err(e) = Self::commit_pending(&self.conn()) {
            warn!("Failed to flush pending writes on close: {e:#}");
        }
    }
}

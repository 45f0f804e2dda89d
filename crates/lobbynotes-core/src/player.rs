// Player records: what we know about a player across games.

use serde::{Deserialize, Serialize};

use crate::protocol::{PlayerId, StatSummary};

/// Aggregate results over all recorded games.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerStats {
    pub wins: u32,
    pub losses: u32,
    pub leaves: u32,
    pub kills: u32,
    pub deaths: u32,
    pub assists: u32,
}

impl PlayerStats {
    pub fn games_played(&self) -> u32 {
        self.wins + self.losses
    }
}

/// Everything known about one player. The `id` never changes; `observed_at`
/// is the timestamp (epoch millis) of the newest game data folded into the
/// record and decides which of two copies is fresher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub id: PlayerId,
    pub name: String,
    pub observed_at: i64,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub note_color: Option<String>,
    #[serde(default)]
    pub stats: PlayerStats,
}

impl PlayerRecord {
    /// Identity-only record used when the store knows nothing about `id`.
    pub fn placeholder(id: PlayerId) -> Self {
        PlayerRecord {
            id,
            name: String::new(),
            observed_at: 0,
            note: String::new(),
            note_color: None,
            stats: PlayerStats::default(),
        }
    }

    /// True while nothing has been stored or observed for this identity: no
    /// game data, no stats and no note. The name may have been filled in from
    /// the roster.
    pub fn is_placeholder(&self) -> bool {
        self.observed_at == 0 && self.stats == PlayerStats::default() && self.note.is_empty()
    }

    /// Fold one end-of-game summary into the record. The name follows the
    /// summary; the timestamp only moves forward.
    pub fn apply_summary(&mut self, summary: &StatSummary, observed_at: i64) {
        debug_assert_eq!(self.id, summary.user_id);

        self.name = summary.summoner_name.clone();
        if summary.won {
            self.stats.wins += 1;
        } else {
            self.stats.losses += 1;
        }
        if summary.leaver {
            self.stats.leaves += 1;
        }
        self.stats.kills += summary.kills;
        self.stats.deaths += summary.deaths;
        self.stats.assists += summary.assists;
        self.observed_at = self.observed_at.max(observed_at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(won: bool, leaver: bool) -> StatSummary {
        StatSummary {
            user_id: 5,
            summoner_name: "Renamed".into(),
            won,
            leaver,
            kills: 3,
            deaths: 2,
            assists: 9,
        }
    }

    #[test]
    fn placeholder_holds_only_identity() {
        let p = PlayerRecord::placeholder(5);
        assert_eq!(p.id, 5);
        assert!(p.name.is_empty());
        assert_eq!(p.observed_at, 0);
        assert_eq!(p.stats.games_played(), 0);
    }

    #[test]
    fn placeholder_survives_a_name_but_not_data() {
        let mut p = PlayerRecord::placeholder(5);
        p.name = "From roster".into();
        assert!(p.is_placeholder());

        let mut noted = PlayerRecord::placeholder(5);
        noted.note = "afk".into();
        assert!(!noted.is_placeholder());

        let mut played = PlayerRecord::placeholder(5);
        played.apply_summary(&summary(false, false), 10);
        assert!(!played.is_placeholder());
    }

    #[test]
    fn apply_summary_accumulates_and_renames() {
        let mut p = PlayerRecord::placeholder(5);
        p.note = "tilts easily".into();

        p.apply_summary(&summary(true, false), 100);
        p.apply_summary(&summary(false, true), 200);

        assert_eq!(p.name, "Renamed");
        assert_eq!(p.stats.wins, 1);
        assert_eq!(p.stats.losses, 1);
        assert_eq!(p.stats.leaves, 1);
        assert_eq!(p.stats.kills, 6);
        assert_eq!(p.stats.assists, 18);
        assert_eq!(p.observed_at, 200);
        assert_eq!(p.note, "tilts easily");
    }

    #[test]
    fn apply_summary_never_moves_timestamp_back() {
        let mut p = PlayerRecord::placeholder(5);
        p.apply_summary(&summary(true, false), 300);
        p.apply_summary(&summary(true, false), 100);
        assert_eq!(p.observed_at, 300);
    }
}

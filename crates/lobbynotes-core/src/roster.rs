// Roster comparison used to skip redundant lobby redraws.

use crate::protocol::{LobbySnapshot, Participant, PlayerId, TeamSide};

/// What makes two roster entries "the same participant". Everything else on
/// a participant (champion pick, display tweaks) is ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParticipantKey<'a> {
    Player(PlayerId),
    Named(&'a str),
}

impl Participant {
    pub fn key(&self) -> ParticipantKey<'_> {
        match self {
            Participant::Player(p) => ParticipantKey::Player(p.id),
            Participant::Named { name } => ParticipantKey::Named(name),
        }
    }
}

/// Element-wise identity comparison of two rosters. A team present on one
/// side only is unequal; two absent teams are equal.
pub fn rosters_equal(a: Option<&[Participant]>, b: Option<&[Participant]>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.key() == y.key())
        }
        _ => false,
    }
}

/// True when both teams of `next` match those of `prev` slot for slot.
pub fn same_rosters(prev: &LobbySnapshot, next: &LobbySnapshot) -> bool {
    TeamSide::BOTH
        .into_iter()
        .all(|side| rosters_equal(prev.team(side), next.team(side)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PlayerParticipant;

    fn player(id: PlayerId, name: &str) -> Participant {
        Participant::Player(PlayerParticipant {
            id,
            name: name.into(),
            champion: None,
        })
    }

    fn named(name: &str) -> Participant {
        Participant::Named { name: name.into() }
    }

    fn team() -> Vec<Participant> {
        vec![player(1, "Alice"), player(2, "Bob"), named("Bot")]
    }

    #[test]
    fn equal_is_reflexive() {
        let t = team();
        assert!(rosters_equal(Some(t.as_slice()), Some(t.as_slice())));
        assert!(rosters_equal(Some(&[][..]), Some(&[][..])));
        assert!(rosters_equal(None, None));
    }

    #[test]
    fn single_slot_identity_change_is_unequal() {
        let a = team();
        let mut b = team();
        b[1] = player(3, "Bob");
        assert!(!rosters_equal(Some(a.as_slice()), Some(b.as_slice())));

        let mut c = team();
        c[2] = named("Other Bot");
        assert!(!rosters_equal(Some(a.as_slice()), Some(c.as_slice())));
    }

    #[test]
    fn unrelated_fields_do_not_matter() {
        let a = team();
        let mut b = team();
        b[0] = Participant::Player(PlayerParticipant {
            id: 1,
            name: "Alice (renamed)".into(),
            champion: Some("Annie".into()),
        });
        assert!(rosters_equal(Some(a.as_slice()), Some(b.as_slice())));
    }

    #[test]
    fn named_and_player_with_same_name_differ() {
        let a = vec![named("Alice")];
        let b = vec![player(1, "Alice")];
        assert!(!rosters_equal(Some(a.as_slice()), Some(b.as_slice())));
    }

    #[test]
    fn length_or_presence_mismatch_is_unequal() {
        let a = team();
        let b = &a[..2];
        assert!(!rosters_equal(Some(a.as_slice()), Some(b)));
        assert!(!rosters_equal(Some(a.as_slice()), None));
        assert!(!rosters_equal(None, Some(a.as_slice())));
    }

    #[test]
    fn same_rosters_checks_both_teams() {
        let prev = LobbySnapshot {
            game_id: 1,
            team_one: Some(team()),
            team_two: Some(vec![player(9, "Zed")]),
        };
        let mut next = prev.clone();
        assert!(same_rosters(&prev, &next));

        next.team_two = Some(vec![player(10, "Zed")]);
        assert!(!same_rosters(&prev, &next));

        next.team_two = None;
        assert!(!same_rosters(&prev, &next));
    }
}

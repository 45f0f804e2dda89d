// Console view: applies view updates to a model of the two team panels and
// describes each visible change as a line of text.

use lobbynotes_core::player::PlayerRecord;
use lobbynotes_core::protocol::{ConnectionStatus, Participant, SlotRef, TeamSide, ViewUpdate};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SlotView {
    pub hidden: bool,
    pub loading: bool,
    pub participant: Option<Participant>,
    pub record: Option<PlayerRecord>,
    pub no_stats: bool,
}

impl SlotView {
    fn name(&self) -> &str {
        match (&self.record, &self.participant) {
            (Some(record), _) if !record.name.is_empty() => &record.name,
            (_, Some(participant)) => participant.name(),
            _ => "?",
        }
    }

    /// One-line description of the slot.
    pub fn describe(&self) -> String {
        let mut line = self.name().to_string();
        if let Some(record) = &self.record {
            let s = &record.stats;
            line.push_str(&format!(
                "  {}W/{}L  {}/{}/{}",
                s.wins, s.losses, s.kills, s.deaths, s.assists
            ));
            if s.leaves > 0 {
                line.push_str(&format!("  left {}", s.leaves));
            }
            if !record.note.is_empty() {
                match &record.note_color {
                    Some(color) => line.push_str(&format!("  note[{color}]: {}", record.note)),
                    None => line.push_str(&format!("  note: {}", record.note)),
                }
            }
        } else if self.no_stats {
            line.push_str("  (no stats)");
        }
        if self.loading {
            line.push_str("  (loading)");
        }
        line
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TeamPanel {
    pub visible: bool,
    pub slots: Vec<SlotView>,
}

#[derive(Debug)]
pub struct ViewState {
    pub teams: [TeamPanel; 2],
    pub connection: ConnectionStatus,
    pub calls: Vec<(u64, String)>,
}

fn team_label(team: TeamSide) -> &'static str {
    match team {
        TeamSide::One => "T1",
        TeamSide::Two => "T2",
    }
}

impl ViewState {
    pub fn new(team_size: usize) -> Self {
        let panel = TeamPanel {
            visible: true,
            slots: vec![SlotView::default(); team_size],
        };
        ViewState {
            teams: [panel.clone(), panel],
            connection: ConnectionStatus::Disconnected,
            calls: Vec::new(),
        }
    }

    pub fn slot(&self, slot: SlotRef) -> Option<&SlotView> {
        self.teams[slot.team.index()].slots.get(slot.index)
    }

    fn slot_mut(&mut self, slot: SlotRef) -> Option<&mut SlotView> {
        self.teams[slot.team.index()].slots.get_mut(slot.index)
    }

    fn slot_line(&self, slot: SlotRef) -> Option<String> {
        let view = self.slot(slot)?;
        Some(format!(
            "{}.{} {}",
            team_label(slot.team),
            slot.index + 1,
            view.describe()
        ))
    }

    /// Apply `update`. Returns a line for the console when something worth
    /// showing changed.
    pub fn apply(&mut self, update: ViewUpdate) -> Option<String> {
        match update {
            ViewUpdate::SetLoading { slot, loading } => {
                self.slot_mut(slot)?.loading = loading;
                None
            }
            ViewUpdate::SetPlayer { slot, record } => {
                let view = self.slot_mut(slot)?;
                view.hidden = false;
                view.loading = false;
                view.no_stats = false;
                view.record = Some(record);
                self.slot_line(slot)
            }
            ViewUpdate::SetParticipant { slot, participant } => {
                let view = self.slot_mut(slot)?;
                view.hidden = false;
                view.no_stats = false;
                view.record = None;
                view.participant = Some(participant);
                self.slot_line(slot)
            }
            ViewUpdate::SetNoStats { slot } => {
                let view = self.slot_mut(slot)?;
                view.record = None;
                view.no_stats = true;
                self.slot_line(slot)
            }
            ViewUpdate::HideSlot { slot } => {
                *self.slot_mut(slot)? = SlotView {
                    hidden: true,
                    ..SlotView::default()
                };
                None
            }
            ViewUpdate::SetTeamVisible { team, visible } => {
                let panel = &mut self.teams[team.index()];
                if panel.visible == visible {
                    return None;
                }
                panel.visible = visible;
                let state = if visible { "shown" } else { "hidden" };
                Some(format!("{} {state}", team_label(team)))
            }
            ViewUpdate::ConnectionStatus(status) => {
                self.connection = status;
                Some(match status {
                    ConnectionStatus::Connected => "Loader connected".to_string(),
                    ConnectionStatus::Disconnected => "Loader disconnected".to_string(),
                })
            }
            ViewUpdate::CallLogged { id, summary } => {
                let line = format!("[{id}] {summary}");
                self.calls.push((id, summary));
                Some(line)
            }
            ViewUpdate::CallsCleared => {
                self.calls.clear();
                Some("Call log cleared".to_string())
            }
            ViewUpdate::CallTree { id, roots } => {
                let mut out = format!("Call {id}:\n");
                for root in &roots {
                    out.push_str(&root.render());
                }
                Some(out.trim_end().to_string())
            }
            ViewUpdate::Notice(msg) => Some(msg),
        }
    }

    /// Text rendering of both panels.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for team in TeamSide::BOTH {
            let panel = &self.teams[team.index()];
            if !panel.visible {
                continue;
            }
            for index in 0..panel.slots.len() {
                let slot = SlotRef::new(team, index);
                if panel.slots[index].hidden {
                    continue;
                }
                if let Some(line) = self.slot_line(slot) {
                    out.push_str(&line);
                    out.push('\n');
                }
            }
        }
        out
    }
}

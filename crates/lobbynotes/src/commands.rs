// Console command parsing.

use std::path::PathBuf;

use lobbynotes_core::protocol::{SlotRef, TeamSide, UserCommand};

pub const HELP: &str = "\
commands:
  note <team> <slot> [color=<c>] <text>   set the note for a slot (team 1|2, slot from 1)
  clear <team> <slot>                     clear the note for a slot
  dev on|off                              toggle call capture
  inspect <id>                            show the tree of a captured call
  calls clear                             clear captured calls
  export <path>                           write all players and games to a JSON file
  import <path>                           merge a JSON export into the store
  quit                                    exit";

/// Parse one console line. Returns `None` for anything unrecognised.
pub fn parse_command(line: &str) -> Option<UserCommand> {
    let mut words = line.split_whitespace();
    let command = words.next()?;

    match command {
        "note" => {
            let slot = parse_slot(words.next()?, words.next()?)?;
            let mut rest: Vec<&str> = words.collect();
            let color = match rest.first().and_then(|w| w.strip_prefix("color=")) {
                Some(c) => {
                    let color = c.to_string();
                    rest.remove(0);
                    Some(color)
                }
                None => None,
            };
            if rest.is_empty() {
                return None;
            }
            Some(UserCommand::EditNote {
                slot,
                note: rest.join(" "),
                color,
            })
        }
        "clear" => {
            let slot = parse_slot(words.next()?, words.next()?)?;
            Some(UserCommand::ClearNote { slot })
        }
        "dev" => match words.next()? {
            "on" => Some(UserCommand::SetDevMode(true)),
            "off" => Some(UserCommand::SetDevMode(false)),
            _ => None,
        },
        "inspect" => words.next()?.parse().ok().map(UserCommand::InspectCall),
        "calls" if words.next() == Some("clear") => Some(UserCommand::ClearCalls),
        "export" => file_argument(line).map(|path| UserCommand::Export { path }),
        "import" => file_argument(line).map(|path| UserCommand::Import { path }),
        "quit" | "q" | "exit" => Some(UserCommand::Quit),
        _ => None,
    }
}

/// Everything after the command word, so paths may contain spaces.
fn file_argument(line: &str) -> Option<PathBuf> {
    let (_, rest) = line.trim().split_once(char::is_whitespace)?;
    let path = rest.trim();
    (!path.is_empty()).then(|| PathBuf::from(path))
}

/// Team is `1` or `2`; slots are numbered from 1.
fn parse_slot(team: &str, slot: &str) -> Option<SlotRef> {
    let team = match team {
        "1" => TeamSide::One,
        "2" => TeamSide::Two,
        _ => return None,
    };
    let index: usize = slot.parse().ok()?;
    Some(SlotRef::new(team, index.checked_sub(1)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_with_color() {
        assert_eq!(
            parse_command("note 2 3 color=red  tilts   after first death"),
            Some(UserCommand::EditNote {
                slot: SlotRef::new(TeamSide::Two, 2),
                note: "tilts after first death".into(),
                color: Some("red".into()),
            })
        );
    }

    #[test]
    fn note_without_color() {
        assert_eq!(
            parse_command("note 1 1 nice"),
            Some(UserCommand::EditNote {
                slot: SlotRef::new(TeamSide::One, 0),
                note: "nice".into(),
                color: None,
            })
        );
    }

    #[test]
    fn note_requires_text_and_valid_slot() {
        assert_eq!(parse_command("note 1 1"), None);
        assert_eq!(parse_command("note 1 1 color=red"), None);
        assert_eq!(parse_command("note 3 1 text"), None);
        assert_eq!(parse_command("note 1 0 text"), None);
    }

    #[test]
    fn simple_commands() {
        assert_eq!(
            parse_command("clear 1 5"),
            Some(UserCommand::ClearNote {
                slot: SlotRef::new(TeamSide::One, 4)
            })
        );
        assert_eq!(parse_command("dev on"), Some(UserCommand::SetDevMode(true)));
        assert_eq!(parse_command("dev off"), Some(UserCommand::SetDevMode(false)));
        assert_eq!(parse_command("inspect 12"), Some(UserCommand::InspectCall(12)));
        assert_eq!(parse_command("calls clear"), Some(UserCommand::ClearCalls));
        assert_eq!(parse_command("  quit "), Some(UserCommand::Quit));
    }

    #[test]
    fn export_and_import_take_the_rest_of_the_line() {
        assert_eq!(
            parse_command("export  /tmp/my notes.json "),
            Some(UserCommand::Export {
                path: PathBuf::from("/tmp/my notes.json")
            })
        );
        assert_eq!(
            parse_command("import backup.json"),
            Some(UserCommand::Import {
                path: PathBuf::from("backup.json")
            })
        );
        assert_eq!(parse_command("export"), None);
        assert_eq!(parse_command("import   "), None);
    }

    #[test]
    fn junk_is_rejected() {
        assert_eq!(parse_command(""), None);
        assert_eq!(parse_command("dev maybe"), None);
        assert_eq!(parse_command("inspect x"), None);
        assert_eq!(parse_command("calls"), None);
        assert_eq!(parse_command("hello"), None);
    }
}

//! Client command grammar.
//!
//! Every command is a single text frame: a keyword followed by
//! space-separated fields, where the last field takes the rest of the line.
//! `SendFile` is the exception that carries no fields in its own frame; the
//! group, file name, length field and raw run follow it on the stream.

use std::fmt;

use thiserror::Error;

/// Field separator inside a command frame.
pub const FIELD_SEPARATOR: char = ' ';

/// The kinds of command a client may send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// Close the session
    Quit,
    /// Create a group
    AddGroup,
    /// Join an existing group
    JoinGroup,
    /// Send text to a joined group
    SendMessage,
    /// Leave a joined group
    LeaveGroup,
    /// Delete a group, evicting its members
    RemoveGroup,
    /// Upload a file to a group
    SendFile,
}

impl CommandKind {
    /// Every kind, in protocol order.
    pub const ALL: [Self; 7] = [
        Self::Quit,
        Self::AddGroup,
        Self::JoinGroup,
        Self::SendMessage,
        Self::LeaveGroup,
        Self::RemoveGroup,
        Self::SendFile,
    ];

    /// Keyword that starts the command frame.
    pub fn keyword(self) -> &'static str {
        match self {
            Self::Quit => "quit",
            Self::AddGroup => "AddGroup",
            Self::JoinGroup => "JoinGroup",
            Self::SendMessage => "SendMessage",
            Self::LeaveGroup => "LeaveGroup",
            Self::RemoveGroup => "RemoveGroup",
            Self::SendFile => "SendFile",
        }
    }

    /// Usage hint sent back when the fields don't fit.
    pub fn usage(self) -> &'static str {
        match self {
            Self::Quit => "Usage: quit",
            Self::AddGroup => "Usage: AddGroup <group name>",
            Self::JoinGroup => "Usage: JoinGroup <group name>",
            Self::SendMessage => "Usage: SendMessage <group name> <message>",
            Self::LeaveGroup => "Usage: LeaveGroup <group name>",
            Self::RemoveGroup => "Usage: RemoveGroup <group name>",
            Self::SendFile => "Usage: SendFile, then group name, file name, length and payload",
        }
    }

    fn from_keyword(keyword: &str) -> Option<Self> {
        if keyword.eq_ignore_ascii_case(Self::Quit.keyword()) {
            return Some(Self::Quit);
        }
        Self::ALL.into_iter().find(|kind| kind.keyword() == keyword)
    }
}

/// Why a command frame could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// Known keyword, wrong fields
    #[error("{}", .0.usage())]
    Usage(CommandKind),

    /// Keyword not recognised
    #[error("unknown command")]
    Unknown,
}

/// A parsed client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Close the session
    Quit,
    /// Create `group` if absent
    AddGroup {
        /// Group name
        group: String,
    },
    /// Join `group`
    JoinGroup {
        /// Group name
        group: String,
    },
    /// Send `text` to every member of `group`
    SendMessage {
        /// Group name
        group: String,
        /// Message body, may contain spaces
        text: String,
    },
    /// Leave `group`
    LeaveGroup {
        /// Group name
        group: String,
    },
    /// Delete `group` and evict its members
    RemoveGroup {
        /// Group name
        group: String,
    },
    /// Start a file upload; header fields follow as separate frames
    SendFile,
}

impl Command {
    /// Parse one command frame.
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let (keyword, rest) = match line.split_once(FIELD_SEPARATOR) {
            Some((keyword, rest)) => (keyword, Some(rest)),
            None => (line, None),
        };
        let kind = CommandKind::from_keyword(keyword).ok_or(CommandError::Unknown)?;
        let usage = CommandError::Usage(kind);

        match kind {
            CommandKind::Quit | CommandKind::SendFile => {
                if rest.is_some() {
                    return Err(usage);
                }
                Ok(if kind == CommandKind::Quit { Self::Quit } else { Self::SendFile })
            },
            CommandKind::SendMessage => {
                let (group, text) = rest.and_then(|r| r.split_once(FIELD_SEPARATOR)).ok_or(usage)?;
                if group.is_empty() {
                    return Err(CommandError::Usage(kind));
                }
                Ok(Self::SendMessage { group: group.to_string(), text: text.to_string() })
            },
            CommandKind::AddGroup
            | CommandKind::JoinGroup
            | CommandKind::LeaveGroup
            | CommandKind::RemoveGroup => {
                let group = rest.filter(|g| !g.is_empty()).ok_or(usage)?.to_string();
                Ok(match kind {
                    CommandKind::AddGroup => Self::AddGroup { group },
                    CommandKind::JoinGroup => Self::JoinGroup { group },
                    CommandKind::LeaveGroup => Self::LeaveGroup { group },
                    _ => Self::RemoveGroup { group },
                })
            },
        }
    }

    /// Kind of this command.
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::Quit => CommandKind::Quit,
            Self::AddGroup { .. } => CommandKind::AddGroup,
            Self::JoinGroup { .. } => CommandKind::JoinGroup,
            Self::SendMessage { .. } => CommandKind::SendMessage,
            Self::LeaveGroup { .. } => CommandKind::LeaveGroup,
            Self::RemoveGroup { .. } => CommandKind::RemoveGroup,
            Self::SendFile => CommandKind::SendFile,
        }
    }
}

/// Renders the command as the text frame a client sends.
impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keyword = self.kind().keyword();
        match self {
            Self::Quit | Self::SendFile => f.write_str(keyword),
            Self::AddGroup { group }
            | Self::JoinGroup { group }
            | Self::LeaveGroup { group }
            | Self::RemoveGroup { group } => write!(f, "{keyword} {group}"),
            Self::SendMessage { group, text } => write!(f, "{keyword} {group} {text}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_field_commands() {
        assert_eq!(
            Command::parse("AddGroup rust"),
            Ok(Command::AddGroup { group: "rust".to_string() })
        );
        assert_eq!(
            Command::parse("JoinGroup rust"),
            Ok(Command::JoinGroup { group: "rust".to_string() })
        );
        assert_eq!(
            Command::parse("LeaveGroup rust"),
            Ok(Command::LeaveGroup { group: "rust".to_string() })
        );
        assert_eq!(
            Command::parse("RemoveGroup rust"),
            Ok(Command::RemoveGroup { group: "rust".to_string() })
        );
    }

    #[test]
    fn single_field_takes_rest_of_line() {
        assert_eq!(
            Command::parse("AddGroup book club"),
            Ok(Command::AddGroup { group: "book club".to_string() })
        );
    }

    #[test]
    fn message_text_keeps_separators() {
        assert_eq!(
            Command::parse("SendMessage rust hello there,  world"),
            Ok(Command::SendMessage {
                group: "rust".to_string(),
                text: "hello there,  world".to_string()
            })
        );
    }

    #[test]
    fn message_text_may_be_empty() {
        assert_eq!(
            Command::parse("SendMessage rust "),
            Ok(Command::SendMessage { group: "rust".to_string(), text: String::new() })
        );
    }

    #[test]
    fn quit_is_case_insensitive() {
        assert_eq!(Command::parse("quit"), Ok(Command::Quit));
        assert_eq!(Command::parse("QUIT"), Ok(Command::Quit));
        assert_eq!(Command::parse("Quit"), Ok(Command::Quit));
    }

    #[test]
    fn other_keywords_are_case_sensitive() {
        assert_eq!(Command::parse("addgroup rust"), Err(CommandError::Unknown));
    }

    #[test]
    fn field_count_mismatch_yields_usage() {
        assert_eq!(Command::parse("AddGroup"), Err(CommandError::Usage(CommandKind::AddGroup)));
        assert_eq!(Command::parse("AddGroup "), Err(CommandError::Usage(CommandKind::AddGroup)));
        assert_eq!(
            Command::parse("SendMessage rust"),
            Err(CommandError::Usage(CommandKind::SendMessage))
        );
        assert_eq!(
            Command::parse("SendMessage  hi"),
            Err(CommandError::Usage(CommandKind::SendMessage))
        );
        assert_eq!(Command::parse("SendFile x"), Err(CommandError::Usage(CommandKind::SendFile)));
        assert_eq!(Command::parse("quit now"), Err(CommandError::Usage(CommandKind::Quit)));
    }

    #[test]
    fn unknown_keyword() {
        assert_eq!(Command::parse("Dance"), Err(CommandError::Unknown));
        assert_eq!(Command::parse(""), Err(CommandError::Unknown));
    }

    #[test]
    fn display_matches_wire_text() {
        let commands = [
            Command::Quit,
            Command::SendFile,
            Command::AddGroup { group: "g".to_string() },
            Command::SendMessage { group: "g".to_string(), text: "a b".to_string() },
        ];
        for command in commands {
            assert_eq!(Command::parse(&command.to_string()), Ok(command));
        }
    }

    #[test]
    fn usage_error_displays_hint() {
        let err = CommandError::Usage(CommandKind::SendMessage);
        assert_eq!(err.to_string(), "Usage: SendMessage <group name> <message>");
    }
}

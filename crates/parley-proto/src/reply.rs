//! Server-to-client texts.
//!
//! Everything the server sends is a text frame rendered from [`Reply`]:
//! replies to the originator of a command, and notices delivered to group
//! members.

use std::fmt;

use crate::command::{CommandError, CommandKind};

/// Prefix of the file arrival notice.
pub const FILE_NOTICE_PREFIX: &str = "ReceiveFile ";

/// A text the server sends to a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply<'a> {
    /// `AddGroup` succeeded
    GroupCreated {
        /// Group name
        group: &'a str,
    },
    /// `AddGroup` found the name taken
    GroupExists {
        /// Group name
        group: &'a str,
    },
    /// `JoinGroup` succeeded
    Joined {
        /// Group name
        group: &'a str,
    },
    /// `JoinGroup` on a group already joined
    AlreadyMember {
        /// Group name
        group: &'a str,
    },
    /// Target group is not in the registry
    NoSuchGroup {
        /// Group name
        group: &'a str,
    },
    /// `SendMessage` to a group not joined
    NotMember {
        /// Group name
        group: &'a str,
    },
    /// `LeaveGroup` succeeded
    Left {
        /// Group name
        group: &'a str,
    },
    /// `LeaveGroup` on a missing group or one not joined
    CannotLeave {
        /// Group name
        group: &'a str,
    },
    /// `RemoveGroup` succeeded
    GroupRemoved {
        /// Group name
        group: &'a str,
    },
    /// Upload stored and announced
    FileSent {
        /// Announced file name
        file: &'a str,
        /// Owning group
        group: &'a str,
    },
    /// Upload failed
    FileFailed {
        /// Human-readable cause
        reason: &'a str,
    },
    /// Keyword not recognised
    UnknownCommand,
    /// Wrong fields for a known command
    Usage(CommandKind),

    /// Notice: a member joined
    MemberJoined {
        /// Display name of the new member
        name: &'a str,
        /// Group name
        group: &'a str,
    },
    /// Notice: a member left or disconnected
    MemberLeft {
        /// Display name of the departed member
        name: &'a str,
        /// Group name
        group: &'a str,
    },
    /// Notice: the group was deleted and you were evicted
    GroupDeleted {
        /// Group name
        group: &'a str,
    },
    /// A group message
    Message {
        /// Display name of the sender
        name: &'a str,
        /// Group name
        group: &'a str,
        /// Body
        text: &'a str,
    },
    /// Notice: a file is available
    FileAvailable {
        /// Announced file name
        file: &'a str,
    },
}

impl<'a> From<&'a CommandError> for Reply<'a> {
    fn from(err: &'a CommandError) -> Self {
        match err {
            CommandError::Usage(kind) => Self::Usage(*kind),
            CommandError::Unknown => Self::UnknownCommand,
        }
    }
}

impl fmt::Display for Reply<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GroupCreated { group } => write!(f, "Group {group} created."),
            Self::GroupExists { group } => write!(f, "Error: Group {group} already exists."),
            Self::Joined { group } => write!(f, "Joined group {group}"),
            Self::AlreadyMember { group } => write!(f, "Error: You are already a member of {group}"),
            Self::NoSuchGroup { group } => write!(f, "Error: Group {group} does not exist."),
            Self::NotMember { group } => write!(f, "Error: You are not a member of {group}"),
            Self::Left { group } => write!(f, "Left group {group}"),
            Self::CannotLeave { group } => {
                write!(f, "Error: Group {group} does not exist or you are not a member.")
            },
            Self::GroupRemoved { group } => write!(f, "Group {group} removed."),
            Self::FileSent { file, group } => write!(f, "File {file} sent to group {group}"),
            Self::FileFailed { reason } => write!(f, "Error sending file: {reason}"),
            Self::UnknownCommand => f.write_str("Unknown command."),
            Self::Usage(kind) => f.write_str(kind.usage()),
            Self::MemberJoined { name, group } => write!(f, "{name} has joined the group {group}"),
            Self::MemberLeft { name, group } => write!(f, "{name} has left the group {group}"),
            Self::GroupDeleted { group } => write!(f, "Group {group} has been removed."),
            Self::Message { name, group, text } => write!(f, "{name} ({group}): {text}"),
            Self::FileAvailable { file } => write!(f, "{FILE_NOTICE_PREFIX}{file}"),
        }
    }
}

/// File name carried by a file arrival notice, if `text` is one.
pub fn file_notice(text: &str) -> Option<&str> {
    text.strip_prefix(FILE_NOTICE_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_replies() {
        insta::assert_snapshot!(Reply::GroupCreated { group: "rust" }, @"Group rust created.");
        insta::assert_snapshot!(
            Reply::GroupExists { group: "rust" },
            @"Error: Group rust already exists."
        );
        insta::assert_snapshot!(Reply::Joined { group: "rust" }, @"Joined group rust");
        insta::assert_snapshot!(
            Reply::AlreadyMember { group: "rust" },
            @"Error: You are already a member of rust"
        );
        insta::assert_snapshot!(
            Reply::NoSuchGroup { group: "rust" },
            @"Error: Group rust does not exist."
        );
        insta::assert_snapshot!(
            Reply::NotMember { group: "rust" },
            @"Error: You are not a member of rust"
        );
        insta::assert_snapshot!(Reply::Left { group: "rust" }, @"Left group rust");
        insta::assert_snapshot!(
            Reply::CannotLeave { group: "rust" },
            @"Error: Group rust does not exist or you are not a member."
        );
        insta::assert_snapshot!(Reply::GroupRemoved { group: "rust" }, @"Group rust removed.");
        insta::assert_snapshot!(
            Reply::FileSent { file: "a.txt", group: "rust" },
            @"File a.txt sent to group rust"
        );
        insta::assert_snapshot!(
            Reply::FileFailed { reason: "disk full" },
            @"Error sending file: disk full"
        );
        insta::assert_snapshot!(Reply::UnknownCommand, @"Unknown command.");
    }

    #[test]
    fn member_notices() {
        insta::assert_snapshot!(
            Reply::MemberJoined { name: "alice", group: "rust" },
            @"alice has joined the group rust"
        );
        insta::assert_snapshot!(
            Reply::MemberLeft { name: "alice", group: "rust" },
            @"alice has left the group rust"
        );
        insta::assert_snapshot!(
            Reply::GroupDeleted { group: "rust" },
            @"Group rust has been removed."
        );
        insta::assert_snapshot!(
            Reply::Message { name: "alice", group: "rust", text: "hi all" },
            @"alice (rust): hi all"
        );
        insta::assert_snapshot!(Reply::FileAvailable { file: "a.txt" }, @"ReceiveFile a.txt");
    }

    #[test]
    fn command_errors_map_to_replies() {
        let usage = CommandError::Usage(CommandKind::JoinGroup);
        assert_eq!(Reply::from(&usage).to_string(), "Usage: JoinGroup <group name>");
        assert_eq!(Reply::from(&CommandError::Unknown).to_string(), "Unknown command.");
    }

    #[test]
    fn file_notice_extracts_name() {
        assert_eq!(file_notice("ReceiveFile notes.txt"), Some("notes.txt"));
        assert_eq!(file_notice("alice (g): ReceiveFile x"), None);
    }
}

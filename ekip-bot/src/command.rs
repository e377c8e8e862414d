//! Command tokens and parsing.
//!
//! Front ends split a chat line into [`Token`]s, resolving mentions to
//! directory ids on the way, and hand everything after the prefix to
//! [`parse`].

use ekip_core::EntityId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Word(String),
    /// A mentioned member.
    Member(EntityId),
    /// A mentioned group.
    Group(EntityId),
}

/// How an admin names the team to delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeamRef {
    Group(EntityId),
    /// Team name without prefix.
    Name(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Status { members: Vec<EntityId> },
    Create { name: String },
    Add { members: Vec<EntityId>, index: Option<String> },
    Leave { index: Option<String> },
    Delete { team: TeamRef },
    DeleteAll,
    Help,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandName {
    Status,
    Create,
    Add,
    Leave,
    Delete,
    DeleteAll,
    Help,
}

impl CommandName {
    pub fn lookup(word: &str) -> Option<Self> {
        match word.to_lowercase().as_str() {
            "status" | "teams" => Some(Self::Status),
            "create" | "new" => Some(Self::Create),
            "add" | "invite" => Some(Self::Add),
            "leave" => Some(Self::Leave),
            "delete" => Some(Self::Delete),
            "delete-all" | "delete_all" => Some(Self::DeleteAll),
            "help" | "h" => Some(Self::Help),
            _ => None,
        }
    }
}

/// Arguments were missing or malformed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageError(pub CommandName);

/// Parse a command line (prefix already stripped). `Ok(None)` means the
/// first word is not one of ours and the line should be ignored.
pub fn parse(tokens: &[Token]) -> Result<Option<Command>, UsageError> {
    let Some(Token::Word(first)) = tokens.first() else {
        return Ok(None);
    };
    let Some(name) = CommandName::lookup(first) else {
        return Ok(None);
    };
    let rest = &tokens[1..];
    let members: Vec<EntityId> = rest
        .iter()
        .filter_map(|t| match t {
            Token::Member(id) => Some(*id),
            _ => None,
        })
        .collect();
    let first_word = rest.iter().find_map(|t| match t {
        Token::Word(w) => Some(w.clone()),
        _ => None,
    });

    let cmd = match name {
        CommandName::Status => Command::Status { members },
        CommandName::Create => {
            let words: Vec<&str> = rest
                .iter()
                .filter_map(|t| match t {
                    Token::Word(w) => Some(w.as_str()),
                    _ => None,
                })
                .collect();
            if words.is_empty() {
                return Err(UsageError(name));
            }
            Command::Create {
                name: words.join(" "),
            }
        }
        CommandName::Add => {
            if members.is_empty() {
                return Err(UsageError(name));
            }
            Command::Add {
                members,
                index: first_word,
            }
        }
        CommandName::Leave => Command::Leave { index: first_word },
        CommandName::Delete => {
            let group = rest.iter().find_map(|t| match t {
                Token::Group(id) => Some(*id),
                _ => None,
            });
            match (group, first_word) {
                (Some(id), _) => Command::Delete {
                    team: TeamRef::Group(id),
                },
                (None, Some(_)) => Command::Delete {
                    team: TeamRef::Name(
                        rest.iter()
                            .filter_map(|t| match t {
                                Token::Word(w) => Some(w.as_str()),
                                _ => None,
                            })
                            .collect::<Vec<_>>()
                            .join(" "),
                    ),
                },
                (None, None) => return Err(UsageError(name)),
            }
        }
        CommandName::DeleteAll => Command::DeleteAll,
        CommandName::Help => Command::Help,
    };
    Ok(Some(cmd))
}

/// Split plain text into word tokens.
pub fn words(text: &str) -> Vec<Token> {
    text.split_whitespace()
        .map(|w| Token::Word(w.to_string()))
        .collect()
}

//! Chat command parsing.

/// An in-band command, handled before any dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `/role <text>` - set the conversation's persona.
    SetRole(String),
    /// `/role` - show the current persona.
    QueryRole,
    /// `/reset_role` - restore the default persona.
    ResetRole,
    /// `/reset` - forget the conversation context.
    Reset,
}

/// Parse a trimmed message into a command, or `None` for ordinary text.
pub fn parse(text: &str) -> Option<Command> {
    let rest = text.strip_prefix('/')?;
    let (verb, arg) = match rest.split_once(char::is_whitespace) {
        Some((verb, arg)) => (verb, arg.trim()),
        None => (rest, ""),
    };
    match (verb, arg) {
        ("role", "") => Some(Command::QueryRole),
        ("role", role) => Some(Command::SetRole(role.to_string())),
        ("reset_role", "") => Some(Command::ResetRole),
        ("reset", "") => Some(Command::Reset),
        _ => None,
    }
}

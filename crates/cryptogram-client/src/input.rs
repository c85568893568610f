//! Line-oriented input for the interactive client.

use crate::types::ClientCommand;

pub const HELP_TEXT: &str = "Commands:
  /list           show users available for a conversation
  /join <user>    start a conversation with <user>
  /leave          leave the current conversation
  /quit           log out and exit
  /help           show this message
Anything else is sent to your conversation partner, encrypted.";

const JOIN_USAGE: &str = "Join command usage:\n/join <username>";
const UNKNOWN_COMMAND: &str = "Unknown command. Type /help for a list of commands.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Command(ClientCommand),
    Help,
    /// Malformed command, with the text to show the user
    Usage(&'static str),
}

/// Map one line of user input. Blank lines produce nothing.
pub fn parse_input(line: &str) -> Option<Input> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let Some(rest) = line.strip_prefix('/') else {
        return Some(Input::Command(ClientCommand::Chat(line.to_string())));
    };

    let mut words = rest.split_whitespace();
    let input = match words.next().unwrap_or_default() {
        "list" => Input::Command(ClientCommand::List),
        "join" => match (words.next(), words.next()) {
            (Some(name), None) => Input::Command(ClientCommand::Join(name.to_string())),
            _ => Input::Usage(JOIN_USAGE),
        },
        "leave" => Input::Command(ClientCommand::Leave),
        "quit" | "logout" => Input::Command(ClientCommand::Logout),
        "help" => Input::Help,
        _ => Input::Usage(UNKNOWN_COMMAND),
    };
    Some(input)
}

//! Interactive chat commands — messages starting with `/` handled without
//! an LLM round trip.
//!
//! Surface: `/show model|channel|agents`, `/list models|channels|agents`,
//! `/switch model|channel to <name>`. Unknown commands fall through to the
//! normal agent path.

/// A parsed chat command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    ShowModel,
    ShowChannel,
    ShowAgents,
    ListModels,
    ListChannels,
    ListAgents,
    SwitchModel(String),
    SwitchChannel(String),
}

/// Parse a chat command. `None` means "not a command we know" — the caller
/// falls through to normal processing.
pub fn parse_command(content: &str) -> Option<Command> {
    let content = content.trim();
    if !content.starts_with('/') {
        return None;
    }

    let mut words = content.split_whitespace();
    let verb = words.next()?;

    match verb {
        "/show" => match words.next()? {
            "model" => Some(Command::ShowModel),
            "channel" => Some(Command::ShowChannel),
            "agents" => Some(Command::ShowAgents),
            _ => None,
        },
        "/list" => match words.next()? {
            "models" => Some(Command::ListModels),
            "channels" => Some(Command::ListChannels),
            "agents" => Some(Command::ListAgents),
            _ => None,
        },
        "/switch" => {
            let what = words.next()?;
            if words.next()? != "to" {
                return None;
            }
            let name: Vec<&str> = words.collect();
            if name.is_empty() {
                return None;
            }
            let name = name.join(" ");
            match what {
                "model" => Some(Command::SwitchModel(name)),
                "channel" => Some(Command::SwitchChannel(name)),
                _ => None,
            }
        }
        _ => None,
    }
}

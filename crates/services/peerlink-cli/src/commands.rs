//! Interactive prompt commands

/// One line typed at the prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Plain text goes to every connected peer
    Say(String),
    Video,
    Audio,
    Media,
    Peers,
    Connect(String),
    Disconnect(String),
    Status,
    Help,
    Quit,
    Empty,
    Unknown(String),
}

pub const HELP: &str = "\
/connect <id>     dial a host by its connection id
/disconnect <id>  drop one peer
/media            start local audio/video and offer it to every peer
/video            toggle the local camera
/audio            toggle the local microphone
/peers            list known peers
/status           show identity and connection status
/quit             leave
anything else is sent as a chat message";

impl Command {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Command::Empty;
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Command::Say(line.to_string());
        };

        let mut parts = rest.split_whitespace();
        let name = parts.next().unwrap_or_default().to_ascii_lowercase();
        let arg = parts.next().map(str::to_string);
        match (name.as_str(), arg) {
            ("video", _) => Command::Video,
            ("audio", _) => Command::Audio,
            ("media", _) => Command::Media,
            ("peers", _) => Command::Peers,
            ("status", _) => Command::Status,
            ("connect", Some(id)) => Command::Connect(id),
            ("disconnect", Some(id)) => Command::Disconnect(id),
            ("help", _) | ("?", _) => Command::Help,
            ("quit", _) | ("exit", _) => Command::Quit,
            _ => Command::Unknown(line.to_string()),
        }
    }
}

//! Line commands and event rendering for the interactive node

use std::fmt;

use meshguard_core::{AppEvent, SosMessage, SystemStatus};

// ----------------------------------------------------------------------------
// Line Commands
// ----------------------------------------------------------------------------

/// One line typed at the node prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineCommand {
    Offer,
    Scan,
    Submit(String),
    Reset,
    Sos(String),
    Test,
    Peers,
    Messages,
    Status,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    Empty,
    Unknown(String),
    MissingArgument(&'static str),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Empty => write!(f, "empty command"),
            ParseError::Unknown(word) => write!(f, "unknown command '{word}', try 'help'"),
            ParseError::MissingArgument(usage) => write!(f, "usage: {usage}"),
        }
    }
}

impl std::error::Error for ParseError {}

impl LineCommand {
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        let command = match word.to_ascii_lowercase().as_str() {
            "" => return Err(ParseError::Empty),
            "offer" => LineCommand::Offer,
            "scan" => LineCommand::Scan,
            "submit" => {
                if rest.is_empty() {
                    return Err(ParseError::MissingArgument("submit <code>"));
                }
                LineCommand::Submit(rest.to_string())
            }
            "reset" => LineCommand::Reset,
            "sos" => {
                if rest.is_empty() {
                    return Err(ParseError::MissingArgument("sos <text>"));
                }
                LineCommand::Sos(rest.to_string())
            }
            "test" => LineCommand::Test,
            "peers" => LineCommand::Peers,
            "messages" | "msgs" => LineCommand::Messages,
            "status" => LineCommand::Status,
            "help" | "?" => LineCommand::Help,
            "quit" | "exit" => LineCommand::Quit,
            other => return Err(ParseError::Unknown(other.to_string())),
        };
        Ok(command)
    }
}

pub const HELP: &str = "\
commands:
  offer            show a pairing code for another device to scan
  scan             switch to entering the other device's answer code
  submit <code>    enter a code shown by another device
  reset            abandon the pairing in progress
  sos <text>       send an SOS to the mesh
  test             send a test message
  peers            list connected peers
  messages         list stored messages, newest first
  status           show node status
  quit             leave";

// ----------------------------------------------------------------------------
// Rendering
// ----------------------------------------------------------------------------

/// Text printed for an app event, if it is worth showing
pub fn render_event(event: &AppEvent) -> Option<String> {
    match event {
        AppEvent::SignalReady { kind, text } => Some(format!(
            "{kind} code, enter it on the other device with 'submit':\n{text}"
        )),
        AppEvent::StopScanning => None,
        AppEvent::MessageDelivered { message } => Some(render_message(message)),
        AppEvent::SystemStatusReport(status) => Some(render_status(status)),
        other => Some(other.to_string()),
    }
}

pub fn render_message(message: &SosMessage) -> String {
    let mut line = format!(
        "[{}] {} from {} ({} hop(s)){}: {}",
        message.status,
        message.timestamp,
        message.sender_id,
        message.hops,
        if message.is_auto_triggered { " auto" } else { "" },
        message.text
    );
    if let Some(location) = &message.location {
        line.push_str(&format!(
            " @ {:.5},{:.5} ±{:.0}m",
            location.latitude, location.longitude, location.accuracy
        ));
    }
    line
}

pub fn render_status(status: &SystemStatus) -> String {
    let mut lines = vec![format!("sender id: {}", status.sender_id)];
    if let Some(id) = &status.discovery_id {
        lines.push(format!("discovery id: {id}"));
    }
    if let Some(state) = status.handshake_state {
        lines.push(format!("handshake: {state}"));
    }
    lines.push(format!(
        "peers: {}, sessions: {}",
        status.connected_peers.len(),
        status.active_sessions
    ));
    lines.push(format!(
        "messages processed: {}, duplicates: {}, uptime: {}s",
        status.messages_processed, status.duplicates_detected, status.uptime_seconds
    ));
    if status.reconnect_attempts > 0 {
        lines.push(format!("reconnect attempts: {}", status.reconnect_attempts));
    }
    lines.join("\n")
}

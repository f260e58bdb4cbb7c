#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Interactive client for a Duet realtime session.
//!
//! Lines typed on stdin are sent as chat messages to the current room.
//! Lines starting with `/` are commands; `/help` lists them.

use clap::Parser;
use duet_session::{Identity, SessionClient, SessionConfig};
use duet_session_models::{ChatMessage, Envelope};
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};

const HELP: &str = "\
/room <id>      join a chat room (replaces the current one)
/leave          leave the current room
/match          request a match
/share <json>   share a music item into the current room
/ping           send an application ping
/status         print the session state and subscriptions
/quit           disconnect and exit
anything else   send a chat message to the current room";

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// User id to connect as.
    #[arg(short, long)]
    user_id: u64,

    /// Endpoint override. Defaults to `DUET_WS_URL`.
    #[arg(long)]
    url: Option<String>,

    /// Display name attached to chat messages.
    #[arg(short, long)]
    name: Option<String>,

    /// Room to join on startup.
    #[arg(short, long)]
    room: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
enum Input {
    Say(String),
    Room(String),
    Leave,
    Match,
    Share(Value),
    Ping,
    Status,
    Help,
    Quit,
}

#[derive(Debug, Error)]
enum InputError {
    #[error("Unknown command '/{0}'. Try /help")]
    Unknown(String),
    #[error("Usage: /{0}")]
    Usage(&'static str),
    #[error("Invalid music JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Parses one stdin line. Blank lines yield `None`.
fn parse_input(line: &str) -> Result<Option<Input>, InputError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let Some(command) = line.strip_prefix('/') else {
        return Ok(Some(Input::Say(line.to_string())));
    };

    let (name, rest) = command
        .split_once(char::is_whitespace)
        .map_or((command, ""), |(name, rest)| (name, rest.trim()));

    Ok(Some(match name {
        "room" if rest.is_empty() => return Err(InputError::Usage("room <id>")),
        "room" => Input::Room(rest.to_string()),
        "leave" => Input::Leave,
        "match" => Input::Match,
        "share" if rest.is_empty() => return Err(InputError::Usage("share <json>")),
        "share" => Input::Share(serde_json::from_str(rest)?),
        "ping" => Input::Ping,
        "status" => Input::Status,
        "help" => Input::Help,
        "quit" | "exit" => Input::Quit,
        other => return Err(InputError::Unknown(other.to_string())),
    }))
}

fn print_chat(message: &ChatMessage) {
    let sender = message
        .sender_name
        .as_deref()
        .or(message.sender_id.as_deref())
        .unwrap_or("?");

    println!("[{}] {sender}: {}", message.room_id, message.content);
}

fn print_envelope(envelope: &Envelope) {
    println!("<{:?}> {}", envelope.event_type, envelope.data);
}

struct Shell {
    client: SessionClient,
    user_id: u64,
    name: Option<String>,
    room: Option<String>,
}

impl Shell {
    /// Returns `false` once the user asked to quit.
    async fn handle(&mut self, input: Input) -> bool {
        match input {
            Input::Say(content) => {
                let Some(room) = self.room.clone() else {
                    eprintln!("Join a room first with /room <id>");
                    return true;
                };
                if let Err(e) = self
                    .client
                    .send_chat_message(room, content, None, self.name.clone())
                    .await
                {
                    eprintln!("Failed to send: {e}");
                }
            }
            Input::Room(room) => {
                self.client.subscribe_to_chat_room(room.as_str());
                self.room = Some(room);
            }
            Input::Leave => {
                self.client.leave_chat_room();
                self.room = None;
            }
            Input::Match => self.client.request_matching(self.user_id),
            Input::Share(music) => match &self.room {
                Some(room) => self.client.share_music(room.as_str(), music),
                None => eprintln!("Join a room first with /room <id>"),
            },
            Input::Ping => self.client.ping(),
            Input::Status => match self.client.snapshot().await {
                Ok(snapshot) => {
                    println!("state: {}", snapshot.state);
                    if let Some(delay) = snapshot.pending_reconnect {
                        println!(
                            "reconnecting in {delay:?} (attempt {})",
                            snapshot.reconnect_attempt
                        );
                    }
                    for entry in snapshot.entries {
                        println!("  {} -> {}", entry.topic_key, entry.topic_address);
                    }
                }
                Err(e) => eprintln!("Failed to read status: {e}"),
            },
            Input::Help => println!("{HELP}"),
            Input::Quit => return false,
        }

        true
    }
}

#[allow(clippy::redundant_pub_crate)]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let _layer = duet_logging::init(Some("duet_session_cli.log"))?;

    let mut config = SessionConfig::from_env()?;
    if let Some(url) = args.url {
        config = config.with_url(url);
    }

    let client = SessionClient::new(Identity::from(args.user_id), config)?;

    client.on_connect(|| println!("* connected"));
    client.on_disconnect(|| println!("* disconnected"));
    client.on_error(|error| eprintln!("* {error}"));
    client.on_message(print_envelope);
    client.on_chat_message(print_chat);

    client.connect();
    if let Some(room) = &args.room {
        client.subscribe_to_chat_room(room.as_str());
    }

    let mut shell = Shell {
        client: client.clone(),
        user_id: args.user_id,
        name: args.name,
        room: args.room,
    };
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match parse_input(&line) {
                    Ok(Some(input)) => {
                        if !shell.handle(input).await {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => eprintln!("{e}"),
                }
            }
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    log::error!("Failed to listen for ctrl-c: {e}");
                }
                break;
            }
        }
    }

    log::debug!("Shutting down");
    client.shutdown().await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test_log::test]
    fn plain_lines_are_chat_messages() {
        assert_eq!(
            parse_input("  hello there ").unwrap(),
            Some(Input::Say("hello there".to_string()))
        );
    }

    #[test_log::test]
    fn blank_lines_are_ignored() {
        assert_eq!(parse_input("   ").unwrap(), None);
    }

    #[test_log::test]
    fn room_takes_the_rest_of_the_line() {
        assert_eq!(
            parse_input("/room room-42").unwrap(),
            Some(Input::Room("room-42".to_string()))
        );
        assert!(matches!(
            parse_input("/room"),
            Err(InputError::Usage("room <id>"))
        ));
    }

    #[test_log::test]
    fn share_parses_json() {
        assert_eq!(
            parse_input(r#"/share {"title": "Song"}"#).unwrap(),
            Some(Input::Share(json!({ "title": "Song" })))
        );
        assert!(matches!(
            parse_input("/share {oops"),
            Err(InputError::Json(_))
        ));
    }

    #[test_log::test]
    fn unknown_commands_are_rejected() {
        assert!(matches!(
            parse_input("/dance"),
            Err(InputError::Unknown(name)) if name == "dance"
        ));
    }

    #[test_log::test]
    fn bare_commands_parse() {
        assert_eq!(parse_input("/leave").unwrap(), Some(Input::Leave));
        assert_eq!(parse_input("/match").unwrap(), Some(Input::Match));
        assert_eq!(parse_input("/ping").unwrap(), Some(Input::Ping));
        assert_eq!(parse_input("/status").unwrap(), Some(Input::Status));
        assert_eq!(parse_input("/quit").unwrap(), Some(Input::Quit));
    }
}

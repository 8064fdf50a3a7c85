//! Chat command: a line-based client for a relay hub.

use chrono::Local;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};

use netgame_core::PeerId;
use netgame_protocol::ForwardedMessage;

use crate::client::{Client, ClientHandler, ConnectOptions};
use crate::error::{ClientError, ClientResult};

/// What a chat client sends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatLine {
    /// Sender's display name, if it set one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// The text.
    pub text: String,
}

/// One line of user input.
#[derive(Debug, PartialEq, Eq)]
pub enum Input<'a> {
    Say(&'a str),
    Who,
    Quit,
    Empty,
}

/// Classifies a line typed by the user.
pub fn parse_input(line: &str) -> Input<'_> {
    match line.trim() {
        "" => Input::Empty,
        "/quit" => Input::Quit,
        "/who" => Input::Who,
        text => Input::Say(text),
    }
}

/// Renders a relayed chat line, without timestamp.
pub fn format_line(forwarded: &ForwardedMessage<ChatLine>) -> String {
    match &forwarded.message.name {
        Some(name) => format!("<{}#{}> {}", name, forwarded.from, forwarded.message.text),
        None => format!("<#{}> {}", forwarded.from, forwarded.message.text),
    }
}

fn format_roster(peers: &[PeerId]) -> String {
    let ids: Vec<String> = peers.iter().map(|id| format!("#{}", id)).collect();
    format!("connected: {}", ids.join(", "))
}

fn print_event(text: &str) {
    println!("[{}] {}", Local::now().format("%H:%M:%S"), text);
}

struct ChatPrinter;

impl ClientHandler<ForwardedMessage<ChatLine>> for ChatPrinter {
    fn on_message(&self, _client: &Client, message: ForwardedMessage<ChatLine>) {
        print_event(&format_line(&message));
    }

    fn on_peer_joined(&self, client: &Client, id: PeerId) {
        if id != client.id() {
            print_event(&format!("* #{} joined", id));
        }
    }

    fn on_peer_left(&self, _client: &Client, id: PeerId) {
        print_event(&format!("* #{} left", id));
    }

    fn on_closed_by_error(&self, _client: &Client, reason: &str) {
        print_event(&format!("* connection lost: {}", reason));
    }

    fn on_server_shutdown(&self, _client: &Client, _reason: &str) {
        print_event("* hub shut down");
    }
}

/// Connects and relays stdin lines until `/quit`, end of input, or the hub
/// closes the connection.
pub async fn run(options: ConnectOptions, name: Option<String>) -> ClientResult<()> {
    let client = Client::connect_with::<ForwardedMessage<ChatLine>, _>(options, ChatPrinter).await?;
    println!(
        "connected to {} as #{} (/who lists peers, /quit leaves)",
        client.hub_addr(),
        client.id()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = client.closed() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            client.disconnect();
            break;
        };

        match parse_input(&line) {
            Input::Empty => {}
            Input::Who => println!("{}", format_roster(&client.peers())),
            Input::Quit => {
                client.disconnect();
                break;
            }
            Input::Say(text) => {
                let message = ChatLine {
                    name: name.clone(),
                    text: text.to_string(),
                };
                match client.send(&message) {
                    Ok(()) => {}
                    Err(ClientError::ConnectionClosed) => break,
                    Err(e) => return Err(e),
                }
            }
        }
    }

    client.closed().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u64) -> PeerId {
        PeerId::new(n).unwrap()
    }

    #[test]
    fn input_commands() {
        assert_eq!(parse_input("  /quit "), Input::Quit);
        assert_eq!(parse_input("/who"), Input::Who);
        assert_eq!(parse_input("   "), Input::Empty);
        assert_eq!(parse_input(" hello there "), Input::Say("hello there"));
        assert_eq!(parse_input("/quitting"), Input::Say("/quitting"));
    }

    #[test]
    fn line_formatting() {
        let named = ForwardedMessage::new(
            id(3),
            ChatLine {
                name: Some("ada".into()),
                text: "ping".into(),
            },
        );
        assert_eq!(format_line(&named), "<ada#3> ping");

        let anonymous = ForwardedMessage::new(
            id(7),
            ChatLine {
                name: None,
                text: "pong".into(),
            },
        );
        assert_eq!(format_line(&anonymous), "<#7> pong");
        assert_eq!(format_roster(&[id(1), id(3)]), "connected: #1, #3");
    }

    #[test]
    fn chat_line_omits_missing_name() {
        let line = ChatLine {
            name: None,
            text: "hi".into(),
        };
        assert_eq!(serde_json::to_string(&line).unwrap(), r#"{"text":"hi"}"#);
    }
}

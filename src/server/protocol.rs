//! Line protocol spoken by the TCP front end.
//!
//! Requests, one per line:
//!
//! ```text
//! PUBLISH <key> <data...>
//! SUBSCRIBE <key>
//! UNSUBSCRIBE <key>
//! PING
//! QUIT
//! ```
//!
//! Replies are `+OK`, `+PONG` or `-ERR <message>`. Events for subscribed keys
//! are pushed as `>message <key> <data>`. Every line ends with `\r\n`.

use std::sync::Arc;

use subpub_error::ProtocolError;

/// The value the front end publishes on the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub subject: Arc<str>,
    pub data: Arc<str>,
}

impl Event {
    pub fn new(
        subject: impl Into<Arc<str>>,
        data: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            subject: subject.into(),
            data: data.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Publish { key: String, data: String },
    Subscribe { key: String },
    Unsubscribe { key: String },
    Ping,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ok,
    Pong,
    Error(String),
    Message(Event),
}

/// Splits off the first whitespace-delimited word. The remainder keeps its
/// inner whitespace.
fn split_word(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest),
        None => (s, ""),
    }
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim_end_matches(['\r', '\n']);
        let (name, rest) = split_word(line);
        if name.is_empty() {
            return Err(ProtocolError::EmptyCommand);
        }

        match name.to_ascii_uppercase().as_str() {
            "PUBLISH" => {
                let (key, data) = split_word(rest);
                if key.is_empty() {
                    return Err(ProtocolError::EmptyKey);
                }
                Ok(Self::Publish {
                    key: key.to_string(),
                    data: data.to_string(),
                })
            }
            "SUBSCRIBE" => Ok(Self::Subscribe {
                key: single_key(rest, "SUBSCRIBE")?,
            }),
            "UNSUBSCRIBE" => Ok(Self::Unsubscribe {
                key: single_key(rest, "UNSUBSCRIBE")?,
            }),
            "PING" => no_args(rest, "PING").map(|_| Self::Ping),
            "QUIT" => no_args(rest, "QUIT").map(|_| Self::Quit),
            _ => Err(ProtocolError::UnknownCommand(name.to_string())),
        }
    }
}

fn single_key(
    rest: &str,
    command: &'static str,
) -> Result<String, ProtocolError> {
    let (key, extra) = split_word(rest);
    if key.is_empty() {
        return Err(ProtocolError::EmptyKey);
    }
    if !extra.trim().is_empty() {
        return Err(ProtocolError::WrongArity { command });
    }
    Ok(key.to_string())
}

fn no_args(
    rest: &str,
    command: &'static str,
) -> Result<(), ProtocolError> {
    if rest.trim().is_empty() {
        Ok(())
    } else {
        Err(ProtocolError::WrongArity { command })
    }
}

impl Reply {
    pub fn encode(&self) -> String {
        match self {
            Self::Ok => "+OK\r\n".to_string(),
            Self::Pong => "+PONG\r\n".to_string(),
            Self::Error(msg) => format!("-ERR {msg}\r\n"),
            Self::Message(event) => format!(">message {} {}\r\n", event.subject, event.data),
        }
    }
}

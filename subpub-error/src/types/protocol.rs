use thiserror::Error;

use crate::{BrokerError, ErrorExt, StatusCode};

/// Errors raised while handling a front-end command.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("empty command")]
    EmptyCommand,

    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("wrong number of arguments for '{command}'")]
    WrongArity { command: &'static str },

    #[error("key is empty")]
    EmptyKey,

    #[error("not subscribed to '{0}'")]
    NotSubscribed(String),

    /// The server is at its connection limit.
    #[error("too many connections")]
    TooManyConnections,

    #[error("unavailable: {0}")]
    Broker(#[from] BrokerError),
}

impl ErrorExt for ProtocolError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::EmptyCommand | Self::UnknownCommand(_) => StatusCode::InvalidCommand,
            Self::WrongArity { .. } => StatusCode::ParseError,
            Self::EmptyKey | Self::NotSubscribed(_) => StatusCode::InvalidArgs,
            Self::TooManyConnections => StatusCode::TooManyConnections,
            Self::Broker(err) => err.status_code(),
        }
    }
}

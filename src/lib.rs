/// Configuration loading: defaults, file and `SUBPUB_*` environment.
pub mod config;
/// Logging initialisation (filters, output formats).
pub mod logging;
/// In-process publish/subscribe broker.
pub mod pubsub;
/// TCP line-protocol front end over the broker.
pub mod server;
/// OS signal handling.
pub mod shutdown;

// -----------------------------------------------------------------------------
//  Frequently used public types
// -----------------------------------------------------------------------------

/// Settings
pub use config::Settings;
/// Logging setup.
pub use logging::{init_logging, LogFormat, LoggingConfig};
/// Pub/Sub API.
pub use pubsub::{Broker, BrokerConfig, BrokerStats, MessageHandler, Subscription};
/// Network server and protocol.
pub use server::{ConnectionConfig, Event, Server};
/// Errors and status codes.
pub use subpub_error::{BrokerError, BrokerResult, ErrorExt, ProtocolError, StatusCode};

pub mod ext;
pub mod status_code;
pub mod types;

// Re-export the submodules so callers can write `subpub_error::BrokerError`.
pub use ext::*;
pub use status_code::*;
pub use types::*;

pub type BrokerResult<T> = Result<T, BrokerError>;

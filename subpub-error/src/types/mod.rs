pub mod broker;
pub mod protocol;

pub use broker::*;
pub use protocol::*;

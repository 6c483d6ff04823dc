//! In-process publish/subscribe.
//!
//! - `broker`: the subject registry and the `subscribe` / `publish` / `close`
//!   facade.
//! - `handler`: the callback trait invoked for every delivered message.
//! - `subscription`: the handle returned by `subscribe`, with its fire-once
//!   terminate signal.
//! - `worker` (private): the per-subscription delivery task.
//! - `stats`: delivery counters.
//!
//! ```text
//!    publish(subject, msg)
//!        │            (clone per subscriber, try_send, never waits)
//!        ├──────────► [queue S1] ─► worker S1 ─► handler.handle()
//!        ├──────────► [queue S2] ─► worker S2 ─► handler.handle()
//!        └──────────► [queue SN] ─► worker SN ─► handler.handle()
//! ```

pub mod broker;
pub mod handler;
pub mod stats;
pub mod subscription;
mod worker;

pub use broker::*;
pub use handler::*;
pub use stats::*;
pub use subscription::*;

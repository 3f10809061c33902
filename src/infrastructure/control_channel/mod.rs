//! Control channel
//!
//! - Correlation map for asynchronous round trips
//! - Reconnect delay and error-log throttling
//! - The TCP/NDJSON channel itself

pub mod channel;
pub mod pending;
pub mod reconnect;

pub use channel::{ChannelSettings, ControlChannel};
pub use pending::PendingRequests;
pub use reconnect::{ReconnectPolicy, ReconnectState};

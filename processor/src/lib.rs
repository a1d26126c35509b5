#![forbid(unsafe_code)]

//! Routes decoded wire messages to the owning channel's state machine and
//! turns the replies back into frames. Decode and validation failures are
//! handled here and never reach a state machine; protocol and crypto
//! failures freeze the one affected channel and are surfaced to the
//! channel owner as alerts.

mod connection;
mod dispatch;
mod registry;

pub use self::connection::{drive, spawn, ConnectionHandle, DEFAULT_QUEUE_CAPACITY};
pub use self::dispatch::{dispatch, ChannelAlert, Dispatched, DispatchError};
pub use self::registry::{Registry, RegistryError};

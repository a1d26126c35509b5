#![forbid(unsafe_code)]

//! The commitment update and revocation state machine. One
//! [`ChannelMachine`] instance owns everything mutable about one channel:
//! the HTLC ledger, the local revocation producer, the store of the
//! counterparty's disclosed secrets and the update phase. All transitions
//! go through [`ChannelMachine::handle`] or the local-operation methods;
//! a cryptographic or protocol failure freezes the instance permanently.

mod error;
mod machine;

pub use self::error::ChannelError;
pub use self::machine::{ChannelKeys, ChannelMachine, Phase};

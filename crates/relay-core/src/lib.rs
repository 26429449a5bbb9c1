//! # relay-core
//!
//! Foundation types, errors, and logging for the interview signaling relay.
//!
//! - **IDs**: [`SessionId`] newtype for externally-owned interview session ids
//! - **Roles**: [`Role`], the closed set of participants in a session
//! - **Signals**: sender annotation for relayed payloads and synthesized
//!   presence events
//! - **Errors**: [`RelayError`] via `thiserror`, with close code/reason mapping
//! - **Logging**: `tracing` subscriber setup and test capture helpers

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod logging;
pub mod role;
pub mod signal;

pub use errors::{RelayError, Result};
pub use ids::SessionId;
pub use role::Role;
pub use signal::{PresenceEvent, PresenceKind, RelayPayload};

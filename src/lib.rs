//! Nostr relay client library.
//!
//! Connects to relays over WebSocket, multiplexes subscriptions, pages
//! stored-event queries past per-relay limits, publishes with OK-response
//! correlation, replicates a user's social graph between relays, and stores
//! files on relays as chunked events (NIP-95).

pub mod client;
pub mod collector;
pub mod config;
pub mod error;
pub mod event;
pub mod filter;
pub mod message;
pub mod nip95;
pub mod relay_info;
pub mod sync;

pub use client::{Client, Listener, PublishAck, PublishOutcome, QueryItem, QueryStream};
pub use collector::{CollectSummary, Collector, MultiClient};
pub use config::{Config, Profile};
pub use error::{Error, Result};
pub use event::{Event, EventTemplate, KeySigner, Signer, Tag};
pub use filter::Filter;
pub use message::{ClientMessage, RelayMessage};
pub use relay_info::{fetch_relay_info, RelayInfo};

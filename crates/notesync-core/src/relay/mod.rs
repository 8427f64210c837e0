//! Relay transport
//!
//! Relays are untrusted store-and-forward servers. Every envelope read back
//! from one is verified by the codec before use.

mod client;
mod memory;
mod message;
mod pool;
mod ws;

pub use client::{PublishAck, RelayClient, SUBSCRIPTION_BUFFER};
pub use memory::MemoryRelay;
pub use message::{ClientMessage, RelayMessage};
pub use pool::{ws_clients, EndpointOutcome, PublishReport, RelayPool, SubscriptionHandle};
pub use ws::WsRelayClient;

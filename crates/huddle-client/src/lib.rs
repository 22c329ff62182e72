//! Network adapters connecting `huddle-sync` to a huddle server: anonymous
//! auth and document writes over REST, the live feed over WebSocket, blob
//! uploads, and a health probe standing in for the device's connectivity
//! signal.

pub mod client;
pub mod config;
pub mod error;
pub mod feed;
pub mod probe;

pub use client::HuddleClient;
pub use config::ClientConfig;
pub use error::ClientError;
pub use probe::{Reachability, spawn_health_probe};

//! Phone-to-desktop chat bridge.
//!
//! Watches an AI chat surface on the desktop through a polling extraction
//! source, detects when streamed responses settle, and relays the finished
//! messages to phone browsers over websockets. The reverse path injects
//! phone-authored messages back into the desktop chat input.

pub mod bridge;
pub mod bus;
pub mod client;
pub mod engine;
pub mod error;
pub mod extract;
pub mod history;
pub mod inject;
pub mod server;
pub mod settings;

pub use bridge::ChatBridge;
pub use error::{BridgeError, Result};

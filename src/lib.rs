//! wamd: client library for the WhatsApp multi-device web protocol.
//!
//! The crate implements the session runtime: a framed WebSocket
//! transport upgraded by a Noise handshake into an encrypted channel
//! carrying binary XML nodes, a request/response correlator with typed
//! errors, an ordered handler queue for unsolicited nodes, a panic-safe
//! event bus, and the reconnect state machine tying it together.
//!
//! ```no_run
//! use wamd::{Client, Store};
//! use wamd::types::events::Event;
//!
//! # async fn run() -> Result<(), wamd::ClientError> {
//! let client = Client::new(Store::new_in_memory());
//! client.add_event_handler(|event| {
//!     if let Event::QR(qr) = event {
//!         println!("scan to pair: {}", qr.codes[0]);
//!     }
//! });
//! client.connect().await?;
//! # Ok(())
//! # }
//! ```

pub mod binary;
pub mod crypto;
pub mod proto;
pub mod socket;
pub mod store;
pub mod types;

mod client;
mod config;
mod connection;
mod error;
mod handlers;
mod pair;
mod prekeys;
mod request;
mod user;

pub use client::{Client, EventHandler};
pub use config::ClientConfig;
pub use store::Store;
pub use error::{ClientError, IqError};
pub use pair::render_qr_unicode;
pub use prekeys::{MIN_PRE_KEY_COUNT, WANTED_PRE_KEY_COUNT};
pub use request::{InfoQuery, InfoQueryType};
pub use user::{IsOnWhatsAppResponse, ProfilePictureInfo};

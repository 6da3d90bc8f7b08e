//! Client side of the Nostr protocol: signed events, subscription filters,
//! NIP-19 shareable identifiers and relay sessions over WebSocket.
//!
//! ```no_run
//! # async fn demo() -> nostra::Result<()> {
//! use futures_util::StreamExt;
//! use nostra::{create_note, Filter, Inbound, RelaySession, SecretKey};
//!
//! let key = SecretKey::generate();
//! let session = RelaySession::connect("wss://relay.example.com").await?;
//! let mut inbound = session.listen();
//! session.publish(&create_note("hello").finalize(&key)?)?;
//! session.subscribe("all", vec![Filter::new().kinds([1])])?;
//! while let Some(item) = inbound.next().await {
//!     if let Inbound::Disconnected(_) = item {
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod canonical;
pub mod error;
pub mod event;
pub mod filter;
pub mod keys;
pub mod message;
pub mod relay;
pub mod shareable;
pub mod transport;

pub use error::{Error, Result};
pub use event::{create_note, unix_now, Event, EventId, Tag, UnsignedEvent, KIND_TEXT_NOTE};
pub use filter::Filter;
pub use keys::{PublicKey, SecretKey, Signature};
pub use message::{ClientMessage, RelayMessage};
pub use relay::{
    DisconnectReason, Inbound, Listener, RelaySession, SessionOptions, SessionState, Subscription,
};
pub use shareable::Shareable;

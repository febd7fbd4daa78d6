//! Chatwire client: the session synchronization engine.
//!
//! - **coordinator**: `SessionCoordinator`, restore / start / send / reset
//! - **connection**: `ConnectionManager` state machine and resume handshake
//! - **stream**: `MessageStream`, the shared dedup log
//! - **history**: `HistoryLoader` trait + reqwest implementation
//! - **transport** / **websocket** / **socketio**: the live channel

pub mod backoff;
pub mod connection;
pub mod coordinator;
pub mod history;
pub mod socketio;
pub mod stream;
pub mod transport;
pub mod websocket;

pub use connection::ConnectionManager;
pub use coordinator::SessionCoordinator;
pub use history::{HistoryLoader, HttpHistoryLoader};
pub use stream::MessageStream;
pub use transport::{LiveTransport, TransportEvent};
pub use websocket::SocketIoTransport;

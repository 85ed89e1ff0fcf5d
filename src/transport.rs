//! Transport abstraction for the push channel.
//!
//! The [`Transport`] trait is a bidirectional text message channel between
//! the client and the broker. STOMP frames travel as text, so each call to
//! [`send`](Transport::send) carries one or more encoded frames and each
//! [`recv`](Transport::recv) yields one complete text message.
//!
//! # Connection Setup
//!
//! A [`Connector`] opens a fresh transport on demand. The realtime layer
//! opens one connection per subscription, so the client keeps a connector
//! rather than a single transport.
//!
//! # Implementing a Custom Transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use reversi_client::error::ReversiError;
//! use reversi_client::transport::{Connector, Transport};
//!
//! struct MyTransport { /* ... */ }
//!
//! #[async_trait]
//! impl Transport for MyTransport {
//!     async fn send(&mut self, message: String) -> Result<(), ReversiError> {
//!         // Write one text message
//!         Ok(())
//!     }
//!
//!     async fn recv(&mut self) -> Option<Result<String, ReversiError>> {
//!         // Return None when the connection is closed cleanly
//!         None
//!     }
//!
//!     async fn close(&mut self) -> Result<(), ReversiError> {
//!         Ok(())
//!     }
//! }
//!
//! struct MyConnector;
//!
//! #[async_trait]
//! impl Connector for MyConnector {
//!     async fn connect(&self) -> Result<Box<dyn Transport>, ReversiError> {
//!         Ok(Box::new(MyTransport {}))
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::ReversiError;

/// A bidirectional text message transport.
///
/// # Cancel Safety
///
/// The [`recv`](Transport::recv) method **MUST** be cancel-safe because it is used
/// inside `tokio::select!`. If `recv` is cancelled before completion, calling it
/// again must not lose data. Channel-based implementations (e.g., wrapping
/// `mpsc::Receiver`) are naturally cancel-safe.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send a text message to the broker.
    ///
    /// # Errors
    ///
    /// Returns [`ReversiError::TransportSend`] if the message could not be sent,
    /// or [`ReversiError::TransportClosed`] after [`close`](Transport::close).
    async fn send(&mut self, message: String) -> Result<(), ReversiError>;

    /// Receive the next text message.
    ///
    /// Returns:
    /// - `Some(Ok(text))` when a complete message was received
    /// - `Some(Err(e))` on a transport error
    /// - `None` when the connection was closed cleanly
    async fn recv(&mut self) -> Option<Result<String, ReversiError>>;

    /// Close the connection gracefully.
    ///
    /// # Errors
    ///
    /// Returns an error if the close handshake fails. Implementations still
    /// release their resources in that case.
    async fn close(&mut self) -> Result<(), ReversiError>;
}

#[async_trait]
impl Transport for Box<dyn Transport> {
    async fn send(&mut self, message: String) -> Result<(), ReversiError> {
        (**self).send(message).await
    }

    async fn recv(&mut self) -> Option<Result<String, ReversiError>> {
        (**self).recv().await
    }

    async fn close(&mut self) -> Result<(), ReversiError> {
        (**self).close().await
    }
}

/// Opens new [`Transport`] connections to the push broker.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a connection.
    ///
    /// # Errors
    ///
    /// Returns [`ReversiError::Channel`] (or a transport error) when the
    /// broker cannot be reached.
    async fn connect(&self) -> Result<Box<dyn Transport>, ReversiError>;
}

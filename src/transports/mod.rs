//! Concrete transports behind feature gates.
//!
//! | Feature                | Provides                                        |
//! |------------------------|-------------------------------------------------|
//! | `transport-websocket`  | [`WebSocketTransport`], [`WebSocketConnector`]  |
//! | `transport-http`       | [`ReqwestBackend`]                              |

#[cfg(feature = "transport-websocket")]
pub mod websocket;

#[cfg(feature = "transport-websocket")]
pub use websocket::{WebSocketConnector, WebSocketTransport};

#[cfg(feature = "transport-http")]
pub mod http;

#[cfg(feature = "transport-http")]
pub use http::ReqwestBackend;

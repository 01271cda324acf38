//! # Palaver Transport
//!
//! Concrete network transports for the palaver runtime:
//!
//! - [`ws`] — the WebSocket duplex channel ([`ws::connect`], [`ws::WsDuplex`]).
//! - [`http`] — the generic web-API request transport ([`http::HttpTransport`]).
//!
//! Both implement the traits from `palaver_core::transport`, so the runtime
//! never depends on this crate's internals.

pub mod http;
pub mod ws;

pub use http::HttpTransport;
pub use ws::{WsDuplex, connect};

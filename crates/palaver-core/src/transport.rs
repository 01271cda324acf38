//! Transport traits the runtime depends on.
//!
//! The duplex channel and the HTTP request transport are collaborators: the
//! core only needs to hand frames to one and method calls to the other.
//! Concrete implementations live in `palaver-transport`; tests substitute
//! in-memory fakes.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::{ApiResult, TransportResult};

/// The outbound half of the persistent bidirectional connection.
///
/// Inbound frames are delivered through the `mpsc::Receiver<Value>` handed
/// out when the connection is established; this trait only covers writing.
#[async_trait]
pub trait Duplex: Send + Sync {
    /// Sends one JSON frame over the connection.
    async fn send(&self, frame: Value) -> TransportResult<()>;
}

/// The generic HTTP request transport.
///
/// A call takes a method name, a parameter bag and the caller's credential.
/// A success-class status returns the response body; anything else surfaces
/// the body as the error payload, unmodified.
#[async_trait]
pub trait RequestTransport: Send + Sync {
    /// Invokes `method` with `params` and the given credential.
    async fn call(
        &self,
        method: &str,
        params: &Map<String, Value>,
        token: &str,
    ) -> ApiResult<Value>;
}

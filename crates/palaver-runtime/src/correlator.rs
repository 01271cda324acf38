//! Request/reply correlation over the duplex channel.
//!
//! Every outbound real-time call is tagged with a fresh numeric id; the
//! matching reply arrives asynchronously on the shared inbound stream with a
//! `reply_to` field. The correlator keeps one pending slot per id and routes
//! the first matching reply to the waiting future, exactly once.
//!
//! There is deliberately no timeout: a call whose reply never arrives leaves
//! its slot in the map for the life of the connection. This mirrors the
//! accepted resource-leak tradeoff of the protocol client this runtime
//! models; recovery is the caller's responsibility.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use palaver_core::{ApiError, ApiResult, Duplex};

/// Tracks outstanding real-time calls and routes their replies.
pub struct Correlator {
    /// Monotonically increasing correlation id counter. Ids are never reused
    /// while a request for that id is outstanding.
    next_id: AtomicU64,
    /// Pending call map: id → sender half of the reply slot.
    pending: Mutex<HashMap<u64, oneshot::Sender<Value>>>,
}

impl Correlator {
    /// Creates an empty correlator.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Reserves the next correlation id without registering a reply slot.
    ///
    /// Used for frames whose reply is intentionally unawaited (keepalive
    /// pings), so they never occupy the pending map.
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Registers a reply slot for `id` and returns the receiving half.
    ///
    /// A second registration for the same id replaces the first; the
    /// displaced waiter resolves as disconnected.
    pub fn register(&self, id: u64) -> oneshot::Receiver<Value> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);
        rx
    }

    /// Assigns a fresh id, merges it and `type` into `params`, transmits the
    /// frame, and returns the pending reply.
    ///
    /// The reply slot is registered before the frame is sent so an early
    /// reply can never be missed.
    pub async fn send(
        &self,
        duplex: &dyn Duplex,
        ty: &str,
        params: Value,
    ) -> ApiResult<PendingReply> {
        let id = self.next_id();
        let rx = self.register(id);

        let mut frame = match params {
            Value::Object(map) => map,
            Value::Null => serde_json::Map::new(),
            other => {
                self.pending.lock().remove(&id);
                return Err(ApiError::Serialization(format!(
                    "call parameters must be an object, got {other}"
                )));
            }
        };
        frame.insert("id".into(), Value::from(id));
        frame.insert("type".into(), Value::from(ty));

        debug!(ty = %ty, id = %id, "Sending real-time call");

        if let Err(e) = duplex.send(Value::Object(frame)).await {
            // Remove the slot so it doesn't dangle for a frame never sent.
            self.pending.lock().remove(&id);
            return Err(e.into());
        }

        Ok(PendingReply { id, rx })
    }

    /// Routes an inbound frame carrying `reply_to` to its waiting caller.
    ///
    /// Returns `true` if the frame was consumed as a reply. The slot is
    /// removed on first match, so a duplicate reply is not consumed.
    pub fn resolve(&self, frame: &Value) -> bool {
        let Some(id) = frame.get("reply_to").and_then(Value::as_u64) else {
            return false;
        };
        let waiter = self.pending.lock().remove(&id);
        match waiter {
            Some(tx) => {
                let _ = tx.send(frame.clone());
                true
            }
            None => {
                trace!(id = %id, "Reply for unknown correlation id");
                false
            }
        }
    }

    /// Returns the number of outstanding calls.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Drops every pending slot, unblocking all waiters with a
    /// disconnected error. Called when the duplex channel goes away.
    pub fn clear(&self) {
        let mut pending = self.pending.lock();
        let count = pending.len();
        if count > 0 {
            debug!(count = count, "Clearing pending calls on disconnect");
            pending.clear();
        }
    }
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

/// A call in flight: the assigned id plus the future reply.
pub struct PendingReply {
    /// The correlation id assigned to the call.
    pub id: u64,
    rx: oneshot::Receiver<Value>,
}

impl PendingReply {
    /// Waits for the matching reply and applies the completion rule.
    pub async fn wait(self) -> ApiResult<Value> {
        let reply = self.rx.await.map_err(|_| ApiError::NotConnected)?;
        complete(reply)
    }
}

/// The completion rule for replies: a missing `ok` flag counts as success
/// (some event types omit it), a falsy one as failure carrying the full
/// payload, anything else as success.
pub fn complete(reply: Value) -> ApiResult<Value> {
    let accepted = match reply.get("ok") {
        None => true,
        Some(ok) => is_truthy(ok),
    };
    if accepted {
        Ok(reply)
    } else {
        Err(ApiError::Rejected(reply))
    }
}

/// Falsy values are `false`, `null`, zero and the empty string.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

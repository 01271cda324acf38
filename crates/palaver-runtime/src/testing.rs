//! In-memory transport doubles shared by the unit tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value, json};

use palaver_core::{ApiError, ApiResult, Duplex, RequestTransport, TransportError, TransportResult};

/// A duplex channel that records every outbound frame.
pub struct MockDuplex {
    sent: Mutex<Vec<Value>>,
    fail: bool,
}

impl MockDuplex {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    /// A duplex whose every send fails.
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    /// Frames sent so far, in order.
    pub fn sent(&self) -> Vec<Value> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Duplex for MockDuplex {
    async fn send(&self, frame: Value) -> TransportResult<()> {
        if self.fail {
            return Err(TransportError::SendFailed("mock send failure".into()));
        }
        self.sent.lock().push(frame);
        Ok(())
    }
}

/// A web-API transport that records calls and replays a canned response.
pub struct MockHttp {
    calls: Mutex<Vec<(String, Map<String, Value>)>>,
    response: Mutex<Value>,
}

impl MockHttp {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            response: Mutex::new(json!({ "ok": true })),
        }
    }

    pub fn respond_with(&self, response: Value) {
        *self.response.lock() = response;
    }

    /// Calls issued so far, as (method, params) pairs.
    pub fn calls(&self) -> Vec<(String, Map<String, Value>)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl RequestTransport for MockHttp {
    async fn call(
        &self,
        method: &str,
        params: &Map<String, Value>,
        _token: &str,
    ) -> ApiResult<Value> {
        self.calls.lock().push((method.to_string(), params.clone()));
        let response = self.response.lock().clone();
        if response.get("ok") == Some(&Value::Bool(false)) {
            return Err(ApiError::Rejected(response));
        }
        Ok(response)
    }
}

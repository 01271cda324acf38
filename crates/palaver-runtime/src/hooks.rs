//! The before-operation hook pipeline.
//!
//! Every public bot operation triggers the hook point named after itself
//! immediately before performing its real work. Callbacks run sequentially
//! in registration order, each receiving the context left by its
//! predecessor; the first failure aborts the pipeline, and with it the
//! wrapped operation, before any side effect.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::trace;

use palaver_core::{ApiError, ApiResult};

/// A type-erased asynchronous hook callback.
///
/// Receives the operation context and returns it, possibly mutated, or an
/// error to veto the operation.
pub type HookFn = Arc<dyn Fn(Value) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

/// Named hook points, each holding an ordered callback chain.
///
/// Global to the bot instance; installed once at startup, invoked per
/// matching operation thereafter. There is no unregister operation.
#[derive(Default)]
pub struct HookRegistry {
    hooks: Mutex<HashMap<String, Vec<HookFn>>>,
}

impl HookRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a callback to the chain for `name`.
    pub fn register<F, Fut>(&self, name: impl Into<String>, callback: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let callback: HookFn = Arc::new(move |ctx| Box::pin(callback(ctx)));
        self.hooks.lock().entry(name.into()).or_default().push(callback);
    }

    /// Runs the chain for `name` over `ctx`, sequentially.
    ///
    /// A later callback sees the state left by earlier ones. The first
    /// failure aborts with [`ApiError::HookAborted`]; the caller must not
    /// perform the wrapped operation in that case.
    pub async fn trigger(&self, name: &str, mut ctx: Value) -> ApiResult<Value> {
        let chain: Vec<HookFn> = self
            .hooks
            .lock()
            .get(name)
            .map(|callbacks| callbacks.to_vec())
            .unwrap_or_default();

        if chain.is_empty() {
            return Ok(ctx);
        }

        trace!(hook = %name, callbacks = chain.len(), "Running hook chain");

        for callback in chain {
            ctx = callback(ctx).await.map_err(|e| ApiError::HookAborted {
                hook: name.to_string(),
                reason: e.to_string(),
            })?;
        }
        Ok(ctx)
    }

    /// Returns the number of callbacks registered under `name`.
    pub fn count(&self, name: &str) -> usize {
        self.hooks.lock().get(name).map_or(0, Vec::len)
    }
}

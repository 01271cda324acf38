//! Message handles and lifecycle correlation.
//!
//! Every successfully sent message yields a [`MessageHandle`] carrying the
//! server-assigned identity (channel, ts). The handle both drives follow-up
//! operations (update, delete, react) and observes lifecycle events for
//! exactly that message, filtered by identity so two messages in the same
//! channel never observe each other's events.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::trace;

use palaver_core::{ApiResult, MessageIdent};

use crate::bot::Bot;

/// The lifecycle events a message can go through after sending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleKind {
    /// The message text was edited.
    Update,
    /// The message was deleted.
    Delete,
    /// A reaction was added to the message.
    ReactionAdded,
    /// A reaction was removed from the message.
    ReactionRemoved,
}

impl LifecycleKind {
    /// Maps a wire event or subtype name to a lifecycle kind.
    pub fn from_wire(name: &str) -> Option<Self> {
        match name {
            "message_changed" => Some(Self::Update),
            "message_deleted" => Some(Self::Delete),
            "reaction_added" => Some(Self::ReactionAdded),
            "reaction_removed" => Some(Self::ReactionRemoved),
            _ => None,
        }
    }
}

/// A type-erased lifecycle callback receiving the raw event payload.
pub type LifecycleFn = Arc<dyn Fn(Value) -> BoxFuture<'static, ()> + Send + Sync>;

/// Token returned by [`MessageHandle::on`], used to detach the callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    ident: MessageIdent,
    kind: LifecycleKind,
    callback: LifecycleFn,
}

/// All live lifecycle subscriptions of a bot, across every handle.
#[derive(Default)]
pub struct SubscriptionSet {
    next: AtomicU64,
    subs: Mutex<Vec<Subscription>>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a callback for one (identity, kind) pair.
    pub fn subscribe(
        &self,
        ident: MessageIdent,
        kind: LifecycleKind,
        callback: LifecycleFn,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next.fetch_add(1, Ordering::SeqCst));
        self.subs.lock().push(Subscription {
            id,
            ident,
            kind,
            callback,
        });
        id
    }

    /// Detaches a callback. Returns whether anything was removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self.subs.lock();
        let before = subs.len();
        subs.retain(|sub| sub.id != id);
        subs.len() < before
    }

    /// Invokes every callback subscribed to exactly this identity and kind.
    pub async fn fire(&self, kind: LifecycleKind, ident: &MessageIdent, payload: &Value) {
        let matching: Vec<LifecycleFn> = self
            .subs
            .lock()
            .iter()
            .filter(|sub| sub.kind == kind && sub.ident == *ident)
            .map(|sub| Arc::clone(&sub.callback))
            .collect();

        if matching.is_empty() {
            return;
        }
        trace!(ident = %ident, kind = ?kind, callbacks = matching.len(), "Firing lifecycle event");
        for callback in matching {
            callback(payload.clone()).await;
        }
    }

    /// Returns the number of live subscriptions.
    pub fn len(&self) -> usize {
        self.subs.lock().len()
    }

    /// Returns whether no subscriptions are live.
    pub fn is_empty(&self) -> bool {
        self.subs.lock().is_empty()
    }
}

/// A sent message: its identity plus the bot that sent it.
///
/// Cheap to clone; clones address the same message.
#[derive(Clone)]
pub struct MessageHandle {
    ident: MessageIdent,
    bot: Bot,
}

impl std::fmt::Debug for MessageHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageHandle")
            .field("ident", &self.ident)
            .finish_non_exhaustive()
    }
}

impl MessageHandle {
    pub(crate) fn new(ident: MessageIdent, bot: Bot) -> Self {
        Self { ident, bot }
    }

    /// The channel the message was posted to.
    pub fn channel(&self) -> &str {
        &self.ident.channel
    }

    /// The server-assigned timestamp identifying the message.
    pub fn ts(&self) -> &str {
        &self.ident.ts
    }

    /// The full (channel, ts) identity.
    pub fn ident(&self) -> &MessageIdent {
        &self.ident
    }

    /// Replaces the message text.
    pub async fn update(&self, text: &str) -> ApiResult<Value> {
        self.bot
            .update_message(&self.ident.channel, &self.ident.ts, text)
            .await
    }

    /// Deletes the message.
    pub async fn delete(&self) -> ApiResult<Value> {
        self.bot
            .delete_message(&self.ident.channel, &self.ident.ts)
            .await
    }

    /// Adds an emoji reaction to the message.
    pub async fn react(&self, emoji: &str) -> ApiResult<Value> {
        self.bot
            .react(&self.ident.channel, &self.ident.ts, emoji)
            .await
    }

    /// Observes one lifecycle event kind for this message.
    pub fn on<F, Fut>(&self, kind: LifecycleKind, callback: F) -> SubscriptionId
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let callback: LifecycleFn = Arc::new(move |payload| Box::pin(callback(payload)));
        self.bot
            .subscriptions()
            .subscribe(self.ident.clone(), kind, callback)
    }

    /// Detaches a previously attached callback.
    pub fn off(&self, id: SubscriptionId) -> bool {
        self.bot.subscriptions().unsubscribe(id)
    }
}

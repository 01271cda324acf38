//! The listener dispatch engine.
//!
//! Registered (pattern, policy, handler) tuples are checked against every
//! inbound chat message, in registration order. The engine decides
//! addressing once per message, strips the bot's own mention before pattern
//! matching, runs the `hear` hook for each satisfied listener, and invokes
//! the handler fire-and-forget. Registrations live for the life of the bot;
//! there is no unregister operation.

use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use regex::Regex;
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use palaver_core::{InboundMessage, MatchedMessage, SelfInfo, text};

use crate::hooks::HookRegistry;

/// A type-erased asynchronous listener handler.
pub type ListenerFn =
    Arc<dyn Fn(MatchedMessage) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Per-listener policy: the mention requirement plus pass-through extension
/// parameters merged into the `hear` hook context.
#[derive(Debug, Clone, Default)]
pub struct ListenerPolicy {
    /// Only dispatch when the message is addressed to the bot.
    pub requires_mention: bool,
    /// Extension parameters handed to hook callbacks unchanged.
    pub extras: Map<String, Value>,
}

impl ListenerPolicy {
    /// Policy requiring the message to be addressed to the bot.
    pub fn mention() -> Self {
        Self {
            requires_mention: true,
            ..Self::default()
        }
    }
}

#[derive(Clone)]
struct Registration {
    pattern: Regex,
    /// Catch-all listeners match any input and are excluded from the
    /// no-match accounting, so an always-true listener cannot suppress the
    /// signal.
    catch_all: bool,
    policy: ListenerPolicy,
    handler: ListenerFn,
}

/// The ordered listener registry.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: Mutex<Vec<Registration>>,
}

impl ListenerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a pattern listener. Listeners are dispatched in
    /// registration order.
    pub fn register(&self, pattern: Regex, policy: ListenerPolicy, handler: ListenerFn) {
        self.listeners.lock().push(Registration {
            pattern,
            catch_all: false,
            policy,
            handler,
        });
    }

    /// Registers a listener matching any input.
    pub fn register_catch_all(&self, policy: ListenerPolicy, handler: ListenerFn) {
        self.listeners.lock().push(Registration {
            // Matches every non-empty text.
            pattern: Regex::new(".").unwrap_or_else(|_| unreachable!()),
            catch_all: true,
            policy,
            handler,
        });
    }

    /// Returns the number of registered listeners.
    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Returns whether no listeners are registered.
    pub fn is_empty(&self) -> bool {
        self.listeners.lock().is_empty()
    }

    /// Dispatches one inbound message to every satisfied listener.
    ///
    /// Per listener, in registration order: skip if the policy requires
    /// addressing and the message is not addressed; strip the bot's name
    /// from the text; match the pattern against the stripped text; on a
    /// match, run the `hear` hook with the merged message+policy context and
    /// invoke the handler in its own task. Handler faults are logged, never
    /// propagated.
    ///
    /// If the message is addressed and no pattern-bearing listener was
    /// satisfied, the message is emitted on `no_match_tx`.
    pub async fn dispatch(
        &self,
        self_info: &SelfInfo,
        hooks: &HookRegistry,
        message: &InboundMessage,
        no_match_tx: &broadcast::Sender<InboundMessage>,
    ) {
        // Compiled once per message, reused for every listener's strip.
        let rules = text::MentionRules::new(self_info);
        let addressed = rules.is_addressed(&message.channel, message.text.as_deref());
        let listeners: Vec<Registration> = self.listeners.lock().clone();

        let mut any_pattern_listener = false;
        let mut any_pattern_matched = false;

        for registration in listeners {
            if registration.policy.requires_mention && !addressed {
                continue;
            }
            if !registration.catch_all {
                any_pattern_listener = true;
            }

            let Some(raw_text) = message.text.as_deref() else {
                continue;
            };
            let stripped = rules.strip_mention(raw_text);
            if stripped.is_empty() {
                continue;
            }
            let Some(captures) = registration.pattern.captures(&stripped) else {
                continue;
            };
            if !registration.catch_all {
                any_pattern_matched = true;
            }

            let matched = MatchedMessage {
                message: message.clone(),
                captures: captures
                    .iter()
                    .map(|group| group.map(|m| m.as_str().to_string()))
                    .collect(),
            };

            // The hear hook runs awaited so vetoes stay ordered; a veto
            // skips this listener only.
            let ctx = hear_context(message, &registration.policy);
            if let Err(e) = hooks.trigger("hear", ctx).await {
                warn!(error = %e, "hear hook vetoed listener");
                continue;
            }

            let handler = Arc::clone(&registration.handler);
            tokio::spawn(async move {
                if let Err(e) = handler(matched).await {
                    warn!(error = %e, "Listener handler failed");
                }
            });
        }

        if addressed && any_pattern_listener && !any_pattern_matched {
            debug!(channel = %message.channel, "No listener matched an addressed message");
            let _ = no_match_tx.send(message.clone());
        }
    }
}

/// Merges the message payload with the listener's policy parameters for the
/// `hear` hook.
fn hear_context(message: &InboundMessage, policy: &ListenerPolicy) -> Value {
    let mut ctx = match &message.raw {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    if let Some(preformatted) = &message.preformatted {
        ctx.insert("preformatted".into(), Value::from(preformatted.clone()));
    }
    ctx.insert("mention".into(), Value::from(policy.requires_mention));
    for (key, value) in &policy.extras {
        ctx.insert(key.clone(), value.clone());
    }
    Value::Object(ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    fn self_info() -> SelfInfo {
        SelfInfo {
            id: "B0SELF".into(),
            name: "test".into(),
        }
    }

    fn message(channel: &str, text: &str) -> InboundMessage {
        InboundMessage::from_value(json!({
            "type": "message",
            "channel": channel,
            "text": text,
        }))
        .unwrap()
    }

    /// Handler that records the stripped-match order it was invoked in.
    fn recording_handler(tx: mpsc::UnboundedSender<usize>, tag: usize) -> ListenerFn {
        Arc::new(move |_msg| {
            let tx = tx.clone();
            Box::pin(async move {
                tx.send(tag).ok();
                Ok(())
            })
        })
    }

    async fn drain(rx: &mut mpsc::UnboundedReceiver<usize>) -> Vec<usize> {
        tokio::task::yield_now().await;
        let mut seen = Vec::new();
        while let Ok(tag) = rx.try_recv() {
            seen.push(tag);
        }
        seen
    }

    #[tokio::test]
    async fn satisfied_listeners_run_in_registration_order_exactly_once() {
        let registry = ListenerRegistry::new();
        let hooks = HookRegistry::new();
        let (no_match_tx, _) = broadcast::channel(4);
        let (tx, mut rx) = mpsc::unbounded_channel();

        registry.register(
            Regex::new(r"Testing@\d+").unwrap(),
            ListenerPolicy::default(),
            recording_handler(tx.clone(), 1),
        );
        registry.register(
            Regex::new("Testing").unwrap(),
            ListenerPolicy::default(),
            recording_handler(tx.clone(), 2),
        );
        registry.register(
            Regex::new("nomatch").unwrap(),
            ListenerPolicy::default(),
            recording_handler(tx.clone(), 3),
        );

        registry
            .dispatch(
                &self_info(),
                &hooks,
                &message("G0123123", "Testing@123"),
                &no_match_tx,
            )
            .await;

        assert_eq!(drain(&mut rx).await, vec![1, 2]);
    }

    #[tokio::test]
    async fn mention_policy_skips_unaddressed_messages() {
        let registry = ListenerRegistry::new();
        let hooks = HookRegistry::new();
        let (no_match_tx, _) = broadcast::channel(4);
        let (tx, mut rx) = mpsc::unbounded_channel();

        registry.register(
            Regex::new("hi").unwrap(),
            ListenerPolicy::mention(),
            recording_handler(tx.clone(), 1),
        );

        // not addressed: no mention, ordinary channel
        registry
            .dispatch(&self_info(), &hooks, &message("G0123123", "hi"), &no_match_tx)
            .await;
        // addressed by name
        registry
            .dispatch(
                &self_info(),
                &hooks,
                &message("G0123123", "hi test"),
                &no_match_tx,
            )
            .await;

        assert_eq!(drain(&mut rx).await, vec![1]);
    }

    #[tokio::test]
    async fn direct_message_channels_need_no_mention() {
        let registry = ListenerRegistry::new();
        let hooks = HookRegistry::new();
        let (no_match_tx, _) = broadcast::channel(4);
        let (tx, mut rx) = mpsc::unbounded_channel();

        registry.register(
            Regex::new("hi").unwrap(),
            ListenerPolicy::mention(),
            recording_handler(tx.clone(), 1),
        );

        registry
            .dispatch(&self_info(), &hooks, &message("D0123123", "hi"), &no_match_tx)
            .await;

        assert_eq!(drain(&mut rx).await, vec![1]);
    }

    #[tokio::test]
    async fn mention_is_stripped_before_pattern_matching() {
        let registry = ListenerRegistry::new();
        let hooks = HookRegistry::new();
        let (no_match_tx, _) = broadcast::channel(4);
        let (tx, mut rx) = mpsc::unbounded_channel();

        // pattern anchored at start: would fail if "test " were still present
        registry.register(
            Regex::new("^hi$").unwrap(),
            ListenerPolicy::mention(),
            recording_handler(tx.clone(), 1),
        );

        registry
            .dispatch(
                &self_info(),
                &hooks,
                &message("G0123123", "test hi"),
                &no_match_tx,
            )
            .await;

        assert_eq!(drain(&mut rx).await, vec![1]);
    }

    #[tokio::test]
    async fn catch_all_listeners_do_not_suppress_the_no_match_signal() {
        let registry = ListenerRegistry::new();
        let hooks = HookRegistry::new();
        let (no_match_tx, mut no_match_rx) = broadcast::channel(4);
        let (tx, _rx) = mpsc::unbounded_channel();

        registry.register(
            Regex::new("(?i)yes").unwrap(),
            ListenerPolicy::default(),
            recording_handler(tx.clone(), 1),
        );
        registry.register_catch_all(ListenerPolicy::default(), recording_handler(tx.clone(), 2));

        // addressed (name mentioned), nothing matches "no"
        registry
            .dispatch(
                &self_info(),
                &hooks,
                &message("G0123123", "test no"),
                &no_match_tx,
            )
            .await;
        // addressed, "yes" matches
        registry
            .dispatch(
                &self_info(),
                &hooks,
                &message("G0123123", "test yes"),
                &no_match_tx,
            )
            .await;

        let missed = no_match_rx.try_recv().unwrap();
        assert_eq!(missed.text.as_deref(), Some("test no"));
        assert!(no_match_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn no_signal_without_a_pattern_bearing_listener() {
        let registry = ListenerRegistry::new();
        let hooks = HookRegistry::new();
        let (no_match_tx, mut no_match_rx) = broadcast::channel(4);
        let (tx, _rx) = mpsc::unbounded_channel();

        registry.register_catch_all(ListenerPolicy::default(), recording_handler(tx.clone(), 1));

        registry
            .dispatch(
                &self_info(),
                &hooks,
                &message("D0123123", "anything"),
                &no_match_tx,
            )
            .await;

        assert!(no_match_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn hear_hook_veto_skips_only_that_listener() {
        let registry = ListenerRegistry::new();
        let hooks = HookRegistry::new();
        let (no_match_tx, _) = broadcast::channel(4);
        let (tx, mut rx) = mpsc::unbounded_channel();

        hooks.register("hear", |ctx: Value| async move {
            if ctx.get("block").and_then(Value::as_bool).unwrap_or(false) {
                anyhow::bail!("blocked");
            }
            Ok(ctx)
        });

        let mut blocking = ListenerPolicy::default();
        blocking.extras.insert("block".into(), json!(true));

        registry.register(
            Regex::new("hi").unwrap(),
            blocking,
            recording_handler(tx.clone(), 1),
        );
        registry.register(
            Regex::new("hi").unwrap(),
            ListenerPolicy::default(),
            recording_handler(tx.clone(), 2),
        );

        registry
            .dispatch(&self_info(), &hooks, &message("G0123123", "hi"), &no_match_tx)
            .await;

        assert_eq!(drain(&mut rx).await, vec![2]);
    }

    #[tokio::test]
    async fn handler_faults_do_not_stop_dispatch() {
        let registry = ListenerRegistry::new();
        let hooks = HookRegistry::new();
        let (no_match_tx, _) = broadcast::channel(4);
        let invoked = Arc::new(AtomicUsize::new(0));
        let invoked_clone = Arc::clone(&invoked);

        registry.register(
            Regex::new("hi").unwrap(),
            ListenerPolicy::default(),
            Arc::new(|_msg| Box::pin(async { anyhow::bail!("handler exploded") })),
        );
        registry.register(
            Regex::new("hi").unwrap(),
            ListenerPolicy::default(),
            Arc::new(move |_msg| {
                let invoked = Arc::clone(&invoked_clone);
                Box::pin(async move {
                    invoked.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            }),
        );

        registry
            .dispatch(&self_info(), &hooks, &message("G0123123", "hi"), &no_match_tx)
            .await;
        tokio::task::yield_now().await;

        assert_eq!(invoked.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn messages_without_text_are_skipped_quietly() {
        let registry = ListenerRegistry::new();
        let hooks = HookRegistry::new();
        let (no_match_tx, mut no_match_rx) = broadcast::channel(4);
        let (tx, mut rx) = mpsc::unbounded_channel();

        registry.register(
            Regex::new(".").unwrap(),
            ListenerPolicy::default(),
            recording_handler(tx.clone(), 1),
        );

        let msg = InboundMessage::from_value(json!({
            "type": "message",
            "channel": "G0123123",
        }))
        .unwrap();
        registry.dispatch(&self_info(), &hooks, &msg, &no_match_tx).await;

        assert!(drain(&mut rx).await.is_empty());
        assert!(no_match_rx.try_recv().is_err());
    }
}

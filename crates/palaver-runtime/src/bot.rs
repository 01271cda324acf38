//! The bot: public operation surface plus the inbound routing loop.
//!
//! A [`Bot`] owns the duplex channel, the web-API transport, the cached
//! roster and every registry (hooks, listeners, lifecycle subscriptions,
//! pending calls). All public operations trigger the hook point named after
//! themselves before any side effect; a hook failure aborts the operation.
//!
//! Inbound frames are processed by a single read-loop task: replies are
//! routed to their waiting callers, every frame is re-emitted on the raw
//! event bus, chat messages go through preformatting and listener dispatch,
//! and lifecycle events are fanned out to the matching message handles.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use futures::future::try_join_all;
use parking_lot::{Mutex, RwLock};
use regex::Regex;
use serde_json::{Map, Value, json};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use palaver_core::{
    ApiError, ApiResult, Duplex, InboundMessage, MatchedMessage, MessageIdent, RequestTransport,
    Roster, RosterEntry, SelfInfo, TokenKind, classify_token, lifecycle_ident, text,
};
use palaver_transport::HttpTransport;

use crate::config::Config;
use crate::correlator::{Correlator, complete};
use crate::dispatch::{ListenerFn, ListenerPolicy, ListenerRegistry};
use crate::handle::{LifecycleKind, MessageHandle, SubscriptionSet};
use crate::hooks::HookRegistry;

/// One inbound frame as re-emitted on the raw event bus.
#[derive(Debug, Clone)]
pub struct RawEvent {
    /// The frame's wire type, or the carried subtype for the extra
    /// per-subtype emission.
    pub ty: String,
    /// The full frame.
    pub payload: Value,
}

/// Wire types that are never message subtypes. Anything else injected under
/// a non-`message` name is synthesized as a message subtype frame.
const TOP_LEVEL_TYPES: [&str; 8] = [
    "hello",
    "ping",
    "pong",
    "reaction_added",
    "reaction_removed",
    "user_change",
    "presence_change",
    "emoji_changed",
];

struct BotInner {
    config: Config,
    duplex: RwLock<Option<Arc<dyn Duplex>>>,
    http: Arc<dyn RequestTransport>,
    roster: RwLock<Roster>,
    /// Parameters merged into every outbound send (icon settings etc.).
    globals: Mutex<Map<String, Value>>,
    hooks: HookRegistry,
    listeners: ListenerRegistry,
    correlator: Correlator,
    subscriptions: SubscriptionSet,
    raw_events: broadcast::Sender<RawEvent>,
    no_match: broadcast::Sender<InboundMessage>,
    shutdown: CancellationToken,
}

/// The bot instance. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Bot {
    inner: Arc<BotInner>,
}

impl Bot {
    /// Creates a bot with the default HTTP transport rooted at the
    /// configured API base URL.
    pub fn new(config: Config) -> Self {
        let http = Arc::new(HttpTransport::new(config.api_url.clone()));
        Self::with_transport(config, http)
    }

    /// Creates a bot with a caller-supplied web-API transport.
    pub fn with_transport(config: Config, http: Arc<dyn RequestTransport>) -> Self {
        let (raw_events, _) = broadcast::channel(64);
        let (no_match, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(BotInner {
                config,
                duplex: RwLock::new(None),
                http,
                roster: RwLock::new(Roster::default()),
                globals: Mutex::new(Map::new()),
                hooks: HookRegistry::new(),
                listeners: ListenerRegistry::new(),
                correlator: Correlator::new(),
                subscriptions: SubscriptionSet::new(),
                raw_events,
                no_match,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    // ------------------------------------------------------------------
    // Connection lifecycle
    // ------------------------------------------------------------------

    /// Connects the duplex channel to `url` and starts the read loop and
    /// the keepalive ping task.
    pub async fn connect(&self, url: &str) -> ApiResult<()> {
        self.inner
            .hooks
            .trigger("connect", json!({ "url": url }))
            .await?;

        let (duplex, rx) =
            palaver_transport::connect(url, self.inner.shutdown.child_token()).await?;
        self.attach(Arc::new(duplex), rx);
        self.spawn_ping_task();
        info!(url = %url, "Connected");
        Ok(())
    }

    /// Installs an already-connected duplex channel and spawns the read
    /// loop over its inbound stream.
    pub fn attach(&self, duplex: Arc<dyn Duplex>, mut rx: mpsc::Receiver<Value>) {
        *self.inner.duplex.write() = Some(duplex);

        let bot = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = bot.inner.shutdown.cancelled() => break,
                    frame = rx.recv() => match frame {
                        Some(frame) => bot.route_frame(frame).await,
                        None => break,
                    },
                }
            }
            debug!("Read loop finished");
            bot.inner.correlator.clear();
            *bot.inner.duplex.write() = None;
        });
    }

    fn spawn_ping_task(&self) {
        let bot = self.clone();
        let period = Duration::from_secs(self.inner.config.ping_interval_secs.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // The immediate first tick is not a keepalive.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = bot.inner.shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        let Some(duplex) = bot.duplex() else { break };
                        // The reply is intentionally unawaited; the id is
                        // reserved without a pending slot.
                        let frame = json!({
                            "id": bot.inner.correlator.next_id(),
                            "type": "ping",
                        });
                        if let Err(e) = duplex.send(frame).await {
                            warn!(error = %e, "Keepalive ping failed");
                            break;
                        }
                    }
                }
            }
        });
    }

    /// Loads the directory from a session-start payload.
    pub fn apply_directory(&self, data: &Value) {
        *self.inner.roster.write() = Roster::from_value(data);
    }

    /// Tears the bot down: cancels the read loop and ping task, unblocks
    /// every pending caller as disconnected, drops the duplex writer.
    pub fn destroy(&self) {
        info!("Shutting down");
        self.inner.shutdown.cancel();
        self.inner.correlator.clear();
        *self.inner.duplex.write() = None;
    }

    // ------------------------------------------------------------------
    // Sending
    // ------------------------------------------------------------------

    /// Sends a chat message to a single target.
    ///
    /// The target may be an identifier (used as-is over the duplex channel),
    /// an `@name` (sent through the web API without resolution), or a
    /// display name resolved against the roster.
    pub async fn send_message(&self, target: &str, text: &str) -> ApiResult<MessageHandle> {
        self.send_message_with(target, text, Map::new()).await
    }

    /// [`send_message`](Self::send_message) with extra send parameters.
    /// Send-time globals are merged first, explicit parameters win.
    pub async fn send_message_with(
        &self,
        target: &str,
        text: &str,
        params: Map<String, Value>,
    ) -> ApiResult<MessageHandle> {
        let mut merged = self.inner.globals.lock().clone();
        for (key, value) in params {
            merged.insert(key, value);
        }
        merged.insert("text".into(), Value::from(text));

        self.inner
            .hooks
            .trigger(
                "send_message",
                json!({ "target": target, "params": merged.clone() }),
            )
            .await?;

        let force_http = merged.get("websocket") == Some(&Value::Bool(false));

        if target.starts_with('@') || force_http {
            return self.post_message_http(target, merged).await;
        }

        let channel = match classify_token(target) {
            TokenKind::Id => target.to_string(),
            TokenKind::Name => {
                let roster = self.inner.roster.read();
                roster
                    .resolve(target)
                    .map(|entry| entry.id.clone())
                    .ok_or_else(|| ApiError::UnknownTarget {
                        token: target.to_string(),
                    })?
            }
        };
        merged.insert("channel".into(), Value::from(channel.clone()));

        let duplex = self.duplex().ok_or(ApiError::NotConnected)?;
        let pending = self
            .inner
            .correlator
            .send(&*duplex, "message", Value::Object(merged))
            .await?;
        let reply = pending.wait().await?;

        let ts = reply
            .get("ts")
            .and_then(Value::as_str)
            .ok_or_else(|| ApiError::Serialization("send reply carried no ts".into()))?;
        Ok(MessageHandle::new(
            MessageIdent::new(channel, ts),
            self.clone(),
        ))
    }

    /// Sends the same message to several targets concurrently.
    pub async fn send_message_all(
        &self,
        targets: &[&str],
        text: &str,
    ) -> ApiResult<Vec<MessageHandle>> {
        try_join_all(
            targets
                .iter()
                .map(|target| self.send_message(target, text)),
        )
        .await
    }

    /// Replies in the channel an inbound message arrived on.
    pub async fn reply(&self, message: &InboundMessage, text: &str) -> ApiResult<MessageHandle> {
        self.send_message(&message.channel, text).await
    }

    async fn post_message_http(
        &self,
        target: &str,
        mut params: Map<String, Value>,
    ) -> ApiResult<MessageHandle> {
        params.insert("channel".into(), Value::from(target));
        params.remove("websocket");
        let response = self
            .inner
            .http
            .call("chat.postMessage", &params, &self.inner.config.token)
            .await?;
        let response = complete(response)?;

        let channel = response
            .get("channel")
            .and_then(Value::as_str)
            .unwrap_or(target)
            .to_string();
        let ts = response
            .get("ts")
            .and_then(Value::as_str)
            .ok_or_else(|| ApiError::Serialization("send response carried no ts".into()))?;
        Ok(MessageHandle::new(
            MessageIdent::new(channel, ts),
            self.clone(),
        ))
    }

    // ------------------------------------------------------------------
    // Message follow-ups
    // ------------------------------------------------------------------

    /// Replaces the text of a previously sent message.
    pub async fn update_message(&self, channel: &str, ts: &str, text: &str) -> ApiResult<Value> {
        self.inner
            .hooks
            .trigger(
                "update_message",
                json!({ "channel": channel, "ts": ts, "text": text }),
            )
            .await?;
        let mut params = Map::new();
        params.insert("channel".into(), Value::from(channel));
        params.insert("ts".into(), Value::from(ts));
        params.insert("text".into(), Value::from(text));
        let response = self
            .inner
            .http
            .call("chat.update", &params, &self.inner.config.token)
            .await?;
        complete(response)
    }

    /// Deletes a previously sent message.
    pub async fn delete_message(&self, channel: &str, ts: &str) -> ApiResult<Value> {
        self.inner
            .hooks
            .trigger("delete_message", json!({ "channel": channel, "ts": ts }))
            .await?;
        let mut params = Map::new();
        params.insert("channel".into(), Value::from(channel));
        params.insert("ts".into(), Value::from(ts));
        let response = self
            .inner
            .http
            .call("chat.delete", &params, &self.inner.config.token)
            .await?;
        complete(response)
    }

    /// Adds an emoji reaction to a message.
    pub async fn react(&self, channel: &str, ts: &str, emoji: &str) -> ApiResult<Value> {
        self.inner
            .hooks
            .trigger(
                "react",
                json!({ "channel": channel, "ts": ts, "emoji": emoji }),
            )
            .await?;
        let mut params = Map::new();
        params.insert("channel".into(), Value::from(channel));
        params.insert("timestamp".into(), Value::from(ts));
        params.insert("name".into(), Value::from(emoji));
        let response = self
            .inner
            .http
            .call("reactions.add", &params, &self.inner.config.token)
            .await?;
        complete(response)
    }

    // ------------------------------------------------------------------
    // Directory and appearance
    // ------------------------------------------------------------------

    /// Resolves a token against the roster.
    pub async fn find(&self, token: &str) -> ApiResult<RosterEntry> {
        self.inner
            .hooks
            .trigger("find", json!({ "token": token }))
            .await?;
        self.inner
            .roster
            .read()
            .resolve(token)
            .cloned()
            .ok_or_else(|| ApiError::UnknownTarget {
                token: token.to_string(),
            })
    }

    /// Returns every roster entry in the fixed concatenation order.
    pub async fn all(&self) -> ApiResult<Vec<RosterEntry>> {
        self.inner.hooks.trigger("all", json!({})).await?;
        Ok(self.inner.roster.read().all().cloned().collect())
    }

    /// Classifies a token as an identifier or a display name.
    pub async fn classify(&self, token: &str) -> ApiResult<TokenKind> {
        self.inner
            .hooks
            .trigger("classify", json!({ "token": token }))
            .await?;
        Ok(classify_token(token))
    }

    /// Lists the team's custom emoji.
    pub async fn emojis(&self) -> ApiResult<Value> {
        self.inner.hooks.trigger("emojis", json!({})).await?;
        let response = self
            .inner
            .http
            .call("emoji.list", &Map::new(), &self.inner.config.token)
            .await?;
        complete(response)
    }

    /// Sets the bot's message icon for subsequent sends.
    ///
    /// Values containing an `:emoji:` code set `icon_emoji`, other
    /// non-empty values set `icon_url`, `None` or an empty value clears
    /// both.
    pub async fn icon(&self, icon: Option<&str>) -> ApiResult<()> {
        self.inner
            .hooks
            .trigger("icon", json!({ "icon": icon }))
            .await?;
        let mut globals = self.inner.globals.lock();
        globals.remove("icon_emoji");
        globals.remove("icon_url");
        match icon {
            Some(value) if is_emoji_ref(value) => {
                globals.insert("icon_emoji".into(), Value::from(value));
            }
            Some(value) if !value.is_empty() => {
                globals.insert("icon_url".into(), Value::from(value));
            }
            _ => {}
        }
        Ok(())
    }

    /// Sets a parameter merged into every subsequent send.
    pub fn set_global(&self, key: impl Into<String>, value: Value) {
        self.inner.globals.lock().insert(key.into(), value);
    }

    // ------------------------------------------------------------------
    // Listeners and hooks
    // ------------------------------------------------------------------

    /// Registers a listener for every message matching `pattern`.
    pub async fn hear<F, Fut>(&self, pattern: Regex, handler: F) -> ApiResult<()>
    where
        F: Fn(MatchedMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.inner
            .hooks
            .trigger("hear", json!({ "pattern": pattern.as_str() }))
            .await?;
        self.inner
            .listeners
            .register(pattern, ListenerPolicy::default(), erase(handler));
        Ok(())
    }

    /// Registers a listener that only fires for messages addressed to the
    /// bot. `None` as the pattern listens to everything addressed.
    pub async fn listen<F, Fut>(&self, pattern: Option<Regex>, handler: F) -> ApiResult<()>
    where
        F: Fn(MatchedMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.inner
            .hooks
            .trigger(
                "listen",
                json!({ "pattern": pattern.as_ref().map(Regex::as_str) }),
            )
            .await?;
        match pattern {
            Some(pattern) => {
                self.inner
                    .listeners
                    .register(pattern, ListenerPolicy::mention(), erase(handler));
            }
            None => {
                self.inner
                    .listeners
                    .register_catch_all(ListenerPolicy::mention(), erase(handler));
            }
        }
        Ok(())
    }

    /// Appends a callback to the named hook point.
    pub fn on_hook<F, Fut>(&self, name: impl Into<String>, callback: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.inner.hooks.register(name, callback);
    }

    // ------------------------------------------------------------------
    // Generic calls and raw traffic
    // ------------------------------------------------------------------

    /// Invokes an arbitrary method, over the duplex channel or the web API.
    pub async fn call(
        &self,
        method: &str,
        params: Map<String, Value>,
        via_duplex: bool,
    ) -> ApiResult<Value> {
        self.inner
            .hooks
            .trigger("call", json!({ "method": method, "params": params.clone() }))
            .await?;
        if via_duplex {
            let duplex = self.duplex().ok_or(ApiError::NotConnected)?;
            let pending = self
                .inner
                .correlator
                .send(&*duplex, method, Value::Object(params))
                .await?;
            pending.wait().await
        } else {
            let response = self
                .inner
                .http
                .call(method, &params, &self.inner.config.token)
                .await?;
            complete(response)
        }
    }

    /// Waits for the reply carrying `reply_to == id`.
    ///
    /// A single waiter per id; a second registration displaces the first.
    pub async fn wait_for_reply(&self, id: u64) -> ApiResult<Value> {
        self.inner
            .hooks
            .trigger("wait_for_reply", json!({ "id": id }))
            .await?;
        let rx = self.inner.correlator.register(id);
        let reply = rx.await.map_err(|_| ApiError::NotConnected)?;
        complete(reply)
    }

    /// Synthesizes an inbound event locally and routes it through the same
    /// path as a wire frame.
    pub async fn inject(&self, ty: &str, payload: Value) {
        self.route_frame(synthesize(ty, payload)).await;
    }

    /// Observes every inbound frame, after classification.
    pub fn subscribe_events(&self) -> broadcast::Receiver<RawEvent> {
        self.inner.raw_events.subscribe()
    }

    /// Observes addressed messages no pattern listener matched.
    pub fn subscribe_no_match(&self) -> broadcast::Receiver<InboundMessage> {
        self.inner.no_match.subscribe()
    }

    /// The bot's own descriptor from the loaded directory.
    pub fn self_info(&self) -> SelfInfo {
        self.inner.roster.read().self_info.clone()
    }

    pub(crate) fn subscriptions(&self) -> &SubscriptionSet {
        &self.inner.subscriptions
    }

    fn duplex(&self) -> Option<Arc<dyn Duplex>> {
        self.inner.duplex.read().clone()
    }

    // ------------------------------------------------------------------
    // Inbound routing
    // ------------------------------------------------------------------

    async fn route_frame(&self, frame: Value) {
        let consumed = self.inner.correlator.resolve(&frame);

        let ty = frame
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("raw")
            .to_string();
        let _ = self.inner.raw_events.send(RawEvent {
            ty: ty.clone(),
            payload: frame.clone(),
        });
        if consumed {
            return;
        }

        match ty.as_str() {
            "message" => self.route_message(frame).await,
            "reaction_added" | "reaction_removed" => {
                if let (Some(kind), Some(ident)) =
                    (LifecycleKind::from_wire(&ty), lifecycle_ident(&ty, &frame))
                {
                    self.inner.subscriptions.fire(kind, &ident, &frame).await;
                }
            }
            "user_change" => {
                if let Some(user) = frame.get("user") {
                    self.inner.roster.write().apply_user_change(user);
                }
            }
            _ => {}
        }
    }

    async fn route_message(&self, frame: Value) {
        let Some(mut message) = InboundMessage::from_value(frame) else {
            return;
        };

        // Preformat under the read guard, before any await.
        if let Some(raw_text) = message.text.as_deref() {
            let roster = self.inner.roster.read();
            message.preformatted = Some(text::preformat(raw_text, &roster));
        }

        if let Some(subtype) = message.subtype.clone() {
            let _ = self.inner.raw_events.send(RawEvent {
                ty: subtype.clone(),
                payload: message.raw.clone(),
            });
            if let (Some(kind), Some(ident)) = (
                LifecycleKind::from_wire(&subtype),
                lifecycle_ident(&subtype, &message.raw),
            ) {
                self.inner
                    .subscriptions
                    .fire(kind, &ident, &message.raw)
                    .await;
            }
        }

        let self_info = self.self_info();
        self.inner
            .listeners
            .dispatch(&self_info, &self.inner.hooks, &message, &self.inner.no_match)
            .await;
    }
}

/// Builds the wire-shaped frame for a locally injected event.
///
/// Non-`message` names that are not top-level wire types are message
/// subtypes: the frame gains `{type: "message", subtype, hidden: true}`,
/// `message_deleted` additionally mirrors its `ts` as `deleted_ts`, and
/// `message_changed` nests the payload under `message`.
fn synthesize(ty: &str, payload: Value) -> Value {
    let mut map = match payload {
        Value::Object(map) => map,
        _ => Map::new(),
    };

    if ty == "message" || TOP_LEVEL_TYPES.contains(&ty) {
        map.insert("type".into(), Value::from(ty));
        return Value::Object(map);
    }

    match ty {
        "message_deleted" => {
            if let Some(ts) = map.get("ts").cloned() {
                map.insert("deleted_ts".into(), ts);
            }
        }
        "message_changed" => {
            map.insert("message".into(), Value::Object(map.clone()));
        }
        _ => {}
    }
    map.insert("type".into(), Value::from("message"));
    map.insert("subtype".into(), Value::from(ty));
    map.insert("hidden".into(), Value::from(true));
    Value::Object(map)
}

/// Emoji codes are `:word:` tokens, matched anywhere in the value.
static EMOJI_CODE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r":\w+:").unwrap());

fn is_emoji_ref(value: &str) -> bool {
    EMOJI_CODE.is_match(value)
}

fn erase<F, Fut>(handler: F) -> ListenerFn
where
    F: Fn(MatchedMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let handler: ListenerFn = Arc::new(move |msg| Box::pin(handler(msg)));
    handler
}

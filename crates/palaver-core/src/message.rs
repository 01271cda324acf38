//! Message types shared between the dispatch engine and the handle layer.

use serde_json::Value;

/// The stable identity of a sent message: channel plus server-assigned
/// timestamp. This pair is the sole correlation key for lifecycle events.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageIdent {
    /// Channel identifier the message lives in.
    pub channel: String,
    /// Server timestamp assigned on acceptance.
    pub ts: String,
}

impl MessageIdent {
    /// Creates an identity from its two components.
    pub fn new(channel: impl Into<String>, ts: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            ts: ts.into(),
        }
    }
}

impl std::fmt::Display for MessageIdent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.channel, self.ts)
    }
}

/// An inbound chat message, normalized for listener dispatch.
///
/// The raw wire frame is preserved in `raw`; the typed fields are the ones
/// addressing and pattern matching need.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Channel the message arrived on.
    pub channel: String,
    /// Sender identifier, when present.
    pub user: Option<String>,
    /// Server timestamp, when present.
    pub ts: Option<String>,
    /// Raw message text as it appeared on the wire.
    pub text: Option<String>,
    /// Message subtype (`message_changed`, `me_message`, ...), when present.
    pub subtype: Option<String>,
    /// Normalized rendering of `text` with escape sequences decoded and
    /// reference tokens rewritten. Filled in by the runtime before dispatch.
    pub preformatted: Option<String>,
    /// The full wire frame.
    pub raw: Value,
}

impl InboundMessage {
    /// Builds a message from a wire frame. Returns `None` when the frame has
    /// no channel, since such a frame cannot be dispatched or replied to.
    pub fn from_value(frame: Value) -> Option<Self> {
        let channel = frame.get("channel")?.as_str()?.to_string();
        let get = |key: &str| {
            frame
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        Some(Self {
            channel,
            user: get("user"),
            ts: get("ts"),
            text: get("text"),
            subtype: get("subtype"),
            preformatted: None,
            raw: frame,
        })
    }
}

/// A dispatched message augmented with the pattern's match result.
///
/// Handlers receive this copy; `captures[0]` is the whole match, later
/// entries are the pattern's capture groups.
#[derive(Debug, Clone)]
pub struct MatchedMessage {
    /// The inbound message, cloned for this handler.
    pub message: InboundMessage,
    /// Captured groups from the listener's pattern, run against the
    /// mention-stripped text.
    pub captures: Vec<Option<String>>,
}

/// Extracts the message identity a lifecycle event refers to.
///
/// Reaction events carry the referenced item's coordinates under `item`;
/// edit/delete subtypes carry them at the top level.
pub fn lifecycle_ident(ty: &str, payload: &Value) -> Option<MessageIdent> {
    let source = match ty {
        "reaction_added" | "reaction_removed" => payload.get("item")?,
        _ => payload,
    };
    let channel = source.get("channel")?.as_str()?;
    let ts = source.get("ts")?.as_str()?;
    Some(MessageIdent::new(channel, ts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builds_inbound_message_from_frame() {
        let msg = InboundMessage::from_value(json!({
            "type": "message",
            "channel": "G0123123",
            "user": "U123123",
            "ts": "111.222",
            "text": "hello",
        }))
        .unwrap();
        assert_eq!(msg.channel, "G0123123");
        assert_eq!(msg.text.as_deref(), Some("hello"));
        assert_eq!(msg.subtype, None);
    }

    #[test]
    fn frame_without_channel_is_not_dispatchable() {
        assert!(InboundMessage::from_value(json!({ "type": "message" })).is_none());
    }

    #[test]
    fn lifecycle_ident_uses_item_for_reactions() {
        let ident = lifecycle_ident(
            "reaction_added",
            &json!({ "item": { "channel": "G1", "ts": "0000" } }),
        )
        .unwrap();
        assert_eq!(ident, MessageIdent::new("G1", "0000"));
    }

    #[test]
    fn lifecycle_ident_uses_top_level_for_message_subtypes() {
        let ident = lifecycle_ident(
            "message_changed",
            &json!({ "channel": "G1", "ts": "1111" }),
        )
        .unwrap();
        assert_eq!(ident, MessageIdent::new("G1", "1111"));
    }
}

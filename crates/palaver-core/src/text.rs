//! Wire-text normalization and self-mention rules.
//!
//! Raw wire text escapes literal angle brackets and ampersands and carries
//! bracketed reference tokens for mentions and links. [`preformat`] produces
//! the human-readable rendering listeners see. Addressing and mention
//! stripping are functions of the self descriptor and the message alone,
//! compiled once per message as [`MentionRules`].

use std::sync::LazyLock;

use regex::Regex;

use crate::roster::{Roster, SelfInfo};

/// Bracketed reference tokens: `<@UID>`, `<#CID>` and bare `<scheme://...>`
/// links. Tokens containing whitespace are plain text, not references.
static REF_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<(?:([@#])([A-Z0-9]+)|([a-zA-Z][a-zA-Z0-9+.\-]*://[^<>\s]*))>")
        .unwrap()
});

/// Renders wire text for listeners: rewrites reference tokens via the
/// roster, then decodes the `&lt;` `&gt;` `&amp;` escape sequences.
///
/// User references become `@<displayName>`, channel references
/// `#<displayName>`, links their plain URL. Unresolvable references are left
/// verbatim.
pub fn preformat(text: &str, roster: &Roster) -> String {
    let rewritten = REF_TOKEN.replace_all(text, |caps: &regex::Captures<'_>| {
        if let Some(url) = caps.get(3) {
            return url.as_str().to_string();
        }
        let sigil = &caps[1];
        let id = &caps[2];
        match roster.all().find(|e| e.id == id) {
            Some(entry) => format!("{}{}", sigil, entry.name),
            None => caps[0].to_string(),
        }
    });
    decode_entities(&rewritten)
}

/// Decodes the three wire escape sequences into literal characters.
pub fn decode_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// The compiled mention rules for one self descriptor.
///
/// Compiling the whole-word name pattern is not free, so callers build one
/// of these per dispatched message and reuse it across the addressing
/// decision and every listener's mention strip.
pub struct MentionRules {
    id: String,
    pattern: Option<Regex>,
}

impl MentionRules {
    /// Compiles the rules for `self_info`. An empty name yields no pattern.
    pub fn new(self_info: &SelfInfo) -> Self {
        let pattern = (!self_info.name.is_empty()).then(|| name_pattern(&self_info.name));
        Self {
            id: self_info.id.clone(),
            pattern,
        }
    }

    /// Decides whether an inbound message counts as directed at the bot.
    ///
    /// A message on a direct-message channel is always addressed. Elsewhere
    /// it is addressed iff its text contains the bot's display name as a
    /// whole word (case-insensitive) or its identifier as a substring.
    pub fn is_addressed(&self, channel: &str, text: Option<&str>) -> bool {
        if channel.starts_with('D') {
            return true;
        }
        let Some(text) = text else {
            return false;
        };
        if let Some(pattern) = &self.pattern {
            if pattern.is_match(text) {
                return true;
            }
        }
        !self.id.is_empty() && text.contains(&self.id)
    }

    /// Strips the first occurrence of the bot's own name from the text so
    /// listener patterns need not account for the mention itself.
    pub fn strip_mention(&self, text: &str) -> String {
        match &self.pattern {
            Some(pattern) => pattern.replace(text, "").trim().to_string(),
            None => text.trim().to_string(),
        }
    }
}

fn name_pattern(name: &str) -> Regex {
    // The escaped name cannot produce an invalid pattern.
    Regex::new(&format!(r"(?i)\b{}\b", regex::escape(name)))
        .unwrap_or_else(|_| Regex::new("$^").unwrap())
}

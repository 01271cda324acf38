//! Cached directory of addressable entities.
//!
//! The roster is populated externally (from the session-start payload) and
//! read by the core. The only mutation the core performs is merging profile
//! fields when the service delivers a `user_change` event.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The kind of a roster entry, derived from the collection it was loaded into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RosterKind {
    /// A regular user account.
    #[default]
    User,
    /// A public channel.
    Channel,
    /// A private group.
    Group,
    /// A direct-message channel.
    Im,
    /// A bot account.
    Bot,
}

/// One addressable entity in the directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RosterEntry {
    /// Stable identifier, globally unique within its kind.
    pub id: String,
    /// Display name. Not guaranteed unique over time; direct-message
    /// channels have none.
    #[serde(default)]
    pub name: String,
    /// Optional profile metadata (avatar references etc.).
    #[serde(default)]
    pub profile: Map<String, Value>,
    /// Kind tag, assigned by the collection the entry was loaded into.
    #[serde(skip)]
    pub kind: RosterKind,
    /// Remaining wire fields, preserved verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The bot's own descriptor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelfInfo {
    /// Own identifier.
    #[serde(default)]
    pub id: String,
    /// Own display name.
    #[serde(default)]
    pub name: String,
}

/// Classification of a lookup token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// An identifier-shaped token (e.g. `U0123123`).
    Id,
    /// A display-name token.
    Name,
}

/// Kind-prefix letters that identifier-shaped tokens start with.
const ID_PREFIXES: [u8; 4] = [b'U', b'C', b'G', b'D'];

/// Classifies a token as an identifier or a display name.
///
/// A token is an identifier iff it is all upper-case, its first character is
/// one of the kind-prefix letters and its second character is the digit zero.
/// Everything else, including malformed near-misses like `G0123123x`, is
/// treated as a display name.
pub fn classify_token(token: &str) -> TokenKind {
    let bytes = token.as_bytes();
    if token.to_uppercase() == token
        && bytes.len() >= 2
        && ID_PREFIXES.contains(&bytes[0])
        && bytes[1] == b'0'
    {
        TokenKind::Id
    } else {
        TokenKind::Name
    }
}

/// The cached directory: five named collections plus the self descriptor.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    /// Regular user accounts.
    pub users: Vec<RosterEntry>,
    /// Public channels.
    pub channels: Vec<RosterEntry>,
    /// Private groups.
    pub groups: Vec<RosterEntry>,
    /// Direct-message channels.
    pub ims: Vec<RosterEntry>,
    /// Bot accounts.
    pub bots: Vec<RosterEntry>,
    /// The bot's own descriptor.
    pub self_info: SelfInfo,
}

impl Roster {
    /// Loads a roster from a session-start payload containing the five
    /// collections (`users`, `channels`, `groups`, `ims`, `bots`) and `self`.
    ///
    /// Missing collections load as empty; malformed entries are skipped.
    pub fn from_value(data: &Value) -> Self {
        Self {
            users: load_entries(data.get("users"), RosterKind::User),
            channels: load_entries(data.get("channels"), RosterKind::Channel),
            groups: load_entries(data.get("groups"), RosterKind::Group),
            ims: load_entries(data.get("ims"), RosterKind::Im),
            bots: load_entries(data.get("bots"), RosterKind::Bot),
            self_info: data
                .get("self")
                .and_then(|v| serde_json::from_value(v.clone()).ok())
                .unwrap_or_default(),
        }
    }

    /// Iterates all entries in the fixed concatenation order:
    /// users, groups, channels, ims, bots.
    ///
    /// This order is the tie-break policy for name collisions — the first
    /// collection listed wins.
    pub fn all(&self) -> impl Iterator<Item = &RosterEntry> {
        self.users
            .iter()
            .chain(self.groups.iter())
            .chain(self.channels.iter())
            .chain(self.ims.iter())
            .chain(self.bots.iter())
    }

    /// Resolves a token to the first matching entry, scanning the
    /// concatenation of all collections.
    ///
    /// Identifier-shaped tokens match on `id`, everything else on `name`.
    pub fn resolve(&self, token: &str) -> Option<&RosterEntry> {
        match classify_token(token) {
            TokenKind::Id => self.all().find(|e| e.id == token),
            TokenKind::Name => self.all().find(|e| e.name == token),
        }
    }

    /// Merges updated profile fields of a changed user into the matching
    /// entry, in place. Non-user entries are never touched.
    pub fn apply_user_change(&mut self, user: &Value) {
        let Some(id) = user.get("id").and_then(Value::as_str) else {
            return;
        };
        let Some(entry) = self.users.iter_mut().find(|e| e.id == id) else {
            return;
        };
        if let Some(name) = user.get("name").and_then(Value::as_str) {
            entry.name = name.to_string();
        }
        if let Some(profile) = user.get("profile").and_then(Value::as_object) {
            for (key, value) in profile {
                entry.profile.insert(key.clone(), value.clone());
            }
        }
    }
}

fn load_entries(value: Option<&Value>, kind: RosterKind) -> Vec<RosterEntry> {
    let Some(items) = value.and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| serde_json::from_value::<RosterEntry>(item.clone()).ok())
        .map(|mut entry| {
            entry.kind = kind;
            entry
        })
        .collect()
}

//! # Palaver Core
//!
//! Foundation types for the palaver chat-bot client runtime:
//!
//! - **Error taxonomy**: [`TransportError`], [`ApiError`] and their `Result`
//!   aliases.
//! - **Roster**: the cached directory of addressable entities, token
//!   classification and name/id resolution ([`Roster`], [`classify_token`]).
//! - **Messages**: inbound message normalization and the channel+timestamp
//!   identity used for lifecycle correlation ([`InboundMessage`],
//!   [`MessageIdent`]).
//! - **Text rules**: wire-text preformatting, addressing and self-mention
//!   stripping ([`text`]).
//! - **Transport traits**: the seams the runtime talks through ([`Duplex`],
//!   [`RequestTransport`]).

pub mod error;
pub mod message;
pub mod roster;
pub mod text;
pub mod transport;

pub use error::{ApiError, ApiResult, TransportError, TransportResult};
pub use message::{InboundMessage, MatchedMessage, MessageIdent, lifecycle_ident};
pub use roster::{Roster, RosterEntry, RosterKind, SelfInfo, TokenKind, classify_token};
pub use text::MentionRules;
pub use transport::{Duplex, RequestTransport};

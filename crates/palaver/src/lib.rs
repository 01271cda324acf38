//! # Palaver
//!
//! A client runtime for real-time team-chat bots.
//!
//! A bot connects a persistent duplex channel to the chat service, keeps a
//! cached directory of users and channels, and dispatches inbound messages
//! to pattern listeners. Outbound calls are correlated with their
//! asynchronous replies, and every sent message yields a handle for
//! follow-up operations and lifecycle observation.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use palaver::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     palaver::logging::init_from_config(&config.logging);
//!
//!     let bot = Bot::new(config);
//!     bot.listen(Some(Regex::new("status")?), |msg| async move {
//!         println!("status requested in {}", msg.message.channel);
//!         Ok(())
//!     })
//!     .await?;
//!     bot.connect("wss://example.test/rtm").await?;
//!     Ok(())
//! }
//! ```

pub use palaver_core as core;
pub use palaver_runtime as runtime;
pub use palaver_transport as transport;

pub use palaver_runtime::logging;

/// The common imports for bot authors.
pub mod prelude {
    pub use palaver_core::{
        ApiError, ApiResult, InboundMessage, MatchedMessage, MessageIdent, Roster, RosterEntry,
        RosterKind, SelfInfo, TokenKind,
    };
    pub use palaver_runtime::{
        Bot, Config, LifecycleKind, ListenerPolicy, MessageHandle, RawEvent,
    };
    pub use regex::Regex;
}

//! # Palaver Runtime
//!
//! The bot runtime: request/reply correlation, the hook pipeline, listener
//! dispatch, message handles with lifecycle correlation, and the [`Bot`]
//! facade tying them to the transports.
//!
//! ```rust,ignore
//! use palaver_runtime::{Bot, Config};
//! use regex::Regex;
//!
//! let config = Config::load()?;
//! palaver_runtime::logging::init_from_config(&config.logging);
//!
//! let bot = Bot::new(config);
//! bot.hear(Regex::new("deploy (.+)")?, |msg| async move {
//!     println!("deploy request: {:?}", msg.captures[1]);
//!     Ok(())
//! })
//! .await?;
//! bot.connect("wss://example.test/rtm").await?;
//! ```

pub mod bot;
pub mod config;
pub mod correlator;
pub mod dispatch;
pub mod handle;
pub mod hooks;
pub mod logging;

#[cfg(test)]
mod testing;

pub use bot::{Bot, RawEvent};
pub use config::{Config, ConfigError, LoggingConfig};
pub use correlator::{Correlator, PendingReply};
pub use dispatch::{ListenerFn, ListenerPolicy, ListenerRegistry};
pub use handle::{LifecycleKind, MessageHandle, SubscriptionId, SubscriptionSet};
pub use hooks::{HookFn, HookRegistry};

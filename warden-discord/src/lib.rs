//! Discord platform adapter: the concrete `MessageStream` and `ActionEffector`
//! implementations for the one platform the engine currently supports, plus the
//! action registry entries a deployment's worker process needs to validate and
//! execute Discord actions.
//!
//! Built on serenity: a gateway-listening `EventHandler` feeding an `mpsc` channel
//! for inbound messages, and an HTTP-only effector for outbound actions.

pub mod actions;
pub mod config;
pub mod effector;
pub mod error;
pub mod stream;

pub use actions::register as register_actions;
pub use config::DiscordConfig;
pub use effector::DiscordEffector;
pub use error::DiscordError;
pub use stream::DiscordMessageStream;

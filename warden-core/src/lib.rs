//! Shared entity types, status enums, and error taxonomy for the moderation engine.
//!
//! Every other `warden-*` crate depends on this one for the vocabulary it shares with
//! the rest of the workspace: [`Platform`], [`DeploymentState`], [`ActionStatus`], the
//! entity structs in [`model`], and the [`ModerationError`] taxonomy.

pub mod action_registry;
pub mod error;
pub mod model;

pub use action_registry::{ActionDefinition, ActionRegistry, RegistryError};
pub use error::ModerationError;
pub use model::*;

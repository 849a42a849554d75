//! Action registry: replaces reflection-based action dispatch (name -> class lookup)
//! with an explicit table keyed by `(platform, action_type)`.
//!
//! Each entry carries the default approval requirement and a parameter validator.
//! Looking up an unregistered `(platform, action_type)` pair is a typed
//! [`RegistryError::UnknownAction`] rather than a reflection failure.

use std::collections::HashMap;

use thiserror::Error;

use crate::model::Platform;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no action definition for platform {platform:?}, type {action_type:?}")]
    UnknownAction {
        platform: Platform,
        action_type: String,
    },
    #[error("invalid parameters for action {action_type:?}: {reason}")]
    InvalidParams { action_type: String, reason: String },
}

/// Validates an action's parameter document against its declared shape.
pub type ParamValidator = fn(&serde_json::Value) -> Result<(), String>;

#[derive(Clone)]
pub struct ActionDefinition {
    pub action_type: String,
    pub requires_approval_default: bool,
    pub validate: ParamValidator,
}

impl ActionDefinition {
    pub fn new(action_type: &str, requires_approval_default: bool, validate: ParamValidator) -> Self {
        Self {
            action_type: action_type.to_string(),
            requires_approval_default,
            validate,
        }
    }
}

/// Registry of action definitions per platform. Populated once at process start by
/// each platform adapter (e.g. `warden-discord` registers `ban`/`mute`/`kick`).
#[derive(Clone, Default)]
pub struct ActionRegistry {
    defs: HashMap<(Platform, String), ActionDefinition>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, platform: Platform, def: ActionDefinition) {
        self.defs.insert((platform, def.action_type.clone()), def);
    }

    pub fn get(&self, platform: Platform, action_type: &str) -> Option<&ActionDefinition> {
        self.defs.get(&(platform, action_type.to_string()))
    }

    /// Looks up the definition for `(platform, action_type)` and validates `params`
    /// against it. Returns the definition's approval default on success.
    pub fn validate(
        &self,
        platform: Platform,
        action_type: &str,
        params: &serde_json::Value,
    ) -> Result<bool, RegistryError> {
        let def = self
            .get(platform, action_type)
            .ok_or_else(|| RegistryError::UnknownAction {
                platform,
                action_type: action_type.to_string(),
            })?;
        (def.validate)(params).map_err(|reason| RegistryError::InvalidParams {
            action_type: action_type.to_string(),
            reason,
        })?;
        Ok(def.requires_approval_default)
    }
}

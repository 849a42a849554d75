//! Discord action definitions: the three punitive actions a deployment can take
//! (ban/mute/kick), expressed as registry entries instead of a type-name dispatch
//! table.

use warden_core::{ActionDefinition, ActionRegistry, Platform};

pub const BAN: &str = "ban";
pub const MUTE: &str = "mute";
pub const KICK: &str = "kick";

fn validate_user_id(params: &serde_json::Value) -> Result<(), String> {
    match params.get("user_id") {
        Some(v) if v.is_u64() => Ok(()),
        Some(_) => Err("user_id must be a non-negative integer".to_string()),
        None => Err("missing required field user_id".to_string()),
    }
}

fn validate_ban_params(params: &serde_json::Value) -> Result<(), String> {
    validate_user_id(params)
}

fn validate_kick_params(params: &serde_json::Value) -> Result<(), String> {
    validate_user_id(params)
}

/// `duration` is a non-negative number of milliseconds.
fn validate_mute_params(params: &serde_json::Value) -> Result<(), String> {
    validate_user_id(params)?;
    match params.get("duration") {
        Some(v) if v.as_u64().is_some() => Ok(()),
        Some(_) => Err("duration must be a non-negative integer number of milliseconds".to_string()),
        None => Err("missing required field duration".to_string()),
    }
}

/// Registers `ban`/`mute`/`kick` against [`Platform::Discord`].
///
/// `ban` and `kick` default to requiring operator approval; `mute` defaults
/// to auto-execute. A deployment's configured allowed-action list may still
/// be narrower than this set -- the registry only says what a Discord action
/// *can* look like, not what a given deployment permits.
pub fn register(registry: &mut ActionRegistry) {
    registry.register(Platform::Discord, ActionDefinition::new(BAN, true, validate_ban_params));
    registry.register(Platform::Discord, ActionDefinition::new(MUTE, false, validate_mute_params));
    registry.register(Platform::Discord, ActionDefinition::new(KICK, true, validate_kick_params));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ActionRegistry {
        let mut r = ActionRegistry::new();
        register(&mut r);
        r
    }

    #[test]
    fn ban_requires_approval_by_default() {
        let r = registry();
        let requires_approval = r
            .validate(Platform::Discord, BAN, &serde_json::json!({"user_id": 42}))
            .unwrap();
        assert!(requires_approval);
    }

    #[test]
    fn mute_auto_executes_with_valid_duration() {
        let r = registry();
        let requires_approval = r
            .validate(Platform::Discord, MUTE, &serde_json::json!({"user_id": 42, "duration": 60000}))
            .unwrap();
        assert!(!requires_approval);
    }

    #[test]
    fn mute_without_duration_is_rejected() {
        let r = registry();
        let err = r.validate(Platform::Discord, MUTE, &serde_json::json!({"user_id": 42})).unwrap_err();
        assert!(matches!(err, warden_core::RegistryError::InvalidParams { .. }));
    }

    #[test]
    fn kick_requires_user_id() {
        let r = registry();
        let err = r.validate(Platform::Discord, KICK, &serde_json::json!({})).unwrap_err();
        assert!(matches!(err, warden_core::RegistryError::InvalidParams { .. }));
    }
}

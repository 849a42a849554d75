//! Per-deployment Discord configuration: bot token and guild/channel allow-lists.

/// Connection and scoping config for one deployment's Discord adapter: a single
/// guild plus a channel allow-list, with an empty `allowed_channel_ids` meaning
/// every channel in the guild is in scope.
#[derive(Debug, Clone)]
pub struct DiscordConfig {
    pub token: String,
    pub guild_id: u64,
    /// Empty means every channel in the guild is in scope.
    pub allowed_channel_ids: Vec<u64>,
}

impl DiscordConfig {
    pub fn new(token: impl Into<String>, guild_id: u64) -> Self {
        Self {
            token: token.into(),
            guild_id,
            allowed_channel_ids: Vec::new(),
        }
    }

    pub fn with_channels(mut self, allowed_channel_ids: Vec<u64>) -> Self {
        self.allowed_channel_ids = allowed_channel_ids;
        self
    }

    pub fn is_channel_allowed(&self, channel_id: u64) -> bool {
        self.allowed_channel_ids.is_empty() || self.allowed_channel_ids.contains(&channel_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_allowlist_allows_every_channel() {
        let cfg = DiscordConfig::new("tok", 1);
        assert!(cfg.is_channel_allowed(999));
    }

    #[test]
    fn nonempty_allowlist_restricts_to_listed_channels() {
        let cfg = DiscordConfig::new("tok", 1).with_channels(vec![42, 43]);
        assert!(cfg.is_channel_allowed(42));
        assert!(!cfg.is_channel_allowed(44));
    }
}

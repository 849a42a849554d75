//! HTTP-side action effector: ban/mute(timeout)/kick against the Discord REST API.
//!
//! Fetches the guild/member, runs the action, and collapses Discord's HTTP error
//! shapes into [`DiscordError`], which is then widened into [`DispatchError`] at the
//! `ActionEffector` boundary.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serenity::http::Http;
use serenity::model::id::{GuildId, UserId};
use warden_engine::error::DispatchError;
use warden_engine::ActionEffector as ActionEffectorTrait;

use crate::actions::{BAN, KICK, MUTE};
use crate::error::DiscordError;

pub struct DiscordEffector {
    http: Arc<Http>,
    guild_id: u64,
}

impl DiscordEffector {
    pub fn new(token: &str, guild_id: u64) -> Self {
        Self {
            http: Arc::new(Http::new(token)),
            guild_id,
        }
    }

    async fn fetch_member(&self, user_id: u64) -> Result<serenity::model::guild::Member, DiscordError> {
        GuildId::new(self.guild_id)
            .member(&self.http, UserId::new(user_id))
            .await
            .map_err(DiscordError::from)
    }

    fn reason(params: &serde_json::Value) -> String {
        params
            .get("reason")
            .and_then(|v| v.as_str())
            .unwrap_or("moderation action")
            .to_string()
    }

    fn user_id(params: &serde_json::Value) -> Result<u64, DiscordError> {
        params
            .get("user_id")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| DiscordError::Transport("params missing user_id".to_string()))
    }

    async fn ban(&self, params: &serde_json::Value) -> Result<(), DiscordError> {
        let user_id = Self::user_id(params)?;
        let reason = Self::reason(params);
        GuildId::new(self.guild_id)
            .ban_with_reason(&self.http, UserId::new(user_id), 0, &reason)
            .await?;
        tracing::info!(guild_id = self.guild_id, user_id, "banned member");
        Ok(())
    }

    async fn mute(&self, params: &serde_json::Value) -> Result<(), DiscordError> {
        let user_id = Self::user_id(params)?;
        let reason = Self::reason(params);
        let duration_ms = params
            .get("duration")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| DiscordError::Transport("params missing duration".to_string()))?;

        let member = self.fetch_member(user_id).await?;
        let until = serenity::model::timestamp::Timestamp::from_unix_timestamp(
            time_now_unix_seconds() + (Duration::from_millis(duration_ms).as_secs() as i64),
        )
        .map_err(|e| DiscordError::Transport(e.to_string()))?;

        member
            .disable_communication_until_datetime(&self.http, until)
            .await?;
        let _ = reason; // serenity's timeout endpoint carries no audit-log reason parameter.
        tracing::info!(guild_id = self.guild_id, user_id, duration_ms, "muted member");
        Ok(())
    }

    async fn kick(&self, params: &serde_json::Value) -> Result<(), DiscordError> {
        let user_id = Self::user_id(params)?;
        let reason = Self::reason(params);
        let member = self.fetch_member(user_id).await?;
        member.kick_with_reason(&self.http, &reason).await?;
        tracing::info!(guild_id = self.guild_id, user_id, "kicked member");
        Ok(())
    }
}

/// Wall-clock seconds since the epoch. A thin seam so tests never have to construct
/// a real timestamp path through the network client.
fn time_now_unix_seconds() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[async_trait]
impl ActionEffectorTrait for DiscordEffector {
    async fn execute(
        &self,
        action_type: &str,
        params: &serde_json::Value,
        _context: &serde_json::Value,
    ) -> Result<(), DispatchError> {
        let outcome = match action_type {
            BAN => self.ban(params).await,
            MUTE => self.mute(params).await,
            KICK => self.kick(params).await,
            other => return Err(DispatchError::Internal(format!("unsupported discord action {other}"))),
        };
        outcome.map_err(DispatchError::from)
    }
}

//! Discord gateway listener: connects via serenity and forwards in-scope messages
//! as [`MessageContext`] values through an internal channel.
//!
//! An inline `EventHandler` feeds an `mpsc::Sender`; the `MessageStream` impl pulls
//! from the matching `Receiver`.

use serenity::all::ClientBuilder;
use serenity::model::channel::Message;
use serenity::model::gateway::Ready;
use serenity::prelude::*;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use warden_core::Platform;
use warden_engine::MessageContext;

use crate::config::DiscordConfig;
use crate::error::DiscordError;

struct Handler {
    tx: mpsc::Sender<MessageContext>,
    guild_id: u64,
    allowed_channel_ids: Vec<u64>,
}

#[serenity::async_trait]
impl EventHandler for Handler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        tracing::info!(bot = %ready.user.name, "discord gateway connected");
    }

    async fn message(&self, _ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }
        if msg.guild_id.map(|id| id.get()) != Some(self.guild_id) {
            return;
        }
        if !self.allowed_channel_ids.is_empty() && !self.allowed_channel_ids.contains(&msg.channel_id.get()) {
            return;
        }

        let routing = serde_json::json!({
            "guild_id": self.guild_id,
            "channel_id": msg.channel_id.get(),
            "user_id": msg.author.id.get(),
        });
        let ctx = MessageContext {
            platform: Platform::Discord,
            content: msg.content.clone(),
            routing,
        };
        if self.tx.send(ctx).await.is_err() {
            tracing::warn!("discord message stream receiver dropped, discarding message");
        }
    }
}

/// A [`warden_engine::MessageStream`] backed by a live Discord gateway connection.
///
/// Owns the gateway client's background task; dropping the stream does not itself
/// stop the gateway connection (the task keeps the shard alive independently), so
/// callers that need an orderly shutdown should also cancel their own run loop.
pub struct DiscordMessageStream {
    rx: mpsc::Receiver<MessageContext>,
    gateway: JoinHandle<()>,
}

impl DiscordMessageStream {
    /// Builds the serenity client and spawns its gateway connection, buffering
    /// in-scope messages for [`recv`](warden_engine::MessageStream::recv) to drain.
    pub async fn connect(config: DiscordConfig) -> Result<Self, DiscordError> {
        let (tx, rx) = mpsc::channel(256);

        let intents = GatewayIntents::GUILD_MESSAGES | GatewayIntents::DIRECT_MESSAGES | GatewayIntents::MESSAGE_CONTENT;
        let mut client = ClientBuilder::new(&config.token, intents)
            .event_handler(Handler {
                tx,
                guild_id: config.guild_id,
                allowed_channel_ids: config.allowed_channel_ids.clone(),
            })
            .await
            .map_err(|e| DiscordError::Gateway(e.to_string()))?;

        let gateway = tokio::spawn(async move {
            if let Err(e) = client.start().await {
                tracing::error!(error = %e, "discord gateway exited with error");
            }
        });

        Ok(Self { rx, gateway })
    }
}

impl Drop for DiscordMessageStream {
    fn drop(&mut self) {
        self.gateway.abort();
    }
}

#[async_trait::async_trait]
impl warden_engine::MessageStream for DiscordMessageStream {
    async fn recv(&mut self) -> Option<MessageContext> {
        self.rx.recv().await
    }
}

//! Per-deployment worker process: the controller spawns one of these per `start`
//! event and tears it down on `stop`.
//!
//! Takes the same `{deployment_id, moderator_id, platform, conf}` shape as a `start`
//! event on the deployment-events bus, passed as a single JSON positional argument
//! (see `warden-controller`), so the controller never needs a second wire format for
//! "spawn this worker" versus "this is the event that told me to."

use std::sync::Arc;

use clap::Parser;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use warden_core::{ActionRegistry, Platform};
use warden_engine::dispatcher::ActionEffector;
use warden_engine::embed::{embedder, init_embedder, HttpEmbedder};
use warden_engine::llm::{HttpLlmClient, LlmClient};
use warden_engine::moderator::{MessageStream, ModeratorConfig, ModeratorHandles, PerDeploymentModerator};
use warden_engine::pipeline::Policy;
use warden_engine::retry::RetryPolicy;
use warden_protocol::DeploymentEvent;
use warden_store::Store;

#[derive(Parser, Debug)]
#[command(name = "warden-worker")]
#[command(about = "Runs one deployment's moderation loop until stopped")]
struct Args {
    /// JSON-encoded `start` deployment event: {type, deployment_id, moderator_id, platform, conf}
    event: String,
}

/// The Discord-specific shape `conf` carries: guild, channel allow-list, and the
/// deployment's allowed action types.
#[derive(Debug, Deserialize)]
struct DiscordConf {
    guild_id: u64,
    #[serde(default)]
    allowed_channel_ids: Vec<u64>,
    #[serde(default)]
    allowed_action_types: Vec<String>,
}

/// The platform-specific pieces a deployment needs: its registry entries, message
/// stream, action effector and allowed action list. One supported platform today;
/// the match on `Platform` is where a second platform would add an arm.
async fn build_platform(
    platform: Platform,
    conf: serde_json::Value,
    discord_bot_token: &str,
    registry: &mut ActionRegistry,
) -> Result<(Box<dyn MessageStream>, Arc<dyn ActionEffector>, Vec<String>), Box<dyn std::error::Error>> {
    match platform {
        Platform::Discord => {
            warden_discord::register_actions(registry);
            let discord_conf: DiscordConf = serde_json::from_value(conf)?;
            let stream_config = warden_discord::DiscordConfig::new(discord_bot_token, discord_conf.guild_id)
                .with_channels(discord_conf.allowed_channel_ids);
            let stream = warden_discord::DiscordMessageStream::connect(stream_config).await?;
            let effector = Arc::new(warden_discord::DiscordEffector::new(discord_bot_token, discord_conf.guild_id));
            Ok((Box::new(stream), effector, discord_conf.allowed_action_types))
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _tracing_guard = warden_config::tracing_init::init("warden-worker", None);

    let args = Args::parse();
    let event = DeploymentEvent::from_slice(args.event.as_bytes())?;
    let (deployment_id, moderator_id, platform, conf) = match event {
        DeploymentEvent::Start { deployment_id, moderator_id, platform, conf } => {
            (deployment_id, moderator_id, platform, conf)
        }
        DeploymentEvent::Stop { .. } => {
            return Err("warden-worker expects a start event, got a stop event".into());
        }
    };

    warden_config::load_and_apply("warden", None).ok();
    let engine_cfg = warden_config::EngineConfig::from_env();

    let store = Arc::new(Store::new(&engine_cfg.sqlite_db_path, engine_cfg.embedding_dimension)?);
    let moderator_row = store.get_moderator(moderator_id).await?;
    let guideline = store.get_guideline(moderator_row.guideline_id).await?;
    let policy = Policy {
        guidelines: guideline.body,
        topics: guideline.topics,
    };

    let llm: Arc<dyn LlmClient> = Arc::new(HttpLlmClient::new(
        engine_cfg.llm_base_url.clone(),
        engine_cfg.llm_api_key.clone(),
        engine_cfg.llm_model.clone(),
    ));
    init_embedder(Arc::new(HttpEmbedder::new(
        engine_cfg.llm_base_url.clone(),
        engine_cfg.llm_api_key.clone(),
        "text-embedding-3-small".to_string(),
        engine_cfg.embedding_dimension,
    )));

    let mut registry = ActionRegistry::new();
    let (stream, effector, allowed_action_types) =
        build_platform(platform, conf, &engine_cfg.discord_bot_token, &mut registry).await?;
    let registry = Arc::new(registry);

    let handles = ModeratorHandles {
        store: store.clone(),
        llm,
        embedder: embedder(),
        registry,
        effector,
    };

    let moderator_config = ModeratorConfig {
        moderator_id,
        deployment_id,
        platform,
        policy,
        allowed_action_types,
        task_pool_size: Some(engine_cfg.task_pool_size),
        similarity_distance_threshold: engine_cfg.similarity_distance_threshold,
        validator_max_attempts: engine_cfg.retry_max_attempts,
        retry_policy: RetryPolicy::new(engine_cfg.retry_max_attempts, engine_cfg.retry_base_delay, 2.0),
    };

    let worker = PerDeploymentModerator::new(handles, moderator_config);
    install_signal_handler(worker.shutdown_handle());

    worker.run(stream).await?;
    Ok(())
}

/// Forwards SIGTERM/ctrl-c into the moderator's cancellation token so the controller's
/// `SIGTERM`-then-timeout-then-`SIGKILL` shutdown sequence (see `warden-controller`)
/// drains in-flight work instead of killing the process outright.
fn install_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                return;
            }
        };
        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("received SIGTERM, requesting shutdown");
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received ctrl-c, requesting shutdown");
            }
        }
        shutdown.cancel();
    });
}


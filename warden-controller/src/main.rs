//! Deployment lifecycle controller: consumes `start`/`stop` events from the
//! deployment-events bus topic and spawns/stops one `warden-worker` process per
//! live deployment.
//!
//! Consumes with `latest` offset reset (a controller that was down missed events
//! are not replayed; a deployment whose `start` was missed simply stays offline
//! until a new `start` arrives) and at-least-once delivery -- a duplicate `start`
//! is made a no-op by the CAS on `DeploymentState::Offline` below, not by bus-level
//! deduplication.

mod workers;

use std::path::PathBuf;
use std::time::Duration;

use futures::StreamExt;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::Message;
use warden_core::DeploymentState;
use warden_protocol::DeploymentEvent;
use warden_store::Store;
use workers::WorkerTable;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _tracing_guard = warden_config::tracing_init::init("warden-controller", None);

    warden_config::load_and_apply("warden", None).ok();
    let engine_cfg = warden_config::EngineConfig::from_env();

    let store = std::sync::Arc::new(Store::new(&engine_cfg.sqlite_db_path, engine_cfg.embedding_dimension)?);
    let worker_bin = worker_binary_path()?;

    let consumer: StreamConsumer = ClientConfig::new()
        .set("bootstrap.servers", &engine_cfg.bus_bootstrap_servers)
        .set("group.id", "warden-controller")
        .set("auto.offset.reset", "latest")
        .set("enable.auto.commit", "true")
        .create()?;
    consumer.subscribe(&[engine_cfg.bus_deployment_events_topic.as_str()])?;

    tracing::info!(topic = %engine_cfg.bus_deployment_events_topic, "controller listening for deployment events");

    let mut table = WorkerTable::new();
    let mut stream = consumer.stream();
    let mut reap_tick = tokio::time::interval(Duration::from_secs(2));
    loop {
        tokio::select! {
            message = stream.next() => {
                let Some(message) = message else { break };
                let message = match message {
                    Ok(m) => m,
                    Err(e) => {
                        tracing::warn!(error = %e, "kafka consumer error, continuing");
                        continue;
                    }
                };
                let Some(payload) = message.payload() else {
                    tracing::warn!("deployment event with empty payload, dropping");
                    continue;
                };
                let event = match DeploymentEvent::from_slice(payload) {
                    Ok(e) => e,
                    Err(e) => {
                        tracing::warn!(error = %e, "malformed deployment event, dropping");
                        continue;
                    }
                };

                handle_event(event, &store, &worker_bin, &mut table, engine_cfg.controller_join_timeout).await;
            }
            _ = reap_tick.tick() => {
                reap_crashed_workers(&store, &mut table).await;
            }
        }
    }

    Ok(())
}

/// A worker that exits on its own (crash, `kill -9` from outside the controller)
/// never reaches its own `Online -> Offline` transition. Polling the table here is
/// what makes "a deployment that exits is considered stopped until re-requested by a
/// `start` event" true: without it, the deployment's persisted state would stay
/// `Online`/`Pending` forever and the CAS in `handle_event` would reject every future
/// `start` as a false duplicate.
async fn reap_crashed_workers(store: &std::sync::Arc<Store>, table: &mut WorkerTable) {
    for deployment_id in table.reap_exited() {
        tracing::warn!(%deployment_id, "worker exited without a stop event, forcing deployment offline");
        for from in [DeploymentState::Online, DeploymentState::Pending] {
            if let Ok(true) = store.cas_deployment_state(deployment_id, from, DeploymentState::Offline).await {
                break;
            }
        }
    }
}

async fn handle_event(
    event: DeploymentEvent,
    store: &std::sync::Arc<Store>,
    worker_bin: &str,
    table: &mut WorkerTable,
    join_timeout: Duration,
) {
    match event {
        DeploymentEvent::Start { deployment_id, moderator_id, platform, conf } => {
            let reserved = match store
                .cas_deployment_state(deployment_id, DeploymentState::Offline, DeploymentState::Pending)
                .await
            {
                Ok(changed) => changed,
                Err(e) => {
                    tracing::error!(%deployment_id, error = %e, "failed to check deployment state, dropping start");
                    return;
                }
            };
            if !reserved {
                tracing::info!(%deployment_id, "start event for a deployment that is not offline, ignoring as duplicate");
                return;
            }

            let start_event = DeploymentEvent::Start { deployment_id, moderator_id, platform, conf };
            let event_json = start_event.to_value().to_string();
            if let Err(e) = table.spawn(worker_bin, deployment_id, &[event_json.as_str()]) {
                tracing::error!(%deployment_id, error = %e, "failed to spawn worker");
                let _ = store
                    .cas_deployment_state(deployment_id, DeploymentState::Pending, DeploymentState::Offline)
                    .await;
                return;
            }
            tracing::info!(%deployment_id, "spawned worker");
        }
        DeploymentEvent::Stop { deployment_id } => {
            if !table.is_running(deployment_id) {
                tracing::info!(%deployment_id, "stop event for a deployment this controller is not tracking, ignoring");
                return;
            }
            if let Err(e) = table.stop(deployment_id, join_timeout).await {
                tracing::error!(%deployment_id, error = %e, "failed to stop worker");
            }
        }
    }
}

/// The worker binary lives next to this one in the same build output directory.
fn worker_binary_path() -> Result<String, Box<dyn std::error::Error>> {
    let mut path: PathBuf = std::env::current_exe()?;
    path.pop();
    path.push("warden-worker");
    Ok(path.to_string_lossy().into_owned())
}


#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;
    use warden_core::Platform;

    fn store() -> (std::sync::Arc<Store>, NamedTempFile) {
        let file = NamedTempFile::new().unwrap();
        (std::sync::Arc::new(Store::new(file.path(), 4).unwrap()), file)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn start_on_offline_deployment_reserves_and_spawns() {
        let (store, _file) = store();
        let deployment_id = insert_offline_deployment(&store).await;
        let mut table = WorkerTable::new();

        let event = DeploymentEvent::Start {
            deployment_id,
            moderator_id: uuid::Uuid::new_v4(),
            platform: Platform::Discord,
            conf: serde_json::json!({}),
        };
        handle_event(event, &store, "true", &mut table, Duration::from_secs(1)).await;

        assert!(table.is_running(deployment_id));
        let deployment = store.get_deployment(deployment_id).await.unwrap();
        assert_eq!(deployment.state, DeploymentState::Pending);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn duplicate_start_on_pending_deployment_is_a_noop() {
        let (store, _file) = store();
        let deployment_id = insert_offline_deployment(&store).await;
        store
            .cas_deployment_state(deployment_id, DeploymentState::Offline, DeploymentState::Pending)
            .await
            .unwrap();
        let mut table = WorkerTable::new();

        let event = DeploymentEvent::Start {
            deployment_id,
            moderator_id: uuid::Uuid::new_v4(),
            platform: Platform::Discord,
            conf: serde_json::json!({}),
        };
        handle_event(event, &store, "true", &mut table, Duration::from_secs(1)).await;

        assert!(!table.is_running(deployment_id));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stop_for_untracked_deployment_is_a_noop() {
        let (store, _file) = store();
        let mut table = WorkerTable::new();
        handle_event(
            DeploymentEvent::Stop { deployment_id: uuid::Uuid::new_v4() },
            &store,
            "true",
            &mut table,
            Duration::from_secs(1),
        )
        .await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn reap_forces_a_crashed_worker_deployment_back_offline() {
        let (store, _file) = store();
        let deployment_id = insert_offline_deployment(&store).await;
        store
            .cas_deployment_state(deployment_id, DeploymentState::Offline, DeploymentState::Pending)
            .await
            .unwrap();
        store
            .cas_deployment_state(deployment_id, DeploymentState::Pending, DeploymentState::Online)
            .await
            .unwrap();

        let mut table = WorkerTable::new();
        table.spawn("true", deployment_id, &[]).unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        reap_crashed_workers(&store, &mut table).await;

        assert!(!table.is_running(deployment_id));
        let deployment = store.get_deployment(deployment_id).await.unwrap();
        assert_eq!(deployment.state, DeploymentState::Offline);
    }

    async fn insert_offline_deployment(store: &Store) -> uuid::Uuid {
        let owner = store.insert_user("owner", "hash").await.unwrap();
        let guideline_id = store
            .insert_guideline(owner, "g", "body", &["topic".to_string()])
            .await
            .unwrap();
        let moderator_id = store.insert_moderator(owner, "mod", guideline_id).await.unwrap();
        store
            .insert_deployment(moderator_id, Platform::Discord, "dep", serde_json::json!({}))
            .await
            .unwrap()
    }
}

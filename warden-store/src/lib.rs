//! SQLite-backed persistence layer for the moderation engine: relational CRUD for the
//! entity model, plus an embedded vector similarity index (`sqlite-vec`) over message
//! evaluations.

mod error;
mod schema;
mod store;

pub use error::StoreError;
pub use store::{Neighbor, NewEvaluation, Store};

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;
    use warden_core::{ActionStatus, DeploymentState, Platform};

    async fn test_store() -> (Store, tempfile::NamedTempFile) {
        let file = tempfile::NamedTempFile::new().unwrap();
        let store = Store::new(file.path(), 4).unwrap();
        (store, file)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn insert_and_get_guideline_round_trips() {
        let (store, _file) = test_store().await;
        let owner = Uuid::new_v4();
        let topics = vec!["spam".to_string(), "respect".to_string()];
        let id = store
            .insert_guideline(owner, "policy", "be nice", &topics)
            .await
            .unwrap();
        let g = store.get_guideline(id).await.unwrap();
        assert_eq!(g.name, "policy");
        assert_eq!(g.topics, topics);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn get_guideline_missing_is_not_found() {
        let (store, _file) = test_store().await;
        let err = store.get_guideline(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn deployment_cas_state_transition_succeeds_once() {
        let (store, _file) = test_store().await;
        let owner = Uuid::new_v4();
        let guideline_id = store.insert_guideline(owner, "g", "body", &[]).await.unwrap();
        let moderator_id = store.insert_moderator(owner, "m", guideline_id).await.unwrap();
        let deployment_id = store
            .insert_deployment(moderator_id, Platform::Discord, "d", serde_json::json!({}))
            .await
            .unwrap();

        let ok = store
            .cas_deployment_state(deployment_id, DeploymentState::Offline, DeploymentState::Pending)
            .await
            .unwrap();
        assert!(ok);

        // Second attempt from Offline fails: state has already moved to Pending.
        let repeated = store
            .cas_deployment_state(deployment_id, DeploymentState::Offline, DeploymentState::Pending)
            .await
            .unwrap();
        assert!(!repeated);

        let d = store.get_deployment(deployment_id).await.unwrap();
        assert_eq!(d.state, DeploymentState::Pending);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn action_log_double_approve_only_transitions_once() {
        let (store, _file) = test_store().await;
        let moderator_id = Uuid::new_v4();
        let deployment_id = Uuid::new_v4();
        let log_id = store
            .insert_action_log(
                moderator_id,
                deployment_id,
                "ban",
                serde_json::json!({"user_id": 1}),
                serde_json::json!({}),
                ActionStatus::AwaitingApproval,
            )
            .await
            .unwrap();

        let first = store
            .cas_action_status(log_id, ActionStatus::AwaitingApproval, ActionStatus::Approved)
            .await
            .unwrap();
        assert!(first);

        let second = store
            .cas_action_status(log_id, ActionStatus::AwaitingApproval, ActionStatus::Approved)
            .await
            .unwrap();
        assert!(!second);

        let log = store.get_action_log(log_id).await.unwrap();
        assert_eq!(log.status, ActionStatus::Approved);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn insert_message_and_evaluations_requires_at_least_one_evaluation() {
        let (store, _file) = test_store().await;
        let err = store
            .insert_message_and_evaluations(
                Uuid::new_v4(),
                Uuid::new_v4(),
                Platform::Discord,
                "hi",
                vec![],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Storage(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn nearest_finds_neighbor_within_distance_and_topic() {
        let (store, _file) = test_store().await;
        let moderator_id = Uuid::new_v4();
        let deployment_id = Uuid::new_v4();
        store
            .insert_message_and_evaluations(
                moderator_id,
                deployment_id,
                Platform::Discord,
                "you're an idiot",
                vec![NewEvaluation {
                    topic: "harassment".to_string(),
                    topic_score: 0.9,
                    embedding: vec![1.0, 0.0, 0.0, 0.0],
                }],
            )
            .await
            .unwrap();

        let neighbors = store
            .nearest(&[1.0, 0.0, 0.0, 0.0], &["harassment".to_string()], 0.5)
            .await
            .unwrap();
        assert_eq!(neighbors.len(), 1);
        assert_eq!(neighbors[0].topic, "harassment");
        assert!(neighbors[0].distance < 0.5);

        // A topic outside the requested set is filtered out even if it's the nearest point.
        let filtered = store
            .nearest(&[1.0, 0.0, 0.0, 0.0], &["spam".to_string()], 0.5)
            .await
            .unwrap();
        assert!(filtered.is_empty());
    }
}

//! SQLite-backed persistence: relational CRUD for the entity model plus the similarity
//! lookup backing the embedding/similarity store component.
//!
//! All calls wrap the blocking `rusqlite` connection with [`tokio::task::block_in_place`]
//! so the async worker loop never blocks its reactor on disk I/O.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::params;
use uuid::Uuid;
use warden_core::{
    ActionLog, ActionStatus, Deployment, DeploymentState, Guideline, Message, MessageEvaluation,
    Moderator, Platform,
};

use crate::error::StoreError;
use crate::schema::{self, VEC_TABLE};

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn millis_to_datetime(ms: i64) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::from_timestamp_millis(ms).unwrap_or_else(chrono::Utc::now)
}

fn platform_to_str(p: Platform) -> &'static str {
    match p {
        Platform::Discord => "discord",
    }
}

fn platform_from_str(s: &str) -> Result<Platform, StoreError> {
    match s {
        "discord" => Ok(Platform::Discord),
        other => Err(StoreError::Storage(format!("unknown platform: {other}"))),
    }
}

fn state_to_str(s: DeploymentState) -> &'static str {
    match s {
        DeploymentState::Offline => "offline",
        DeploymentState::Pending => "pending",
        DeploymentState::Online => "online",
    }
}

fn state_from_str(s: &str) -> Result<DeploymentState, StoreError> {
    match s {
        "offline" => Ok(DeploymentState::Offline),
        "pending" => Ok(DeploymentState::Pending),
        "online" => Ok(DeploymentState::Online),
        other => Err(StoreError::Storage(format!("unknown deployment state: {other}"))),
    }
}

fn status_to_str(s: ActionStatus) -> &'static str {
    match s {
        ActionStatus::Pending => "pending",
        ActionStatus::AwaitingApproval => "awaiting_approval",
        ActionStatus::Approved => "approved",
        ActionStatus::Declined => "declined",
        ActionStatus::Success => "success",
        ActionStatus::Failed => "failed",
    }
}

fn status_from_str(s: &str) -> Result<ActionStatus, StoreError> {
    match s {
        "pending" => Ok(ActionStatus::Pending),
        "awaiting_approval" => Ok(ActionStatus::AwaitingApproval),
        "approved" => Ok(ActionStatus::Approved),
        "declined" => Ok(ActionStatus::Declined),
        "success" => Ok(ActionStatus::Success),
        "failed" => Ok(ActionStatus::Failed),
        other => Err(StoreError::Storage(format!("unknown action status: {other}"))),
    }
}

/// A neighbor found by [`Store::nearest`]: its topic, the L2 distance to the query
/// embedding, and the score it was originally persisted with.
#[derive(Debug, Clone)]
pub struct Neighbor {
    pub topic: String,
    pub distance: f64,
    pub score: f32,
}

/// One topic evaluation to persist alongside its message.
pub struct NewEvaluation {
    pub topic: String,
    pub topic_score: f32,
    pub embedding: Vec<f32>,
}

pub struct Store {
    conn: Arc<Mutex<rusqlite::Connection>>,
    dimension: usize,
}

impl Store {
    pub fn new(path: impl AsRef<Path>, dimension: usize) -> Result<Self, StoreError> {
        schema::register_sqlite_vec_once();
        let conn = rusqlite::Connection::open(path.as_ref())
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        schema::create_tables(&conn, dimension)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            dimension,
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, rusqlite::Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Storage("connection lock poisoned".into()))
    }

    // ---- Users -----------------------------------------------------------

    pub async fn insert_user(&self, username: &str, password_hash: &str) -> Result<Uuid, StoreError> {
        let id = Uuid::new_v4();
        let username = username.to_string();
        let password_hash = password_hash.to_string();
        let now = now_millis();
        let conn = self.conn.clone();
        tokio::task::block_in_place(move || {
            let conn = conn.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            conn.execute(
                "INSERT INTO users (user_id, username, password_hash, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![id.to_string(), username, password_hash, now],
            )
            .map_err(|e| StoreError::Storage(e.to_string()))?;
            Ok(id)
        })
    }

    // ---- Guidelines --------------------------------------------------------

    pub async fn insert_guideline(
        &self,
        owner_user_id: Uuid,
        name: &str,
        body: &str,
        topics: &[String],
    ) -> Result<Uuid, StoreError> {
        let id = Uuid::new_v4();
        let name = name.to_string();
        let body = body.to_string();
        let topics_json = serde_json::to_string(topics).map_err(|e| StoreError::Storage(e.to_string()))?;
        let now = now_millis();
        let conn = self.conn.clone();
        tokio::task::block_in_place(move || {
            let conn = conn.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            conn.execute(
                "INSERT INTO guidelines (guideline_id, owner_user_id, name, body, topics, created_at) VALUES (?1,?2,?3,?4,?5,?6)",
                params![id.to_string(), owner_user_id.to_string(), name, body, topics_json, now],
            )
            .map_err(|e| StoreError::Storage(e.to_string()))?;
            Ok(id)
        })
    }

    pub async fn get_guideline(&self, guideline_id: Uuid) -> Result<Guideline, StoreError> {
        let conn = self.conn.clone();
        tokio::task::block_in_place(move || {
            let conn = conn.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            conn.query_row(
                "SELECT guideline_id, owner_user_id, name, body, topics, created_at FROM guidelines WHERE guideline_id = ?1",
                params![guideline_id.to_string()],
                |row| {
                    let topics_json: String = row.get(4)?;
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        topics_json,
                        row.get::<_, i64>(5)?,
                    ))
                },
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    StoreError::NotFound(format!("guideline {guideline_id}"))
                }
                other => StoreError::Storage(other.to_string()),
            })
            .and_then(|(gid, owner, name, body, topics_json, created_at)| {
                let topics: Vec<String> =
                    serde_json::from_str(&topics_json).map_err(|e| StoreError::Storage(e.to_string()))?;
                Ok(Guideline {
                    guideline_id: gid.parse().map_err(|_| StoreError::Storage("bad uuid".into()))?,
                    owner_user_id: owner.parse().map_err(|_| StoreError::Storage("bad uuid".into()))?,
                    name,
                    body,
                    topics,
                    created_at: millis_to_datetime(created_at),
                })
            })
        })
    }

    // ---- Moderators --------------------------------------------------------

    pub async fn insert_moderator(
        &self,
        owner_user_id: Uuid,
        name: &str,
        guideline_id: Uuid,
    ) -> Result<Uuid, StoreError> {
        let id = Uuid::new_v4();
        let name = name.to_string();
        let now = now_millis();
        let conn = self.conn.clone();
        tokio::task::block_in_place(move || {
            let conn = conn.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            conn.execute(
                "INSERT INTO moderators (moderator_id, owner_user_id, name, guideline_id, created_at) VALUES (?1,?2,?3,?4,?5)",
                params![id.to_string(), owner_user_id.to_string(), name, guideline_id.to_string(), now],
            )
            .map_err(|e| StoreError::Storage(e.to_string()))?;
            Ok(id)
        })
    }

    pub async fn get_moderator(&self, moderator_id: Uuid) -> Result<Moderator, StoreError> {
        let conn = self.conn.clone();
        tokio::task::block_in_place(move || {
            let conn = conn.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            conn.query_row(
                "SELECT moderator_id, owner_user_id, name, guideline_id, created_at FROM moderators WHERE moderator_id = ?1",
                params![moderator_id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, i64>(4)?,
                    ))
                },
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    StoreError::NotFound(format!("moderator {moderator_id}"))
                }
                other => StoreError::Storage(other.to_string()),
            })
            .and_then(|(mid, owner, name, guideline_id, created_at)| {
                Ok(Moderator {
                    moderator_id: mid.parse().map_err(|_| StoreError::Storage("bad uuid".into()))?,
                    owner_user_id: owner.parse().map_err(|_| StoreError::Storage("bad uuid".into()))?,
                    name,
                    guideline_id: guideline_id.parse().map_err(|_| StoreError::Storage("bad uuid".into()))?,
                    created_at: millis_to_datetime(created_at),
                })
            })
        })
    }

    // ---- Deployments --------------------------------------------------------

    pub async fn insert_deployment(
        &self,
        moderator_id: Uuid,
        platform: Platform,
        name: &str,
        conf: serde_json::Value,
    ) -> Result<Uuid, StoreError> {
        let id = Uuid::new_v4();
        let name = name.to_string();
        let conf_str = conf.to_string();
        let now = now_millis();
        let conn = self.conn.clone();
        tokio::task::block_in_place(move || {
            let conn = conn.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            conn.execute(
                "INSERT INTO deployments (deployment_id, moderator_id, platform, name, conf, state, created_at) VALUES (?1,?2,?3,?4,?5,?6,?7)",
                params![
                    id.to_string(),
                    moderator_id.to_string(),
                    platform_to_str(platform),
                    name,
                    conf_str,
                    state_to_str(DeploymentState::Offline),
                    now
                ],
            )
            .map_err(|e| StoreError::Storage(e.to_string()))?;
            Ok(id)
        })
    }

    pub async fn get_deployment(&self, deployment_id: Uuid) -> Result<Deployment, StoreError> {
        let conn = self.conn.clone();
        tokio::task::block_in_place(move || {
            let conn = conn.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            conn.query_row(
                "SELECT deployment_id, moderator_id, platform, name, conf, state, created_at FROM deployments WHERE deployment_id = ?1",
                params![deployment_id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, i64>(6)?,
                    ))
                },
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    StoreError::NotFound(format!("deployment {deployment_id}"))
                }
                other => StoreError::Storage(other.to_string()),
            })
            .and_then(|(did, mid, platform, name, conf, state, created_at)| {
                Ok(Deployment {
                    deployment_id: did.parse().map_err(|_| StoreError::Storage("bad uuid".into()))?,
                    moderator_id: mid.parse().map_err(|_| StoreError::Storage("bad uuid".into()))?,
                    platform: platform_from_str(&platform)?,
                    name,
                    conf: serde_json::from_str(&conf).map_err(|e| StoreError::Storage(e.to_string()))?,
                    state: state_from_str(&state)?,
                    created_at: millis_to_datetime(created_at),
                })
            })
        })
    }

    /// Compare-and-swap the deployment's state. Returns whether the swap happened;
    /// `false` means the deployment's state was not `expected` (no-op, not an error).
    pub async fn cas_deployment_state(
        &self,
        deployment_id: Uuid,
        expected: DeploymentState,
        new_state: DeploymentState,
    ) -> Result<bool, StoreError> {
        let conn = self.conn.clone();
        tokio::task::block_in_place(move || {
            let conn = conn.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            let changed = conn
                .execute(
                    "UPDATE deployments SET state = ?1 WHERE deployment_id = ?2 AND state = ?3",
                    params![
                        state_to_str(new_state),
                        deployment_id.to_string(),
                        state_to_str(expected)
                    ],
                )
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            Ok(changed == 1)
        })
    }

    // ---- Action logs --------------------------------------------------------

    pub async fn insert_action_log(
        &self,
        moderator_id: Uuid,
        deployment_id: Uuid,
        action_type: &str,
        action_params: serde_json::Value,
        context: serde_json::Value,
        status: ActionStatus,
    ) -> Result<Uuid, StoreError> {
        let id = Uuid::new_v4();
        let action_type = action_type.to_string();
        let params_str = action_params.to_string();
        let context_str = context.to_string();
        let now = now_millis();
        let conn = self.conn.clone();
        tokio::task::block_in_place(move || {
            let conn = conn.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            conn.execute(
                "INSERT INTO action_logs (log_id, moderator_id, deployment_id, action_type, action_params, context, status, created_at) VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
                params![
                    id.to_string(),
                    moderator_id.to_string(),
                    deployment_id.to_string(),
                    action_type,
                    params_str,
                    context_str,
                    status_to_str(status),
                    now
                ],
            )
            .map_err(|e| StoreError::Storage(e.to_string()))?;
            Ok(id)
        })
    }

    pub async fn get_action_log(&self, log_id: Uuid) -> Result<ActionLog, StoreError> {
        let conn = self.conn.clone();
        tokio::task::block_in_place(move || {
            let conn = conn.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            conn.query_row(
                "SELECT log_id, moderator_id, deployment_id, action_type, action_params, context, status, created_at FROM action_logs WHERE log_id = ?1",
                params![log_id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, i64>(7)?,
                    ))
                },
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(format!("action log {log_id}")),
                other => StoreError::Storage(other.to_string()),
            })
            .and_then(|(lid, mid, did, action_type, params, context, status, created_at)| {
                Ok(ActionLog {
                    log_id: lid.parse().map_err(|_| StoreError::Storage("bad uuid".into()))?,
                    moderator_id: mid.parse().map_err(|_| StoreError::Storage("bad uuid".into()))?,
                    deployment_id: did.parse().map_err(|_| StoreError::Storage("bad uuid".into()))?,
                    action_type,
                    action_params: serde_json::from_str(&params).map_err(|e| StoreError::Storage(e.to_string()))?,
                    context: serde_json::from_str(&context).map_err(|e| StoreError::Storage(e.to_string()))?,
                    status: status_from_str(&status)?,
                    created_at: millis_to_datetime(created_at),
                })
            })
        })
    }

    /// Compare-and-swap an action log's status. Guards the AWAITING_APPROVAL -> APPROVED
    /// transition against a double approval racing the same log.
    pub async fn cas_action_status(
        &self,
        log_id: Uuid,
        expected: ActionStatus,
        new_status: ActionStatus,
    ) -> Result<bool, StoreError> {
        let conn = self.conn.clone();
        tokio::task::block_in_place(move || {
            let conn = conn.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            let changed = conn
                .execute(
                    "UPDATE action_logs SET status = ?1 WHERE log_id = ?2 AND status = ?3",
                    params![status_to_str(new_status), log_id.to_string(), status_to_str(expected)],
                )
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            Ok(changed == 1)
        })
    }

    // ---- Messages + evaluations ---------------------------------------------

    /// Inserts a message and its per-topic evaluations (with embeddings) in a single
    /// transaction: a message row exists iff at least one evaluation row exists for it.
    /// `topic_score` is rounded to two decimals at persistence; callers keep comparing
    /// the full-precision value in memory.
    pub async fn insert_message_and_evaluations(
        &self,
        moderator_id: Uuid,
        deployment_id: Uuid,
        platform: Platform,
        content: &str,
        evaluations: Vec<NewEvaluation>,
    ) -> Result<Uuid, StoreError> {
        if evaluations.is_empty() {
            return Err(StoreError::Storage(
                "insert_message_and_evaluations requires at least one evaluation".into(),
            ));
        }
        let dimension = self.dimension;
        let message_id = Uuid::new_v4();
        let content = content.to_string();
        let now = now_millis();
        let conn = self.conn.clone();
        tokio::task::block_in_place(move || {
            let mut conn = conn.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            let tx = conn.transaction().map_err(|e| StoreError::Storage(e.to_string()))?;
            tx.execute(
                "INSERT INTO messages (message_id, moderator_id, deployment_id, platform, content, created_at) VALUES (?1,?2,?3,?4,?5,?6)",
                params![
                    message_id.to_string(),
                    moderator_id.to_string(),
                    deployment_id.to_string(),
                    platform_to_str(platform),
                    content,
                    now
                ],
            )
            .map_err(|e| StoreError::Storage(e.to_string()))?;

            for eval in &evaluations {
                if eval.embedding.len() != dimension {
                    return Err(StoreError::Storage(format!(
                        "embedding dimension {} != expected {}",
                        eval.embedding.len(),
                        dimension
                    )));
                }
                let evaluation_id = Uuid::new_v4();
                let persisted_score = (eval.topic_score * 100.0).round() / 100.0;
                tx.execute(
                    "INSERT INTO message_evaluations (evaluation_id, message_id, topic, topic_score, created_at) VALUES (?1,?2,?3,?4,?5)",
                    params![evaluation_id.to_string(), message_id.to_string(), eval.topic, persisted_score, now],
                )
                .map_err(|e| StoreError::Storage(e.to_string()))?;
                let rowid = tx.last_insert_rowid();
                let vec_json = vector_to_json(&eval.embedding);
                tx.execute(
                    &format!("INSERT INTO {VEC_TABLE} (rowid, embedding) VALUES (?1, ?2)"),
                    params![rowid, vec_json],
                )
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            }

            tx.commit().map_err(|e| StoreError::Storage(e.to_string()))?;
            Ok(message_id)
        })
    }

    /// Finds prior evaluations whose embedding is within `max_distance` (L2) of `embedding`
    /// and whose topic is in `topics`. Distances below zero are treated as zero.
    pub async fn nearest(
        &self,
        embedding: &[f32],
        topics: &[String],
        max_distance: f64,
    ) -> Result<Vec<Neighbor>, StoreError> {
        if embedding.len() != self.dimension {
            return Err(StoreError::Storage(format!(
                "query embedding dimension {} != expected {}",
                embedding.len(),
                self.dimension
            )));
        }
        let vec_json = vector_to_json(embedding);
        let topics: std::collections::HashSet<String> = topics.iter().cloned().collect();
        let max_distance = max_distance.max(0.0);
        let conn = self.conn.clone();
        tokio::task::block_in_place(move || {
            let conn = conn.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            let knn_sql = format!(
                "SELECT rowid, distance FROM {VEC_TABLE} WHERE embedding MATCH ?1 AND k = ?2"
            );
            let mut stmt = conn.prepare(&knn_sql).map_err(|e| StoreError::Storage(e.to_string()))?;
            let rows = stmt
                .query_map(params![vec_json, 256i64], |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?))
                })
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            let candidates: Vec<(i64, f64)> =
                rows.collect::<Result<Vec<_>, _>>().map_err(|e| StoreError::Storage(e.to_string()))?;

            let mut neighbors = Vec::new();
            for (rowid, distance) in candidates {
                if distance >= max_distance {
                    continue;
                }
                let row = conn
                    .query_row(
                        "SELECT topic, topic_score FROM message_evaluations WHERE rowid = ?1",
                        params![rowid],
                        |r| Ok((r.get::<_, String>(0)?, r.get::<_, f32>(1)?)),
                    )
                    .map_err(|e| tracing::debug!(rowid, error = %e, "vec match rowid has no evaluation row, skipping"))
                    .ok();
                if let Some((topic, score)) = row {
                    if topics.contains(&topic) {
                        neighbors.push(Neighbor { topic, distance, score });
                    }
                }
            }
            Ok(neighbors)
        })
    }
}

fn vector_to_json(v: &[f32]) -> String {
    let parts: Vec<String> = v.iter().map(|f| f.to_string()).collect();
    format!("[{}]", parts.join(","))
}

//! Schema bootstrap: relational tables plus the `sqlite-vec` virtual table for
//! embeddings. The virtual table's column width is fixed to the configured embedding
//! dimension at `Store::new` time.

use std::sync::Once;

use crate::error::StoreError;

static SQLITE_VEC_INIT: Once = Once::new();

pub fn register_sqlite_vec_once() {
    SQLITE_VEC_INIT.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite_vec::sqlite3_vec_init as *const (),
        )));
    });
}

pub const VEC_TABLE: &str = "message_evaluation_vec";

pub fn create_tables(conn: &rusqlite::Connection, dimension: usize) -> Result<(), StoreError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            user_id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );
        CREATE TABLE IF NOT EXISTS guidelines (
            guideline_id TEXT PRIMARY KEY,
            owner_user_id TEXT NOT NULL,
            name TEXT NOT NULL,
            body TEXT NOT NULL,
            topics TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );
        CREATE TABLE IF NOT EXISTS moderators (
            moderator_id TEXT PRIMARY KEY,
            owner_user_id TEXT NOT NULL,
            name TEXT NOT NULL,
            guideline_id TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );
        CREATE TABLE IF NOT EXISTS deployments (
            deployment_id TEXT PRIMARY KEY,
            moderator_id TEXT NOT NULL,
            platform TEXT NOT NULL,
            name TEXT NOT NULL,
            conf TEXT NOT NULL,
            state TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );
        CREATE TABLE IF NOT EXISTS action_logs (
            log_id TEXT PRIMARY KEY,
            moderator_id TEXT NOT NULL,
            deployment_id TEXT NOT NULL,
            action_type TEXT NOT NULL,
            action_params TEXT NOT NULL,
            context TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );
        CREATE TABLE IF NOT EXISTS messages (
            message_id TEXT PRIMARY KEY,
            moderator_id TEXT NOT NULL,
            deployment_id TEXT NOT NULL,
            platform TEXT NOT NULL,
            content TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );
        CREATE TABLE IF NOT EXISTS message_evaluations (
            evaluation_id TEXT PRIMARY KEY,
            message_id TEXT NOT NULL,
            topic TEXT NOT NULL,
            topic_score REAL NOT NULL,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_message_evaluations_message_id
            ON message_evaluations(message_id);
        CREATE INDEX IF NOT EXISTS idx_message_evaluations_topic
            ON message_evaluations(topic);
        "#,
    )
    .map_err(|e| StoreError::Storage(e.to_string()))?;

    let create_vec_sql = format!(
        "CREATE VIRTUAL TABLE IF NOT EXISTS {VEC_TABLE} USING vec0(embedding float[{dimension}])",
    );
    conn.execute(&create_vec_sql, [])
        .map_err(|e| StoreError::Storage(e.to_string()))?;

    Ok(())
}

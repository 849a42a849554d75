//! Worker process table: tracks one spawned `warden-worker` child per live
//! deployment and implements the SIGTERM-then-timeout-then-SIGKILL stop sequence.

use std::collections::HashMap;
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use thiserror::Error;
use tokio::process::{Child, Command};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("spawn failed: {0}")]
    Spawn(std::io::Error),
    #[error("no running worker for deployment {0}")]
    NotRunning(Uuid),
    #[error("signal delivery failed: {0}")]
    Signal(nix::Error),
    #[error("wait failed: {0}")]
    Wait(std::io::Error),
}

/// One spawned `warden-worker` process for one deployment.
struct WorkerHandle {
    child: Child,
    pid: Pid,
}

/// In-memory registry of this controller process's live worker children.
///
/// Nothing here is persisted: if the controller restarts, it loses track of
/// whatever workers were running before (those workers keep running as orphaned
/// processes, matching the rule that a deployment that exits is considered stopped
/// until re-requested -- the controller only ever reasons about processes *it*
/// is currently supervising).
#[derive(Default)]
pub struct WorkerTable {
    handles: HashMap<Uuid, WorkerHandle>,
}

impl WorkerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self, deployment_id: Uuid) -> bool {
        self.handles.contains_key(&deployment_id)
    }

    /// Spawns `worker_bin args...` and tracks the child under `deployment_id`.
    /// Caller is responsible for ensuring the deployment's persisted state made
    /// this a legitimate start (the CAS in `main.rs`) before calling this.
    pub fn spawn(&mut self, worker_bin: &str, deployment_id: Uuid, args: &[&str]) -> Result<(), WorkerError> {
        let child = Command::new(worker_bin)
            .args(args)
            .kill_on_drop(false)
            .spawn()
            .map_err(WorkerError::Spawn)?;
        let pid = Pid::from_raw(child.id().ok_or_else(|| {
            WorkerError::Spawn(std::io::Error::other("spawned child has no pid"))
        })? as i32);
        self.handles.insert(deployment_id, WorkerHandle { child, pid });
        Ok(())
    }

    /// Removes the handle for a deployment without signaling it. Used once a worker
    /// is already known to have exited (reap, or a completed `stop`).
    pub fn remove(&mut self, deployment_id: Uuid) {
        self.handles.remove(&deployment_id);
    }

    pub fn deployment_ids(&self) -> Vec<Uuid> {
        self.handles.keys().copied().collect()
    }

    /// Polls every tracked child with a non-blocking `try_wait`, removing and
    /// returning the ids of any that have exited on their own (crash, panic, `kill -9`
    /// from outside the controller). A worker that exits this way never reaches its own
    /// `Online -> Offline` transition, so the caller must force the deployment back to
    /// `Offline` -- a deployment that exits is stopped until a new `start` re-requests it.
    pub fn reap_exited(&mut self) -> Vec<Uuid> {
        let mut exited = Vec::new();
        self.handles.retain(|deployment_id, handle| match handle.child.try_wait() {
            Ok(Some(_status)) => {
                exited.push(*deployment_id);
                false
            }
            Ok(None) => true,
            Err(e) => {
                tracing::warn!(%deployment_id, error = %e, "failed to poll worker status, leaving tracked");
                true
            }
        });
        exited
    }

    /// Sends SIGTERM, waits up to `grace` for exit, escalates to SIGKILL on timeout.
    /// Removes the handle from the table either way.
    pub async fn stop(&mut self, deployment_id: Uuid, grace: Duration) -> Result<(), WorkerError> {
        let handle = self.handles.get_mut(&deployment_id).ok_or(WorkerError::NotRunning(deployment_id))?;

        kill(handle.pid, Signal::SIGTERM).map_err(WorkerError::Signal)?;

        let exited = tokio::time::timeout(grace, handle.child.wait()).await;
        match exited {
            Ok(Ok(_status)) => {
                tracing::info!(%deployment_id, "worker exited after SIGTERM");
            }
            Ok(Err(e)) => {
                self.handles.remove(&deployment_id);
                return Err(WorkerError::Wait(e));
            }
            Err(_timeout) => {
                tracing::warn!(%deployment_id, "worker did not exit within grace period, sending SIGKILL");
                let handle = self.handles.get_mut(&deployment_id).expect("checked above");
                handle.child.start_kill().map_err(WorkerError::Wait)?;
                let _ = handle.child.wait().await;
            }
        }

        self.handles.remove(&deployment_id);
        Ok(())
    }
}

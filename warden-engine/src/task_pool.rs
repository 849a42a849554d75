//! Bounded-concurrency cooperative task pool.
//!
//! A fixed or unbounded set of slots, each holding at most one running unit of work.
//! `submit` recycles a free slot if one is queued, grows the pool when unbounded, or
//! blocks until a slot frees when bounded and saturated. `stop` aborts every in-flight
//! unit and rejects further submissions.
//!
//! The submit/stop mutex is held across the await that waits for a free slot: a
//! submitter that blocks on a free slot also blocks every other submitter behind it.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

struct Inner {
    tasks: Vec<Option<JoinHandle<()>>>,
    free_tx: Option<mpsc::UnboundedSender<usize>>,
    free_rx: Option<mpsc::UnboundedReceiver<usize>>,
    alive: bool,
    closing: bool,
}

/// Bounded (or unbounded, when `size` is `None`) concurrent executor.
pub struct TaskPool {
    size: Option<usize>,
    inner: Mutex<Inner>,
    closed_tx: watch::Sender<bool>,
    closed_rx: watch::Receiver<bool>,
}

impl TaskPool {
    pub fn new(size: Option<usize>) -> Self {
        let (closed_tx, closed_rx) = watch::channel(false);
        Self {
            size,
            inner: Mutex::new(Inner {
                tasks: Vec::new(),
                free_tx: None,
                free_rx: None,
                alive: false,
                closing: false,
            }),
            closed_tx,
            closed_rx,
        }
    }

    pub fn size(&self) -> Option<usize> {
        self.size
    }

    pub async fn start(&self) {
        let mut inner = self.inner.lock().await;
        let (tx, rx) = mpsc::unbounded_channel();
        inner.tasks = vec![None];
        if let Some(n) = self.size {
            for i in 0..n {
                inner.tasks.push(None);
                let _ = tx.send(i);
            }
        }
        inner.free_tx = Some(tx);
        inner.free_rx = Some(rx);
        inner.alive = true;
        inner.closing = false;
        let _ = self.closed_tx.send(false);
    }

    /// Cancels all in-flight units and rejects further submissions. Idempotent.
    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        if inner.closing || !inner.alive {
            return;
        }
        inner.closing = true;
        inner.alive = false;

        let handles: Vec<JoinHandle<()>> = inner.tasks.drain(..).flatten().collect();
        for h in &handles {
            h.abort();
        }
        for h in handles {
            let _ = h.await;
        }

        inner.free_tx = None;
        inner.free_rx = None;
        let _ = self.closed_tx.send(true);
    }

    /// Schedules `fut` onto a free slot. Silently dropped if the pool is closing or
    /// was never started. Blocks (holding the submit lock) until a slot frees when
    /// the pool is bounded and saturated.
    pub async fn submit(&self, fut: BoxFuture) {
        let mut inner = self.inner.lock().await;
        if inner.closing || !inner.alive {
            return;
        }

        let idx = match inner.free_rx.as_mut().and_then(|rx| rx.try_recv().ok()) {
            Some(idx) => idx,
            None if self.size.is_none() => {
                let idx = inner.tasks.len();
                inner.tasks.push(None);
                idx
            }
            None => match inner.free_rx.as_mut().expect("pool started").recv().await {
                Some(idx) => idx,
                None => return,
            },
        };

        let free_tx = inner.free_tx.clone().expect("pool started");
        let handle = tokio::spawn(async move {
            fut.await;
            let _ = free_tx.send(idx);
        });
        inner.tasks[idx] = Some(handle);
    }

    /// Waits until `stop` has completed (on this or a later call). Returns immediately
    /// if the pool is already closed.
    pub async fn join(&self) {
        let mut rx = self.closed_rx.clone();
        if *rx.borrow() {
            return;
        }
        let _ = rx.changed().await;
    }
}

impl Default for TaskPool {
    fn default() -> Self {
        Self::new(None)
    }
}

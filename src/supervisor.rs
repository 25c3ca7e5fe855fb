//! Lifecycle owner for the bot's long-lived tasks.
//!
//! Each task is built from a factory so it can be restarted after it returns
//! an error or panics. A single `watch` channel carries the shutdown signal to
//! every task.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::backoff::Backoff;

pub type Shutdown = watch::Receiver<bool>;

struct SupervisedTask {
    name: &'static str,
    handle: JoinHandle<()>,
    restarts: Arc<AtomicU32>,
}

pub struct Supervisor {
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: Shutdown,
    tasks: Vec<SupervisedTask>,
    restart_backoff: Backoff,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Supervisor {
    pub fn new() -> Self {
        Self::with_backoff(Backoff::default())
    }

    pub fn with_backoff(restart_backoff: Backoff) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self { shutdown_tx, shutdown_rx, tasks: Vec::new(), restart_backoff }
    }

    pub fn shutdown_signal(&self) -> Shutdown {
        self.shutdown_rx.clone()
    }

    /// Start `factory()` and keep it running until shutdown. A run that ends
    /// with `Ok(())` while no shutdown was requested is also restarted.
    pub fn spawn<F, Fut>(&mut self, name: &'static str, factory: F)
    where
        F: Fn(Shutdown) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let mut shutdown = self.shutdown_rx.clone();
        let restarts = Arc::new(AtomicU32::new(0));
        let restart_count = restarts.clone();
        let mut backoff = self.restart_backoff.clone();

        let handle = tokio::spawn(async move {
            loop {
                if *shutdown.borrow() {
                    break;
                }
                info!(task = name, "task starting");
                let run = tokio::spawn(factory(shutdown.clone()));

                match run.await {
                    Ok(Ok(())) if *shutdown.borrow() => break,
                    Ok(Ok(())) => warn!(task = name, "task exited unexpectedly"),
                    Ok(Err(e)) => error!(task = name, error = %e, "task failed"),
                    Err(e) if e.is_panic() => error!(task = name, "task panicked"),
                    Err(_) => break,
                }

                let delay = backoff.next_delay();
                restart_count.fetch_add(1, Ordering::Relaxed);
                warn!(task = name, delay_ms = delay.as_millis() as u64, "restarting task");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.changed() => {}
                }
            }
            info!(task = name, "task stopped");
        });

        self.tasks.push(SupervisedTask { name, handle, restarts });
    }

    pub fn restarts(&self, name: &str) -> Option<u32> {
        self.tasks
            .iter()
            .find(|t| t.name == name)
            .map(|t| t.restarts.load(Ordering::Relaxed))
    }

    pub fn task_names(&self) -> Vec<&'static str> {
        self.tasks.iter().map(|t| t.name).collect()
    }

    /// Signal shutdown and wait up to `grace` for every task; stragglers are
    /// aborted.
    pub async fn shutdown(self, grace: Duration) {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            let abort = task.handle.abort_handle();
            if tokio::time::timeout(grace, task.handle).await.is_err() {
                warn!(task = task.name, "task did not stop in time, aborting");
                abort.abort();
            }
        }
    }
}

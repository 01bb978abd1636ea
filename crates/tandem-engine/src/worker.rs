//! Async driver
//!
//! The engine owns no threads. `EngineWorker` is an optional tokio task that
//! drains the inbox whenever it is woken, for embedders that do not want to
//! drive `process_pending` themselves. Drains run on the blocking pool since
//! store access is synchronous.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use tandem_core::{MessageUid, ReceivedMessage, Result, TandemError, TransactionalStore};

use crate::engine::{ProcessingReport, ProtocolEngine};

struct Signal {
    wake: Notify,
    stopping: AtomicBool,
}

/// Spawns the drain task
pub struct EngineWorker;

impl EngineWorker {
    /// Spawn a worker draining `engine` on the current tokio runtime
    pub fn spawn<S>(engine: Arc<ProtocolEngine<S>>) -> WorkerHandle<S>
    where
        S: TransactionalStore + 'static,
    {
        let signal = Arc::new(Signal {
            wake: Notify::new(),
            stopping: AtomicBool::new(false),
        });
        let task = tokio::spawn(run(Arc::clone(&engine), Arc::clone(&signal)));
        info!("Engine worker started");
        WorkerHandle {
            engine,
            signal,
            task,
        }
    }
}

/// Handle to a running worker
pub struct WorkerHandle<S: TransactionalStore> {
    engine: Arc<ProtocolEngine<S>>,
    signal: Arc<Signal>,
    task: JoinHandle<ProcessingReport>,
}

impl<S: TransactionalStore + 'static> WorkerHandle<S> {
    /// Engine the worker drives
    pub fn engine(&self) -> &Arc<ProtocolEngine<S>> {
        &self.engine
    }

    /// Queue a message and wake the worker
    pub fn submit(&self, message: ReceivedMessage) -> Result<MessageUid> {
        let uid = self.engine.submit(message)?;
        self.wake();
        Ok(uid)
    }

    /// Ask for a drain without submitting anything
    pub fn wake(&self) {
        self.signal.wake.notify_one();
    }

    /// Stop the worker after a final drain; returns everything it processed
    pub async fn shutdown(self) -> Result<ProcessingReport> {
        self.signal.stopping.store(true, Ordering::SeqCst);
        self.signal.wake.notify_one();
        self.task
            .await
            .map_err(|e| TandemError::internal(format!("engine worker panicked: {e}")))
    }
}

async fn run<S>(engine: Arc<ProtocolEngine<S>>, signal: Arc<Signal>) -> ProcessingReport
where
    S: TransactionalStore + 'static,
{
    let mut total = ProcessingReport::default();
    loop {
        signal.wake.notified().await;
        let stopping = signal.stopping.load(Ordering::SeqCst);
        let drain_engine = Arc::clone(&engine);
        match tokio::task::spawn_blocking(move || drain_engine.process_pending()).await {
            Ok(Ok(report)) => {
                debug!(
                    executed = report.executed,
                    dropped = report.dropped,
                    failed = report.failed.len(),
                    "Inbox drained"
                );
                total.merge(report);
            }
            Ok(Err(e)) => error!(error = %e, "Inbox drain failed"),
            Err(e) => error!(error = %e, "Inbox drain panicked"),
        }
        if stopping {
            break;
        }
    }
    info!(
        executed = total.executed,
        dropped = total.dropped,
        failed = total.failed.len(),
        "Engine worker stopped"
    );
    total
}

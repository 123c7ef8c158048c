//! Actor-based concurrency for the ledger
//!
//! All balance-affecting work runs on one writer task:
//! - Units execute one at a time, so check-then-write is never interleaved
//! - Each unit commits as a single RocksDB batch or not at all
//! - The bounded mailbox provides backpressure
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │        SettlementEngine / Ledger facade              │
//! └─────────────────────┬────────────────────────────────┘
//!                       │ LedgerHandle::transact(closure)
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │               LedgerHandle (Clone)                    │
//! │         Sends unit jobs to actor mailbox              │
//! └─────────────────────┬────────────────────────────────┘
//!                       │ mpsc::channel (bounded)
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │              LedgerActor (Single Task)                │
//! │   LedgerTxn::begin → closure → Storage::write_unit    │
//! └──────────────────────────────────────────────────────┘
//! ```

use crate::{metrics::Metrics, txn::LedgerTxn, Error, Result, Storage};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Work item executed by the actor against storage
pub type UnitJob = Box<dyn FnOnce(&Storage, &Metrics) + Send>;

/// Message sent to the ledger actor
pub enum LedgerMessage {
    /// Run one atomic unit
    Execute(UnitJob),

    /// Stop after the messages already queued
    Shutdown {
        /// Signalled once the actor has stopped
        response: oneshot::Sender<()>,
    },
}

impl std::fmt::Debug for LedgerMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerMessage::Execute(_) => f.write_str("Execute"),
            LedgerMessage::Shutdown { .. } => f.write_str("Shutdown"),
        }
    }
}

/// Actor that owns the write path
pub struct LedgerActor {
    storage: Arc<Storage>,
    metrics: Metrics,
    mailbox: mpsc::Receiver<LedgerMessage>,
}

impl std::fmt::Debug for LedgerActor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerActor")
            .field("storage", &self.storage)
            .finish()
    }
}

impl LedgerActor {
    /// Create new actor
    pub fn new(
        storage: Arc<Storage>,
        metrics: Metrics,
        mailbox: mpsc::Receiver<LedgerMessage>,
    ) -> Self {
        Self {
            storage,
            metrics,
            mailbox,
        }
    }

    /// Run the actor event loop
    pub async fn run(mut self) {
        tracing::info!("Ledger writer started");

        while let Some(msg) = self.mailbox.recv().await {
            match msg {
                LedgerMessage::Execute(job) => job(&self.storage, &self.metrics),
                LedgerMessage::Shutdown { response } => {
                    self.mailbox.close();
                    // Drain units queued before the shutdown request
                    while let Ok(LedgerMessage::Execute(job)) = self.mailbox.try_recv() {
                        job(&self.storage, &self.metrics);
                    }
                    let _ = response.send(());
                    break;
                }
            }
        }

        tracing::info!("Ledger writer stopped");
    }
}

/// Execute `f` as one unit and commit its staged writes
fn execute_unit<T, E, F>(storage: &Storage, metrics: &Metrics, f: F) -> std::result::Result<T, E>
where
    E: From<Error>,
    F: FnOnce(&mut LedgerTxn<'_>) -> std::result::Result<T, E>,
{
    let timer = metrics.commit_duration.start_timer();
    let mut txn = LedgerTxn::begin(storage);

    match f(&mut txn) {
        Ok(value) => match storage.write_unit(txn.into_unit()) {
            Ok(summary) => {
                metrics.record_commit(&summary);
                timer.observe_duration();
                Ok(value)
            }
            Err(e) => {
                tracing::error!(error = %e, "Unit commit failed");
                metrics.record_rejection();
                timer.stop_and_discard();
                Err(E::from(e))
            }
        },
        Err(e) => {
            metrics.record_rejection();
            timer.stop_and_discard();
            Err(e)
        }
    }
}

/// Handle for sending messages to the actor
#[derive(Clone, Debug)]
pub struct LedgerHandle {
    sender: mpsc::Sender<LedgerMessage>,
}

impl LedgerHandle {
    /// Create new handle
    pub fn new(sender: mpsc::Sender<LedgerMessage>) -> Self {
        Self { sender }
    }

    /// Run `f` as one serialized atomic unit.
    ///
    /// Writes staged through the [`LedgerTxn`] are committed together when
    /// `f` returns `Ok`, and discarded when it returns `Err`.
    pub async fn transact<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        T: Send + 'static,
        E: From<Error> + Send + 'static,
        F: FnOnce(&mut LedgerTxn<'_>) -> std::result::Result<T, E> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: UnitJob = Box::new(move |storage, metrics| {
            let _ = tx.send(execute_unit(storage, metrics, f));
        });

        self.sender
            .send(LedgerMessage::Execute(job))
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))?
    }

    /// Shutdown actor, waiting for queued units to finish
    pub async fn shutdown(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(LedgerMessage::Shutdown { response: tx })
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))
    }
}

/// Spawn the ledger actor
pub fn spawn_ledger_actor(storage: Arc<Storage>, metrics: Metrics, capacity: usize) -> LedgerHandle {
    let (tx, rx) = mpsc::channel(capacity.max(1)); // Bounded channel for backpressure
    let actor = LedgerActor::new(storage, metrics, rx);

    tokio::spawn(async move {
        actor.run().await;
    });

    LedgerHandle::new(tx)
}

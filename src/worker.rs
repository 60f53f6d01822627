//! Background ingestion worker.
//!
//! One bounded channel, one consumer task: jobs run strictly one after
//! another and each finishes by writing its terminal record to the ledger.
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::json;
use thiserror::Error;
use tokio::sync::{Mutex as TokioMutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::ingest::{IngestOutcome, Ingestor};
use crate::ledger::{MSG_NO_NEW_DOCUMENTS, MSG_SUCCESS, TaskLedger, TaskRecord};
use crate::response::{STATUS_ERROR, STATUS_OK, error_chain};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
    #[error("ingest queue is full")]
    Full,

    #[error("ingest worker is not running")]
    Closed,
}

#[derive(Debug, Clone)]
pub struct IngestJob {
    pub task_id: String,
    pub source: PathBuf,
}

/// Cloneable handle for submitting jobs and stopping the worker.
#[derive(Clone)]
pub struct WorkerHandle {
    tx: Arc<TokioMutex<Option<mpsc::Sender<IngestJob>>>>,
    task: Arc<TokioMutex<Option<JoinHandle<()>>>>,
}

impl WorkerHandle {
    /// Spawn the consumer task on the current runtime.
    pub fn spawn(ingestor: Ingestor, ledger: TaskLedger, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let task = tokio::spawn(run(rx, ingestor, ledger));
        Self {
            tx: Arc::new(TokioMutex::new(Some(tx))),
            task: Arc::new(TokioMutex::new(Some(task))),
        }
    }

    /// Queue a job without waiting for room.
    pub async fn submit(&self, job: IngestJob) -> Result<(), WorkerError> {
        let guard = self.tx.lock().await;
        let tx = guard.as_ref().ok_or(WorkerError::Closed)?;
        tx.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => WorkerError::Full,
            mpsc::error::TrySendError::Closed(_) => WorkerError::Closed,
        })
    }

    /// Stop accepting jobs and wait until every queued job has finished.
    pub async fn shutdown(&self) {
        drop(self.tx.lock().await.take());

        let Some(task) = self.task.lock().await.take() else {
            return;
        };
        info!("Waiting for queued ingestion jobs to finish");
        if let Err(e) = task.await {
            error!("Ingest worker panicked: {e}");
        }
    }
}

async fn run(mut rx: mpsc::Receiver<IngestJob>, ingestor: Ingestor, ledger: TaskLedger) {
    info!("Ingest worker started");
    while let Some(job) = rx.recv().await {
        info!(task_id = %job.task_id, "Data Ingestion Started: {}", job.source.display());

        let record = match ingestor.ingest(&job.source).await {
            Ok(IngestOutcome::Ingested { documents, chunks }) => {
                info!(task_id = %job.task_id, "{MSG_SUCCESS}");
                TaskRecord {
                    data: Some(json!({ "documents": documents, "chunks": chunks })),
                    ..TaskRecord::new(STATUS_OK, MSG_SUCCESS)
                }
            }
            Ok(IngestOutcome::NoNewDocuments) => {
                info!(task_id = %job.task_id, "{MSG_NO_NEW_DOCUMENTS}");
                TaskRecord::new(STATUS_OK, MSG_NO_NEW_DOCUMENTS)
            }
            Err(e) => {
                let message = format!("Error ingesting data: {}", error_chain(&e));
                warn!(task_id = %job.task_id, "{message}");
                TaskRecord::new(STATUS_ERROR, message)
            }
        };

        if let Err(e) = ledger.set(&job.task_id, record).await {
            error!(task_id = %job.task_id, "Failed to record task status: {}", error_chain(&e));
        }
    }
    info!("Ingest worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::Embedder;
    use crate::embedder::mock::MockEmbedder;
    use crate::store::Db;
    use std::fs;
    use tempfile::tempdir;

    fn setup(dir: &std::path::Path, capacity: usize) -> (WorkerHandle, TaskLedger) {
        let db = Arc::new(TokioMutex::new(Db::open_in_memory(16).unwrap()));
        let embedder: Arc<dyn Embedder> = Arc::new(MockEmbedder::new(16));
        let ingestor = Ingestor::new(db, embedder, 500, 50);
        let ledger = TaskLedger::open(dir.join("tasklist.json")).unwrap();
        (WorkerHandle::spawn(ingestor, ledger.clone(), capacity), ledger)
    }

    fn job(task_id: &str, source: &std::path::Path) -> IngestJob {
        IngestJob {
            task_id: task_id.into(),
            source: source.to_path_buf(),
        }
    }

    #[tokio::test]
    async fn test_jobs_reach_terminal_state() {
        let scratch = tempdir().unwrap();
        let docs = scratch.path().join("docs");
        fs::create_dir(&docs).unwrap();
        fs::write(docs.join("nato.txt"), "NATO was founded in 1949.").unwrap();

        let (worker, ledger) = setup(scratch.path(), 4);
        for id in ["t1", "t2"] {
            ledger.set(id, TaskRecord::started()).await.unwrap();
            worker.submit(job(id, &docs)).await.unwrap();
        }
        worker.shutdown().await;

        let first = ledger.get("t1").await.unwrap();
        assert_eq!(first.message, MSG_SUCCESS);
        assert_eq!(first.data.unwrap()["chunks"], 1);

        let second = ledger.get("t2").await.unwrap();
        assert_eq!(second.message, MSG_NO_NEW_DOCUMENTS);
        assert_eq!(second.status, STATUS_OK);
    }

    #[tokio::test]
    async fn test_failure_is_recorded() {
        let scratch = tempdir().unwrap();
        let (worker, ledger) = setup(scratch.path(), 4);

        ledger.set("bad", TaskRecord::started()).await.unwrap();
        worker
            .submit(job("bad", &scratch.path().join("missing")))
            .await
            .unwrap();
        worker.shutdown().await;

        let record = ledger.get("bad").await.unwrap();
        assert_eq!(record.status, STATUS_ERROR);
        assert!(record.message.starts_with("Error ingesting data: "));
    }

    #[tokio::test]
    async fn test_submit_after_shutdown() {
        let scratch = tempdir().unwrap();
        let (worker, _) = setup(scratch.path(), 1);
        worker.shutdown().await;

        let err = worker.submit(job("late", scratch.path())).await.unwrap_err();
        assert_eq!(err, WorkerError::Closed);
        // A second shutdown is a no-op
        worker.shutdown().await;
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_full_queue_rejects() {
        let scratch = tempdir().unwrap();
        let (worker, _) = setup(scratch.path(), 1);

        // The consumer cannot run until this task yields
        worker.submit(job("a", scratch.path())).await.unwrap();
        let err = worker.submit(job("b", scratch.path())).await.unwrap_err();
        assert_eq!(err, WorkerError::Full);
        worker.shutdown().await;
    }
}

//! Task ledger: durable map of task id → [`TaskRecord`].
//!
//! The whole map lives in memory behind a mutex and is rewritten to disk on
//! every update. Writes go to a sibling temp file which is synced and then
//! renamed over the ledger, so a crash mid-write leaves the previous version
//! intact.
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex as TokioMutex;
use tracing::{debug, info, warn};

use crate::response::{RunResponse, STATUS_OK};

pub const MSG_STARTED: &str = "Data Ingestion Started";
pub const MSG_SUCCESS: &str = "Data Ingestion Success";
pub const MSG_NO_NEW_DOCUMENTS: &str = "No new documents to ingest";

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("failed to access task ledger {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("task ledger {path} is not valid JSON")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize task ledger")]
    Serialize(#[from] serde_json::Error),

    #[error("task ledger write aborted: {0}")]
    Aborted(String),
}

/// Status of one background task as stored in the ledger file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub status: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    pub fn new(status: i32, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            data: None,
            updated_at: None,
        }
    }

    /// Placeholder written when an ingestion job is accepted.
    pub fn started() -> Self {
        Self::new(STATUS_OK, MSG_STARTED)
    }

    /// Overlay `update` onto `self`. `data` is kept when the update has none.
    fn merge(&mut self, update: TaskRecord) {
        self.status = update.status;
        self.message = update.message;
        if update.data.is_some() {
            self.data = update.data;
        }
        self.updated_at = update.updated_at;
    }
}

impl From<RunResponse> for TaskRecord {
    fn from(res: RunResponse) -> Self {
        Self {
            status: res.status,
            message: res.message,
            data: res.data,
            updated_at: None,
        }
    }
}

impl From<TaskRecord> for RunResponse {
    fn from(rec: TaskRecord) -> Self {
        RunResponse {
            status: rec.status,
            message: rec.message,
            data: rec.data,
        }
    }
}

type TaskMap = BTreeMap<String, TaskRecord>;

/// Shared handle to the ledger file. Cloning shares the same state.
#[derive(Clone)]
pub struct TaskLedger {
    path: Arc<PathBuf>,
    tasks: Arc<TokioMutex<TaskMap>>,
}

impl TaskLedger {
    /// Open the ledger at `path`, creating an empty one if it does not exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, LedgerError> {
        let path = path.as_ref().to_path_buf();

        let tasks = if path.exists() {
            let raw = fs::read_to_string(&path).map_err(|source| LedgerError::Io {
                path: path.clone(),
                source,
            })?;
            if raw.trim().is_empty() {
                warn!("Task ledger {} is empty, starting fresh", path.display());
                TaskMap::new()
            } else {
                serde_json::from_str(&raw).map_err(|source| LedgerError::Corrupt {
                    path: path.clone(),
                    source,
                })?
            }
        } else {
            info!("Creating task ledger {}", path.display());
            let empty = TaskMap::new();
            write_atomic(&path, &empty)?;
            empty
        };

        debug!("Task ledger {} holds {} tasks", path.display(), tasks.len());

        Ok(Self {
            path: Arc::new(path),
            tasks: Arc::new(TokioMutex::new(tasks)),
        })
    }

    /// Look up one task.
    pub async fn get(&self, task_id: &str) -> Option<TaskRecord> {
        self.tasks.lock().await.get(task_id).cloned()
    }

    /// Insert or merge-update a task record and persist the ledger.
    ///
    /// On a failed write the in-memory map is rolled back so memory and disk
    /// stay in agreement.
    pub async fn set(&self, task_id: &str, mut record: TaskRecord) -> Result<(), LedgerError> {
        record.updated_at = Some(Utc::now());

        let mut tasks = self.tasks.lock().await;
        let previous = tasks.get(task_id).cloned();

        match tasks.get_mut(task_id) {
            Some(existing) => existing.merge(record),
            None => {
                tasks.insert(task_id.to_string(), record);
            }
        }

        if let Err(e) = persist(Arc::clone(&self.path), tasks.clone()).await {
            match previous {
                Some(prev) => {
                    tasks.insert(task_id.to_string(), prev);
                }
                None => {
                    tasks.remove(task_id);
                }
            }
            return Err(e);
        }
        Ok(())
    }

    /// Rewrite the ledger file from memory in canonical form.
    pub async fn compact(&self) -> Result<usize, LedgerError> {
        let tasks = self.tasks.lock().await;
        persist(Arc::clone(&self.path), tasks.clone()).await?;
        info!(
            "Compacted task ledger {} ({} tasks)",
            self.path.display(),
            tasks.len()
        );
        Ok(tasks.len())
    }

    pub async fn len(&self) -> usize {
        self.tasks.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.lock().await.is_empty()
    }
}

/// Write a snapshot of the map off the runtime threads.
///
/// Callers keep the map locked until this returns, so writes land in order.
async fn persist(path: Arc<PathBuf>, tasks: TaskMap) -> Result<(), LedgerError> {
    tokio::task::spawn_blocking(move || write_atomic(&path, &tasks))
        .await
        .map_err(|e| LedgerError::Aborted(e.to_string()))?
}

/// Write `tasks` to `<path>.tmp`, sync it, then rename over `path`.
fn write_atomic(path: &Path, tasks: &TaskMap) -> Result<(), LedgerError> {
    let io_err = |source| LedgerError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }

    let data = serde_json::to_vec_pretty(tasks)?;
    let tmp = tmp_path(path);
    {
        let mut file = fs::File::create(&tmp).map_err(io_err)?;
        file.write_all(&data).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
    }
    fs::rename(&tmp, path).map_err(io_err)?;
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

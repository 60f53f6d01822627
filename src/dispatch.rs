//! Action dispatcher shared by the CLI and the HTTP façade.
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex as TokioMutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Settings;
use crate::embedder::{self, Embedder};
use crate::ingest::Ingestor;
use crate::ledger::{TaskLedger, TaskRecord};
use crate::llm;
use crate::query::{ModelSlot, QueryEngine};
use crate::response::{RunResponse, STATUS_ERROR, error_chain};
use crate::store::Db;
use crate::worker::{IngestJob, WorkerHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Ingest,
    Query,
    Status,
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ingest" => Ok(Self::Ingest),
            "query" => Ok(Self::Query),
            "status" => Ok(Self::Status),
            other => Err(format!("Invalid action: {other}")),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ingest => "ingest",
            Self::Query => "query",
            Self::Status => "status",
        })
    }
}

/// One request as it arrives from the command line.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActionRequest {
    pub action: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub taskid: Option<String>,
    #[serde(default)]
    pub hide_source: bool,
}

/// Shared application state. Cloning shares everything.
#[derive(Clone)]
pub struct AppContext {
    pub settings: Arc<Settings>,
    pub ledger: TaskLedger,
    pub query: QueryEngine,
    pub worker: WorkerHandle,
}

impl AppContext {
    /// Wire up the context from its parts and start the ingest worker.
    ///
    /// Must be called from inside a tokio runtime.
    pub fn new(
        settings: Settings,
        ledger: TaskLedger,
        store: Db,
        embedder: Arc<dyn Embedder>,
        model: ModelSlot,
    ) -> Self {
        let store = Arc::new(TokioMutex::new(store));
        let ingestor = Ingestor::new(
            Arc::clone(&store),
            Arc::clone(&embedder),
            settings.chunk_size,
            settings.chunk_overlap,
        );
        let worker = WorkerHandle::spawn(ingestor, ledger.clone(), settings.ingest_queue_capacity);
        let query = QueryEngine::new(store, embedder, model, settings.target_source_chunks);

        Self {
            settings: Arc::new(settings),
            ledger,
            query,
            worker,
        }
    }

    /// Load the embeddings model, open the ledger and vector store, and
    /// resolve the language model backend.
    pub async fn from_settings(settings: Settings) -> anyhow::Result<Self> {
        let ledger = TaskLedger::open(&settings.tasklist_path)
            .with_context(|| format!("failed to open {}", settings.tasklist_path.display()))?;

        let embedder = {
            let settings = settings.clone();
            tokio::task::spawn_blocking(move || embedder::load(&settings)).await??
        };

        let db_path = settings.vector_db_path();
        let store = Db::open(&db_path, embedder.dimensions())
            .with_context(|| format!("failed to open vector store {}", db_path.display()))?;

        let model = llm::select(&settings.model).map_err(|e| {
            warn!("Language model unavailable: {e}");
            e.to_string()
        });

        Ok(Self::new(settings, ledger, store, embedder, model))
    }

    /// Validate `req` and route it to its action.
    pub async fn run(&self, req: ActionRequest) -> RunResponse {
        match Validated::from_request(req) {
            Ok(valid) => self.dispatch(valid).await,
            Err(res) => res,
        }
    }

    async fn dispatch(&self, valid: Validated) -> RunResponse {
        match valid {
            Validated::Ingest(source) => self.ingest(&source).await,
            Validated::Query { query, hide_source } => self.query(&query, hide_source).await,
            Validated::Status(taskid) => self.status(&taskid).await,
        }
    }

    /// Queue an ingestion of `source` and return its task id.
    pub async fn ingest(&self, source: &str) -> RunResponse {
        let path = Path::new(source);
        if !path.is_dir() {
            return RunResponse::error(format!("Source directory {source} does not exist"));
        }

        let task_id = Uuid::new_v4().to_string();
        if let Err(e) = self.ledger.set(&task_id, TaskRecord::started()).await {
            return RunResponse::error(format!("Error updating task status: {}", error_chain(&e)));
        }

        let job = IngestJob {
            task_id: task_id.clone(),
            source: std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf()),
        };
        if let Err(e) = self.worker.submit(job).await {
            let message = format!("Error ingesting data: {e}");
            warn!(task_id = %task_id, "{message}");
            if let Err(e) = self
                .ledger
                .set(&task_id, TaskRecord::new(STATUS_ERROR, message.clone()))
                .await
            {
                warn!(task_id = %task_id, "Failed to record rejection: {}", error_chain(&e));
            }
            return RunResponse::error(message);
        }

        info!(task_id = %task_id, "Queued ingestion of {source}");
        RunResponse::ok("Success").with_data(json!({ "taskid": task_id }))
    }

    pub async fn query(&self, query: &str, hide_source: bool) -> RunResponse {
        self.query.run(query, hide_source).await
    }

    /// The stored record for `taskid`, verbatim.
    pub async fn status(&self, taskid: &str) -> RunResponse {
        status_of(&self.ledger, taskid).await
    }

    /// Stop the worker after it has drained its queue.
    pub async fn shutdown(&self) {
        self.worker.shutdown().await;
    }
}

/// A request whose action parsed and whose required argument is present.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Validated {
    Ingest(String),
    Query { query: String, hide_source: bool },
    Status(String),
}

impl Validated {
    fn from_request(req: ActionRequest) -> Result<Self, RunResponse> {
        let action = req.action.parse::<Action>().map_err(RunResponse::error)?;
        info!("Running action {action}");

        match action {
            Action::Ingest => non_empty(req.source)
                .map(Self::Ingest)
                .ok_or_else(|| RunResponse::error("source must be specified for ingest action")),
            Action::Query => non_empty(req.query)
                .map(|query| Self::Query {
                    query,
                    hide_source: req.hide_source,
                })
                .ok_or_else(|| {
                    RunResponse::error("Query string must be specified for query action")
                }),
            Action::Status => non_empty(req.taskid)
                .map(Self::Status)
                .ok_or_else(|| RunResponse::error("taskid must be specified for status action")),
        }
    }
}

/// Run a single command-line request.
///
/// Arguments are checked before any model is loaded. `status` reads the
/// ledger alone, and an ingest without a source falls back to
/// `SOURCE_DIRECTORY`. Failures come back as error responses.
pub async fn run_once(settings: Settings, mut req: ActionRequest) -> RunResponse {
    if req.action == Action::Ingest.to_string() && non_empty(req.source.clone()).is_none() {
        req.source = Some(settings.source_directory.display().to_string());
    }

    let valid = match Validated::from_request(req) {
        Ok(valid) => valid,
        Err(res) => return res,
    };

    match &valid {
        Validated::Status(taskid) => {
            return match TaskLedger::open(&settings.tasklist_path) {
                Ok(ledger) => status_of(&ledger, taskid).await,
                Err(e) => RunResponse::error(format!(
                    "Error reading task list: {}",
                    error_chain(&e)
                )),
            };
        }
        Validated::Ingest(source) if !Path::new(source).is_dir() => {
            return RunResponse::error(format!("Source directory {source} does not exist"));
        }
        _ => {}
    }

    let ctx = match AppContext::from_settings(settings).await {
        Ok(ctx) => ctx,
        Err(e) => {
            warn!("Startup failed: {e:#}");
            return RunResponse::error(format!("Error reading configuration: {e:#}"));
        }
    };
    let res = ctx.dispatch(valid).await;

    // A one-shot ingest finishes before the process exits
    ctx.shutdown().await;
    res
}

async fn status_of(ledger: &TaskLedger, taskid: &str) -> RunResponse {
    match ledger.get(taskid).await {
        Some(record) => record.into(),
        None => RunResponse::error(format!("Task {taskid} not found")),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::mock::MockEmbedder;
    use crate::llm::mock::MockLanguageModel;
    use crate::ledger::{MSG_STARTED, MSG_SUCCESS};
    use std::collections::HashMap;
    use std::fs;
    use tempfile::{TempDir, tempdir};

    fn context(scratch: &TempDir) -> AppContext {
        let tasklist = scratch.path().join("tasklist.json");
        let vars: HashMap<&str, String> = [
            ("PERSIST_DIRECTORY", scratch.path().join("db").display().to_string()),
            ("EMBEDDINGS_MODEL_NAME", "mock".to_string()),
            ("TASKLIST_PATH", tasklist.display().to_string()),
        ]
        .into();
        let settings = Settings::from_lookup(|k| vars.get(k).cloned()).unwrap();
        let ledger = TaskLedger::open(&tasklist).unwrap();
        let model: Arc<dyn llm::LanguageModel> = Arc::new(MockLanguageModel::answering("Because."));
        AppContext::new(
            settings,
            ledger,
            Db::open_in_memory(16).unwrap(),
            Arc::new(MockEmbedder::new(16)),
            Ok(model),
        )
    }

    fn request(action: &str) -> ActionRequest {
        ActionRequest {
            action: action.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_action_parse() {
        assert_eq!("ingest".parse::<Action>().unwrap(), Action::Ingest);
        assert_eq!(Action::Status.to_string(), "status");
        assert_eq!("delete".parse::<Action>().unwrap_err(), "Invalid action: delete");
    }

    #[tokio::test]
    async fn test_invalid_action() {
        let scratch = tempdir().unwrap();
        let res = context(&scratch).run(request("delete")).await;
        assert_eq!(res, RunResponse::error("Invalid action: delete"));
    }

    #[tokio::test]
    async fn test_missing_arguments() {
        let scratch = tempdir().unwrap();
        let ctx = context(&scratch);

        let res = ctx.run(request("ingest")).await;
        assert_eq!(res.message, "source must be specified for ingest action");
        let res = ctx.run(request("query")).await;
        assert_eq!(res.message, "Query string must be specified for query action");
        let res = ctx.run(request("status")).await;
        assert_eq!(res.message, "taskid must be specified for status action");
        assert_eq!(res.status, STATUS_ERROR);
    }

    #[tokio::test]
    async fn test_ingest_missing_directory_starts_nothing() {
        let scratch = tempdir().unwrap();
        let ctx = context(&scratch);
        let missing = scratch.path().join("nope").display().to_string();

        let res = ctx
            .run(ActionRequest {
                source: Some(missing.clone()),
                ..request("ingest")
            })
            .await;
        assert_eq!(res.status, STATUS_ERROR);
        assert_eq!(res.message, format!("Source directory {missing} does not exist"));
        assert!(ctx.ledger.is_empty().await);
    }

    #[tokio::test]
    async fn test_ingest_then_status() {
        let scratch = tempdir().unwrap();
        let docs = scratch.path().join("docs");
        fs::create_dir(&docs).unwrap();
        fs::write(docs.join("nato.txt"), "NATO was founded in 1949.").unwrap();
        let ctx = context(&scratch);

        let res = ctx
            .run(ActionRequest {
                source: Some(docs.display().to_string()),
                ..request("ingest")
            })
            .await;
        assert!(res.is_ok(), "{res:?}");
        let taskid = res.data.unwrap()["taskid"].as_str().unwrap().to_string();
        assert!(Uuid::parse_str(&taskid).is_ok());

        let status = ctx.status(&taskid).await;
        assert!(status.message == MSG_STARTED || status.message == MSG_SUCCESS);

        ctx.shutdown().await;
        let status = ctx
            .run(ActionRequest {
                taskid: Some(taskid),
                ..request("status")
            })
            .await;
        assert_eq!(status.message, MSG_SUCCESS);
    }

    #[tokio::test]
    async fn test_unknown_task() {
        let scratch = tempdir().unwrap();
        let res = context(&scratch).status("no-such-task").await;
        assert_eq!(res, RunResponse::error("Task no-such-task not found"));
    }

    #[tokio::test]
    async fn test_rejected_job_is_recorded() {
        let scratch = tempdir().unwrap();
        let ctx = context(&scratch);
        ctx.shutdown().await;

        let res = ctx.ingest(&scratch.path().display().to_string()).await;
        assert_eq!(res.status, STATUS_ERROR);
        assert_eq!(res.message, "Error ingesting data: ingest worker is not running");
        assert_eq!(ctx.ledger.len().await, 1);
    }

    #[tokio::test]
    async fn test_query_routes_to_engine() {
        let scratch = tempdir().unwrap();
        let res = context(&scratch)
            .run(ActionRequest {
                query: Some("Why was NATO created?".into()),
                hide_source: true,
                ..request("query")
            })
            .await;
        assert!(res.is_ok());
        assert_eq!(res.data.unwrap()["answer"], "Because.");
    }

    /// Settings whose embeddings model can never be loaded: the models
    /// directory is a regular file.
    fn unloadable_settings(scratch: &TempDir, source: Option<&Path>) -> Settings {
        let blocker = scratch.path().join("not-a-dir");
        fs::write(&blocker, "").unwrap();
        let mut vars: HashMap<&str, String> = [
            ("PERSIST_DIRECTORY", scratch.path().join("db").display().to_string()),
            ("EMBEDDINGS_MODEL_NAME", "sentence-transformers/all-MiniLM-L6-v2".to_string()),
            ("MODELS_DIRECTORY", blocker.display().to_string()),
            ("TASKLIST_PATH", scratch.path().join("tasklist.json").display().to_string()),
        ]
        .into();
        if let Some(source) = source {
            vars.insert("SOURCE_DIRECTORY", source.display().to_string());
        }
        Settings::from_lookup(|k| vars.get(k).cloned()).unwrap()
    }

    #[tokio::test]
    async fn test_run_once_status_reads_ledger_only() {
        let scratch = tempdir().unwrap();
        let settings = unloadable_settings(&scratch, None);
        {
            let ledger = TaskLedger::open(&settings.tasklist_path).unwrap();
            let record = TaskRecord::new(crate::response::STATUS_OK, MSG_SUCCESS);
            ledger.set("t1", record).await.unwrap();
        }

        let res = run_once(
            settings.clone(),
            ActionRequest {
                taskid: Some("t1".into()),
                ..request("status")
            },
        )
        .await;
        assert!(res.is_ok(), "{res:?}");
        assert_eq!(res.message, MSG_SUCCESS);

        let res = run_once(
            settings,
            ActionRequest {
                taskid: Some("t2".into()),
                ..request("status")
            },
        )
        .await;
        assert_eq!(res, RunResponse::error("Task t2 not found"));
    }

    #[tokio::test]
    async fn test_run_once_rejects_before_loading() {
        let scratch = tempdir().unwrap();
        let settings = unloadable_settings(&scratch, None);

        let res = run_once(settings.clone(), request("delete")).await;
        assert_eq!(res, RunResponse::error("Invalid action: delete"));
        let res = run_once(settings, request("query")).await;
        assert_eq!(res.message, "Query string must be specified for query action");
    }

    #[tokio::test]
    async fn test_run_once_ingest_falls_back_to_source_directory() {
        let scratch = tempdir().unwrap();
        let missing = scratch.path().join("source_documents");
        let settings = unloadable_settings(&scratch, Some(&missing));

        let res = run_once(settings, request("ingest")).await;
        assert_eq!(
            res,
            RunResponse::error(format!("Source directory {} does not exist", missing.display()))
        );
    }

    #[tokio::test]
    async fn test_run_once_startup_failure_is_a_response() {
        let scratch = tempdir().unwrap();
        let docs = scratch.path().join("docs");
        fs::create_dir(&docs).unwrap();
        let settings = unloadable_settings(&scratch, Some(&docs));

        let res = run_once(settings, request("ingest")).await;
        assert_eq!(res.status, STATUS_ERROR);
        assert!(res.message.starts_with("Error reading configuration: "), "{res:?}");
        assert!(res.data.is_none());
    }
}

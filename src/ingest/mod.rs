//! Ingestion pipeline: load → split → embed → add → persist.
pub mod loader;
pub mod splitter;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex as TokioMutex;
use tracing::info;

use crate::embedder::{Embedder, EmbedderError};
use crate::store::{Db, StoreError, models::Chunk};
use loader::LoaderError;
use splitter::TextSplitter;

/// Texts per `embed_batch` call.
const EMBED_BATCH: usize = 32;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("source directory {0} does not exist")]
    SourceMissing(PathBuf),

    #[error("loading documents failed")]
    Load(#[from] LoaderError),

    #[error("embedding failed")]
    Embed(#[from] EmbedderError),

    #[error("vector store error")]
    Store(#[from] StoreError),

    #[error("ingestion task aborted: {0}")]
    Aborted(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Ingested { documents: usize, chunks: usize },
    NoNewDocuments,
}

#[derive(Debug)]
struct SplitChunk {
    source: String,
    position: usize,
    content: String,
}

/// Runs ingestion jobs against a shared vector store.
#[derive(Clone)]
pub struct Ingestor {
    store: Arc<TokioMutex<Db>>,
    embedder: Arc<dyn Embedder>,
    splitter: TextSplitter,
}

impl Ingestor {
    pub fn new(
        store: Arc<TokioMutex<Db>>,
        embedder: Arc<dyn Embedder>,
        chunk_size: usize,
        chunk_overlap: usize,
    ) -> Self {
        Self {
            store,
            embedder,
            splitter: TextSplitter::new(chunk_size, chunk_overlap),
        }
    }

    /// Ingest every new document under `source_dir`.
    ///
    /// Sources already present in the store are skipped, so running twice
    /// over the same directory adds nothing the second time.
    pub async fn ingest(&self, source_dir: &Path) -> Result<IngestOutcome, IngestError> {
        if !source_dir.is_dir() {
            return Err(IngestError::SourceMissing(source_dir.to_path_buf()));
        }

        let ignored = {
            let db = self.store.lock().await;
            if db.has_documents()? {
                info!("Appending to existing vector store");
                db.list_sources()?
            } else {
                info!("Creating new vector store");
                Default::default()
            }
        };

        let dir = source_dir.to_path_buf();
        let embedder = Arc::clone(&self.embedder);
        let splitter = self.splitter;

        // Parsing and embedding are CPU-bound
        let prepared = tokio::task::spawn_blocking(move || {
            prepare(&dir, &ignored, &splitter, embedder.as_ref())
        })
        .await
        .map_err(|e| IngestError::Aborted(e.to_string()))??;

        let Some((documents, chunks, embeddings)) = prepared else {
            return Ok(IngestOutcome::NoNewDocuments);
        };

        let rows: Vec<Chunk<'_>> = chunks
            .iter()
            .map(|c| Chunk {
                source: &c.source,
                position: c.position,
                content: &c.content,
            })
            .collect();

        {
            let mut db = self.store.lock().await;
            db.add_documents(&rows, &embeddings)?;
            db.persist()?;
        }

        info!("Ingestion complete: {documents} documents, {} chunks", rows.len());
        Ok(IngestOutcome::Ingested {
            documents,
            chunks: rows.len(),
        })
    }
}

type Prepared = Option<(usize, Vec<SplitChunk>, Vec<Vec<f32>>)>;

fn prepare(
    dir: &Path,
    ignored: &std::collections::HashSet<String>,
    splitter: &TextSplitter,
    embedder: &dyn Embedder,
) -> Result<Prepared, IngestError> {
    info!("Loading documents from {}", dir.display());
    let documents = loader::load_documents(dir, ignored)?;
    if documents.is_empty() {
        info!("No new documents to load");
        return Ok(None);
    }
    info!("Loaded {} new documents from {}", documents.len(), dir.display());

    let mut chunks = Vec::new();
    let mut position = 0usize;
    let mut last_source: Option<&str> = None;
    for doc in &documents {
        if last_source != Some(doc.source.as_str()) {
            position = 0;
            last_source = Some(doc.source.as_str());
        }
        for content in splitter.split(&doc.content) {
            chunks.push(SplitChunk {
                source: doc.source.clone(),
                position,
                content,
            });
            position += 1;
        }
    }
    if chunks.is_empty() {
        return Ok(None);
    }
    info!("Split into {} chunks of text", chunks.len());

    info!("Creating embeddings. May take some minutes...");
    let mut embeddings = Vec::with_capacity(chunks.len());
    for batch in chunks.chunks(EMBED_BATCH) {
        let texts: Vec<&str> = batch.iter().map(|c| c.content.as_str()).collect();
        embeddings.extend(embedder.embed_batch(&texts)?);
    }

    Ok(Some((documents.len(), chunks, embeddings)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::mock::MockEmbedder;
    use std::fs;
    use tempfile::tempdir;

    fn ingestor(chunk_size: usize) -> (Ingestor, Arc<TokioMutex<Db>>) {
        let db = Arc::new(TokioMutex::new(Db::open_in_memory(16).unwrap()));
        let embedder: Arc<dyn Embedder> = Arc::new(MockEmbedder::new(16));
        (Ingestor::new(db.clone(), embedder, chunk_size, 10), db)
    }

    #[tokio::test]
    async fn test_ingest_then_skip_known_sources() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("nato.txt"), "NATO was created in 1949.").unwrap();
        fs::write(dir.path().join("rust.md"), "# Rust\n\nA systems language.").unwrap();

        let (ingestor, db) = ingestor(500);

        let first = ingestor.ingest(dir.path()).await.unwrap();
        assert_eq!(
            first,
            IngestOutcome::Ingested {
                documents: 2,
                chunks: 2
            }
        );

        let second = ingestor.ingest(dir.path()).await.unwrap();
        assert_eq!(second, IngestOutcome::NoNewDocuments);
        assert_eq!(db.lock().await.chunk_count().unwrap(), 2);

        fs::write(dir.path().join("new.txt"), "Fresh content").unwrap();
        let third = ingestor.ingest(dir.path()).await.unwrap();
        assert_eq!(
            third,
            IngestOutcome::Ingested {
                documents: 1,
                chunks: 1
            }
        );
        assert_eq!(db.lock().await.chunk_count().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_long_document_is_chunked() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("long.txt"),
            "The alliance was formed for collective defence. ".repeat(20),
        )
        .unwrap();

        let (ingestor, db) = ingestor(100);
        let outcome = ingestor.ingest(dir.path()).await.unwrap();
        let IngestOutcome::Ingested { documents, chunks } = outcome else {
            panic!("expected ingestion, got {outcome:?}");
        };
        assert_eq!(documents, 1);
        assert!(chunks > 5);
        assert_eq!(db.lock().await.chunk_count().unwrap(), chunks);
    }

    #[tokio::test]
    async fn test_empty_directory() {
        let dir = tempdir().unwrap();
        let (ingestor, _) = ingestor(500);
        assert_eq!(
            ingestor.ingest(dir.path()).await.unwrap(),
            IngestOutcome::NoNewDocuments
        );
    }

    #[tokio::test]
    async fn test_missing_directory() {
        let (ingestor, _) = ingestor(500);
        let err = ingestor
            .ingest(Path::new("/definitely/not/here"))
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::SourceMissing(_)));
    }
}

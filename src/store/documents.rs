use super::{Db, Result, StoreError, models::Chunk, serialize_vector};
use rusqlite::params;
use std::collections::{HashMap, HashSet};

impl Db {
    /// Returns the set of sources that already have chunks in the store
    pub fn list_sources(&self) -> Result<HashSet<String>> {
        let mut stmt = self.conn.prepare("SELECT source FROM documents")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut sources = HashSet::new();
        for row in rows {
            sources.insert(row?);
        }
        Ok(sources)
    }

    /// Whether anything has been ingested yet
    pub fn has_documents(&self) -> Result<bool> {
        let found: bool = self
            .conn
            .query_row("SELECT EXISTS(SELECT 1 FROM chunks)", [], |row| row.get(0))?;
        Ok(found)
    }

    pub fn chunk_count(&self) -> Result<usize> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    /// Appends chunks and their embeddings in a single transaction.
    ///
    /// Chunks of a source that is already present are added after its
    /// existing chunks; nothing is replaced.
    pub fn add_documents(&mut self, chunks: &[Chunk<'_>], embeddings: &[Vec<f32>]) -> Result<usize> {
        if chunks.len() != embeddings.len() {
            return Err(StoreError::LengthMismatch {
                chunks: chunks.len(),
                embeddings: embeddings.len(),
            });
        }
        if let Some(bad) = embeddings.iter().find(|e| e.len() != self.dimensions) {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimensions,
                actual: bad.len(),
            });
        }

        let tx = self.conn.transaction()?;
        let mut doc_ids: HashMap<&str, i64> = HashMap::new();

        for (chunk, embedding) in chunks.iter().zip(embeddings) {
            let doc_id = match doc_ids.get(chunk.source) {
                Some(id) => *id,
                None => {
                    let id: i64 = tx.query_row(
                        r#"
                        INSERT INTO documents (source, ingested_at)
                        VALUES (?, CURRENT_TIMESTAMP)
                        ON CONFLICT(source) DO UPDATE SET ingested_at = CURRENT_TIMESTAMP
                        RETURNING id
                        "#,
                        params![chunk.source],
                        |row| row.get(0),
                    )?;
                    doc_ids.insert(chunk.source, id);
                    id
                }
            };

            tx.execute(
                "INSERT INTO chunks (document_id, position, content) VALUES (?, ?, ?)",
                params![doc_id, chunk.position as i64, chunk.content],
            )?;
            let chunk_id = tx.last_insert_rowid();

            tx.execute(
                "INSERT INTO vec_chunks (rowid, embedding) VALUES (?, ?)",
                params![chunk_id, serialize_vector(embedding)],
            )?;
        }

        tx.commit()?;
        Ok(chunks.len())
    }
}

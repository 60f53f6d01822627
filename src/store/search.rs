use super::{Db, Result, StoreError, models::SearchResult, serialize_vector};
use rusqlite::params;

fn map_search_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SearchResult> {
    let distance: f64 = row.get(3)?;

    Ok(SearchResult {
        source: row.get(0)?,
        content: row.get(1)?,
        position: row.get::<_, i64>(2)? as usize,
        similarity: 1.0 - (distance / 2.0),
    })
}

impl Db {
    /// Return the `top_k` chunks closest to `query_vector` by cosine distance
    pub fn search(&self, query_vector: &[f32], top_k: usize) -> Result<Vec<SearchResult>> {
        if query_vector.len() != self.dimensions {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimensions,
                actual: query_vector.len(),
            });
        }

        let mut stmt = self.conn.prepare(
            r#"
            SELECT
                d.source,
                c.content,
                c.position,
                vec_distance_cosine(v.embedding, ?) as distance
            FROM vec_chunks v
            JOIN chunks c ON v.rowid = c.id
            JOIN documents d ON c.document_id = d.id
            ORDER BY distance ASC
            LIMIT ?
            "#,
        )?;
        let rows = stmt.query_map(
            params![serialize_vector(query_vector), top_k as i64],
            map_search_row,
        )?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }

        Ok(results)
    }
}

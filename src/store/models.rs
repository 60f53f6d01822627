/// A chunk ready to be written to the store.
#[derive(Debug, Clone)]
pub struct Chunk<'a> {
    pub source: &'a str,
    pub position: usize,
    pub content: &'a str,
}

/// One nearest-neighbour hit.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub source: String,
    pub content: String,
    pub position: usize,
    pub similarity: f64,
}

/// Retrieval-augmented question answering.
///
/// Embeds the question, retrieves the nearest chunks, "stuffs" them into a
/// single prompt and asks the configured language model.
use std::sync::Arc;

use serde_json::json;
use thiserror::Error;
use tokio::sync::Mutex as TokioMutex;
use tracing::{debug, info, warn};

use crate::embedder::{Embedder, EmbedderError};
use crate::llm::{LanguageModel, LlmError};
use crate::response::{RunResponse, error_chain};
use crate::store::{Db, StoreError, models::SearchResult};

const PROMPT_PREFIX: &str = "Use the following pieces of context to answer the question at the end. \
If you don't know the answer, just say that you don't know, don't try to make up an answer.\n\n";

/// Rough characters-per-token ratio used to size the prompt.
const CHARS_PER_TOKEN: usize = 4;

/// Language model resolved at startup, or the reason it could not be.
pub type ModelSlot = Result<Arc<dyn LanguageModel>, String>;

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("failed to embed query")]
    Embed(#[from] EmbedderError),

    #[error("retrieval failed")]
    Store(#[from] StoreError),

    #[error("generation failed")]
    Llm(#[from] LlmError),

    #[error("query task aborted: {0}")]
    Aborted(String),
}

/// A generated answer and the chunks it was grounded on.
#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<SearchResult>,
}

#[derive(Clone)]
pub struct QueryEngine {
    store: Arc<TokioMutex<Db>>,
    embedder: Arc<dyn Embedder>,
    model: ModelSlot,
    top_k: usize,
}

impl QueryEngine {
    pub fn new(
        store: Arc<TokioMutex<Db>>,
        embedder: Arc<dyn Embedder>,
        model: ModelSlot,
        top_k: usize,
    ) -> Self {
        Self {
            store,
            embedder,
            model,
            top_k,
        }
    }

    /// Name of the configured model, if one is available.
    pub fn model_name(&self) -> Option<&str> {
        self.model.as_ref().ok().map(|m| m.name())
    }

    /// Answer `query` and render the result as a [`RunResponse`].
    pub async fn run(&self, query: &str, hide_source: bool) -> RunResponse {
        let model = match &self.model {
            Ok(model) => Arc::clone(model),
            Err(reason) => return RunResponse::error(reason.clone()),
        };

        match self.answer(model.as_ref(), query).await {
            Ok(answer) => {
                let text = render_answer(&answer, hide_source);
                RunResponse::ok("Success").with_data(json!({
                    "question": query,
                    "answer": text,
                }))
            }
            Err(e) => {
                warn!("Query failed: {e}");
                RunResponse::error(format!("Error querying database: {}", error_chain(&e)))
            }
        }
    }

    /// Retrieve context for `query` and generate an answer.
    pub async fn answer(&self, model: &dyn LanguageModel, query: &str) -> Result<Answer, QueryError> {
        let embedder = Arc::clone(&self.embedder);
        let text = query.to_string();
        let vector = tokio::task::spawn_blocking(move || embedder.embed(&text))
            .await
            .map_err(|e| QueryError::Aborted(e.to_string()))??;

        let sources = self.store.lock().await.search(&vector, self.top_k)?;
        debug!("Retrieved {} chunks", sources.len());

        let budget = model
            .context_window()
            .saturating_sub(model.max_tokens())
            .saturating_mul(CHARS_PER_TOKEN);
        let prompt = build_prompt(query, &sources, budget);

        info!("Querying {} with {} prompt chars", model.name(), prompt.len());
        let text = model.generate(&prompt).await?.trim().to_string();
        Ok(Answer { text, sources })
    }
}

/// Build the "stuff" prompt, dropping trailing chunks that exceed `budget` chars.
pub fn build_prompt(query: &str, chunks: &[SearchResult], budget: usize) -> String {
    let suffix = format!("\n\nQuestion: {query}\nHelpful Answer:");
    let mut used = PROMPT_PREFIX.chars().count() + suffix.chars().count();

    let mut context: Vec<&str> = Vec::new();
    for chunk in chunks {
        let len = chunk.content.chars().count() + if context.is_empty() { 0 } else { 2 };
        if used + len > budget {
            debug!("Prompt budget reached after {} chunks", context.len());
            break;
        }
        used += len;
        context.push(&chunk.content);
    }

    format!("{PROMPT_PREFIX}{}{suffix}", context.join("\n\n"))
}

/// The answer text, followed by citations unless `hide_source`.
pub fn render_answer(answer: &Answer, hide_source: bool) -> String {
    let mut text = answer.text.clone();
    if hide_source || answer.sources.is_empty() {
        return text;
    }
    text.push_str("\n\nSources:");
    for doc in &answer.sources {
        text.push_str(&format!("\n\n{} ({})", doc.content, doc.source));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::mock::MockEmbedder;
    use crate::llm::mock::MockLanguageModel;
    use crate::store::models::Chunk;

    fn result(source: &str, content: &str) -> SearchResult {
        SearchResult {
            source: source.into(),
            content: content.into(),
            position: 0,
            similarity: 0.9,
        }
    }

    async fn engine_with(
        docs: &[(&str, &str)],
        model: Arc<MockLanguageModel>,
    ) -> QueryEngine {
        let embedder = Arc::new(MockEmbedder::new(16));
        let mut db = Db::open_in_memory(16).unwrap();
        if !docs.is_empty() {
            let chunks: Vec<Chunk<'_>> = docs
                .iter()
                .map(|(source, content)| Chunk {
                    source,
                    position: 0,
                    content,
                })
                .collect();
            let vectors: Vec<Vec<f32>> = docs
                .iter()
                .map(|(_, c)| embedder.embed(c).unwrap())
                .collect();
            db.add_documents(&chunks, &vectors).unwrap();
        }
        QueryEngine::new(
            Arc::new(TokioMutex::new(db)),
            embedder,
            Ok(model as Arc<dyn LanguageModel>),
            4,
        )
    }

    #[test]
    fn test_build_prompt_layout() {
        let chunks = [result("a.txt", "alpha"), result("b.txt", "beta")];
        let prompt = build_prompt("What?", &chunks, 10_000);
        assert!(prompt.starts_with("Use the following pieces of context"));
        assert!(prompt.contains("make up an answer.\n\nalpha\n\nbeta\n\nQuestion: What?\nHelpful Answer:"));
    }

    #[test]
    fn test_build_prompt_drops_chunks_over_budget() {
        let chunks = [result("a.txt", "alpha"), result("b.txt", &"x".repeat(500))];
        let base = build_prompt("What?", &[], usize::MAX).chars().count();
        let prompt = build_prompt("What?", &chunks, base + 10);
        assert!(prompt.contains("alpha"));
        assert!(!prompt.contains("xxxx"));
    }

    #[test]
    fn test_render_answer_sources() {
        let answer = Answer {
            text: "Because.".into(),
            sources: vec![result("/docs/nato.txt", "NATO was founded in 1949.")],
        };
        assert_eq!(
            render_answer(&answer, false),
            "Because.\n\nSources:\n\nNATO was founded in 1949. (/docs/nato.txt)"
        );
        assert_eq!(render_answer(&answer, true), "Because.");
    }

    #[tokio::test]
    async fn test_run_with_sources() {
        let model = Arc::new(MockLanguageModel::answering("  For collective defence. "));
        let engine = engine_with(&[("/docs/nato.txt", "NATO was founded in 1949.")], model.clone()).await;

        let res = engine.run("Why was NATO created?", false).await;
        assert!(res.is_ok(), "{res:?}");
        let data = res.data.unwrap();
        assert_eq!(data["question"], "Why was NATO created?");
        let answer = data["answer"].as_str().unwrap();
        assert!(answer.starts_with("For collective defence.\n\nSources:"));
        assert!(answer.contains("(/docs/nato.txt)"));

        let prompts = model.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("NATO was founded in 1949."));
    }

    #[tokio::test]
    async fn test_run_hide_source() {
        let model = Arc::new(MockLanguageModel::answering("For collective defence."));
        let engine = engine_with(&[("/docs/nato.txt", "NATO was founded in 1949.")], model).await;

        let res = engine.run("Why was NATO created?", true).await;
        let answer = res.data.unwrap()["answer"].as_str().unwrap().to_string();
        assert_eq!(answer, "For collective defence.");
        assert!(!answer.contains("Sources:"));
    }

    #[tokio::test]
    async fn test_small_context_window_leaves_out_chunks() {
        // (100 - 64 reserved) * 4 chars is shorter than the template alone
        let model = Arc::new(MockLanguageModel::answering("Unsure.").with_context_window(100));
        let engine = engine_with(&[("/docs/nato.txt", "NATO was founded in 1949.")], model.clone()).await;

        let res = engine.run("Why was NATO created?", false).await;
        assert!(res.is_ok());

        let prompts = model.prompts();
        assert!(!prompts[0].contains("NATO was founded in 1949."));
        assert!(prompts[0].ends_with("Question: Why was NATO created?\nHelpful Answer:"));
        // Citations still list what was retrieved
        assert!(res.data.unwrap()["answer"].as_str().unwrap().contains("Sources:"));
    }

    #[tokio::test]
    async fn test_run_empty_store_has_no_citations() {
        let model = Arc::new(MockLanguageModel::answering("I don't know."));
        let engine = engine_with(&[], model).await;

        let res = engine.run("Anything?", false).await;
        assert_eq!(res.data.unwrap()["answer"], "I don't know.");
    }

    #[tokio::test]
    async fn test_run_model_failure() {
        let model = Arc::new(MockLanguageModel::failing("backend offline"));
        let engine = engine_with(&[("/docs/a.txt", "alpha")], model).await;

        let res = engine.run("Why?", false).await;
        assert!(!res.is_ok());
        assert!(res.message.starts_with("Error querying database: "));
        assert!(res.message.contains("backend offline"));
    }

    #[tokio::test]
    async fn test_run_without_model() {
        let engine = QueryEngine::new(
            Arc::new(TokioMutex::new(Db::open_in_memory(16).unwrap())),
            Arc::new(MockEmbedder::new(16)),
            Err("Model Falcon not supported!".into()),
            4,
        );
        let res = engine.run("Why?", false).await;
        assert_eq!(res, RunResponse::error("Model Falcon not supported!"));
    }
}

//! Hybrid lexical + vector class retrieval (spec §4.1, §4.5, §6).

use super::docform::class_document_form;
use super::OntologyContext;
use crate::error::{Error, Result};
use crate::types::{ClassDefinition, Iri};
use async_trait::async_trait;
use cached::proc_macro::cached;
use reqwest::Client;
use rust_stemmers::{Algorithm, Stemmer};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::Duration;

/// The optional remote collaborator behind `searchByText` (spec §6). A
/// context without one degrades to lexical-only search.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Returns up to `k` `(class IRI, similarity score)` pairs, highest
    /// score first. A `Content`-class [`Error`] here is recovered by the
    /// caller, not propagated.
    async fn search_by_text(&self, query: &str, k: usize) -> Result<Vec<(Iri, f64)>>;
}

/// `hashEmbeddingKey(text, taskType)` (spec §8): a 64-hex-char SHA-256
/// digest used as the cache/lookup key for an embedding. The NUL separator
/// gives it the same collision-resistance contract as
/// `ClaimFactory::content_id` — `"abc"` + `"xyz"` cannot collide with
/// `"ab"` + `"cxyz"`.
#[must_use]
pub fn hash_embedding_key(text: &str, task_type: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hasher.update(b"\0");
    hasher.update(task_type.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Deserialize)]
struct EmbeddingSearchHit {
    id: String,
    score: f64,
}

/// A `reqwest`-backed [`VectorIndex`] over a remote embedding search
/// endpoint (spec §6's optional vector index collaborator), mirroring the
/// teacher's `entity_linker.rs` `Client::builder()`-per-call pattern.
/// Results are memoized for one hour per `(endpoint, hashEmbeddingKey(query,
/// taskType), k)`, the same `#[cached]` idiom the teacher uses for its
/// DBpedia Spotlight lookups.
pub struct RemoteVectorIndex {
    endpoint: String,
    task_type: String,
}

impl RemoteVectorIndex {
    #[must_use]
    pub fn new(endpoint: impl Into<String>, task_type: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            task_type: task_type.into(),
        }
    }
}

#[async_trait]
impl VectorIndex for RemoteVectorIndex {
    async fn search_by_text(&self, query: &str, k: usize) -> Result<Vec<(Iri, f64)>> {
        search_by_text_cached(
            self.endpoint.clone(),
            self.task_type.clone(),
            query.to_string(),
            k,
        )
        .await
    }
}

/// Cached remote embedding search call.
///
/// Caches results for 1 hour to reduce load on the embedding service.
#[cached(
    time = 3600,
    result = true,
    key = "String",
    convert = r#"{ format!("{}-{}-{}", endpoint, hash_embedding_key(&query, &task_type), k) }"#
)]
async fn search_by_text_cached(
    endpoint: String,
    task_type: String,
    query: String,
    k: usize,
) -> Result<Vec<(Iri, f64)>> {
    let client = Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| Error::Network(e.to_string()))?;

    let response = client
        .post(format!("{endpoint}/search"))
        .json(&serde_json::json!({ "query": query, "taskType": task_type, "k": k }))
        .send()
        .await
        .map_err(|e| Error::Network(format!("vector index request failed: {e}")))?;

    if !response.status().is_success() {
        return Ok(Vec::new());
    }

    let hits: Vec<EmbeddingSearchHit> = response
        .json()
        .await
        .map_err(|e| Error::Network(format!("failed to parse vector index response: {e}")))?;

    Ok(hits.into_iter().map(|h| (h.id, h.score)).collect())
}

fn tokenize(text: &str) -> Vec<String> {
    let stemmer = Stemmer::create(Algorithm::English);
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|tok| !tok.is_empty())
        .map(|tok| stemmer.stem(&tok.to_lowercase()).into_owned())
        .collect()
}

/// Lexical score for a query against a class's document form: mean of the
/// best Jaro-Winkler match in the document for each stemmed query token,
/// plus a small bonus for exact stemmed-token overlap. Bounded to `[0, 1]`,
/// deterministic for a fixed query and document.
fn lexical_score(query_tokens: &[String], doc_tokens: &[String]) -> f64 {
    if query_tokens.is_empty() || doc_tokens.is_empty() {
        return 0.0;
    }

    let mut total = 0.0;
    for q in query_tokens {
        let best = doc_tokens
            .iter()
            .map(|d| {
                if d == q {
                    1.0
                } else {
                    strsim::jaro_winkler(q, d)
                }
            })
            .fold(0.0_f64, f64::max);
        total += best;
    }
    total / query_tokens.len() as f64
}

/// Combines lexical and (if present) vector scores, ranks classes, and
/// returns the top `k`. Ties break on lexical score, then on declaration
/// order, so results are fully deterministic for a fixed ontology snapshot.
///
/// Never panics on an empty ontology: it simply returns an empty list.
/// Returns [`Error::OntologyIndexUnavailable`] only when there are classes
/// to search but nothing usable found any of them (the caller falls back
/// to [`OntologyContext::first_k_classes`]).
pub(super) async fn search_classes_hybrid(
    ctx: &OntologyContext,
    query: &str,
    k: usize,
) -> Result<Vec<ClassDefinition>> {
    if ctx.class_count() == 0 {
        return Ok(Vec::new());
    }

    let query_tokens = tokenize(query);

    let vector_scores: HashMap<Iri, f64> = if let Some(index) = ctx.vector_index() {
        match index.search_by_text(query, k.max(1) * 4).await {
            Ok(hits) => hits.into_iter().collect(),
            Err(err) => {
                tracing::debug!(error = %err, "vector index search failed, degrading to lexical-only");
                HashMap::new()
            }
        }
    } else {
        HashMap::new()
    };

    let mut scored: Vec<(f64, f64, usize, ClassDefinition)> = Vec::new();
    for (order, class) in ctx.classes().enumerate() {
        let doc = class_document_form(class);
        let doc_tokens = tokenize(&doc);
        let lexical = lexical_score(&query_tokens, &doc_tokens);
        let vector = vector_scores.get(&class.id).copied();

        let combined = match vector {
            Some(v) => 0.5 * lexical + 0.5 * v,
            None => lexical,
        };

        scored.push((combined, lexical, order, class.clone()));
    }

    if scored.iter().all(|(combined, _, _, _)| *combined == 0.0) && vector_scores.is_empty() {
        return Err(Error::OntologyIndexUnavailable(
            "no lexical or vector match for query".to_string(),
        ));
    }

    scored.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal))
            .then_with(|| a.2.cmp(&b.2))
    });

    Ok(scored.into_iter().take(k).map(|(_, _, _, c)| c).collect())
}

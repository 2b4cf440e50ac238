//! # ontograph-extract
//!
//! Streaming extraction of an ontology-grounded knowledge graph from
//! unstructured text (news articles, press releases, web pages), validated
//! and corrected against SHACL shapes derived from the ontology itself.
//!
//! The crate is organized around the six-phase stream described in the
//! design notes: chunk the document, retrieve candidate ontology classes
//! per chunk, extract entities and relations constrained to those
//! candidates, ground both against the source text, merge per-chunk
//! fragments into one graph, and then iteratively validate/correct that
//! graph against generated SHACL shapes.
//!
//! ## Example
//!
//! ```rust,no_run
//! use ontograph_extract::{ExtractionWorkflow, RunConfig};
//! use ontograph_extract::llm::GenAiClient;
//! use ontograph_extract::ontology::OntologyContext;
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! # async fn run() -> ontograph_extract::error::Result<()> {
//! let ontology = OntologyContext::new(vec![], vec![], HashMap::new(), HashMap::new(), HashMap::new())?;
//! let llm = Arc::new(GenAiClient::new("gpt-4o"));
//! let workflow = ExtractionWorkflow::new(ontology, llm);
//!
//! let graph = workflow
//!     .extract("Alice works at Acme Corp.", &RunConfig::default(), None)
//!     .await?;
//! println!("{} entities", graph.entities.len());
//! # Ok(())
//! # }
//! ```

pub mod chunking;
pub mod claims;
pub mod class_retriever;
pub mod corrector;
pub mod driver;
pub mod entity_extractor;
pub mod error;
pub mod grounder;
pub mod llm;
pub mod mention_extractor;
pub mod merge;
pub mod ontology;
pub mod property_scoper;
pub mod relation_extractor;
pub mod shacl;
pub mod store;
pub mod types;
pub mod validation_loop;

pub use chunking::Chunker;
pub use claims::{Claim, ClaimFactory, ClaimObject, ClaimOptions, ClaimRank};
pub use corrector::{BatchCorrectionResult, Corrector};
pub use driver::{
    CancellationToken, StreamingDriver, DEFAULT_CONCURRENCY, DEFAULT_RELATION_GROUNDING_THRESHOLD,
};
pub use error::{Error, ExtractionError, Result};
pub use llm::LlmClient;
pub use ontology::{hash_embedding_key, OntologyContext, RemoteVectorIndex, VectorIndex};
pub use shacl::{ShaclValidator, ShapeGenerator};
pub use store::{OxigraphStore, RdfStore};
pub use types::{Entity, KnowledgeGraph, Relation, TextChunk};
pub use validation_loop::{LoopConfig, ValidationCorrectionLoop, ValidationCorrectionResult};

use std::sync::Arc;

/// Chunking knobs for a single `extract` call (spec §4.2, §6).
#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    pub max_chunk_size: usize,
    pub preserve_sentences: bool,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: 2000,
            preserve_sentences: true,
        }
    }
}

/// Identifies the ontology snapshot a run was performed against (spec §6):
/// `source` names where it was loaded from (e.g. a storage path or URL),
/// `version` is caller-supplied and opaque to the core.
#[derive(Debug, Clone)]
pub struct OntologySource {
    pub source: String,
    pub version: String,
}

/// `RunConfig` (spec §6): the caller-facing configuration for one
/// `ExtractionWorkflow::extract` call. `relation_grounding_threshold`
/// surfaces the spec §9 open question — the source hard-codes 0.8, this
/// crate exposes it as a knob defaulting to the same value.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub chunking: ChunkingConfig,
    pub concurrency: usize,
    pub ontology: Option<OntologySource>,
    pub class_retriever_k: usize,
    pub relation_grounding_threshold: f64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            chunking: ChunkingConfig::default(),
            concurrency: driver::DEFAULT_CONCURRENCY,
            ontology: None,
            class_retriever_k: 100,
            relation_grounding_threshold: driver::DEFAULT_RELATION_GROUNDING_THRESHOLD,
        }
    }
}

/// The crate's single entry point (spec §6): `ExtractionWorkflow.extract`.
/// Owns an immutable [`OntologyContext`] snapshot and an LLM client, and
/// wires a [`Chunker`] + [`StreamingDriver`] per call using that call's
/// [`RunConfig`].
pub struct ExtractionWorkflow {
    ontology: OntologyContext,
    llm: Arc<dyn LlmClient>,
}

impl ExtractionWorkflow {
    #[must_use]
    pub fn new(ontology: OntologyContext, llm: Arc<dyn LlmClient>) -> Self {
        Self { ontology, llm }
    }

    /// Chunks `text`, runs the streaming driver over the chunks, and
    /// returns the merged graph. On success returns a graph even if some
    /// chunks recovered to empty fragments (spec §7: content failures never
    /// fail the whole extraction). On a systemic failure, returns an
    /// [`ExtractionError`] wrapping the originating cause and a bounded
    /// preview of `text` (spec §7).
    ///
    /// `concurrency` overrides `run_config.concurrency` when provided,
    /// matching the optional third argument in spec §6's signature.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractionError`] if a systemic error (LLM rate limit or
    /// timeout, network/store connectivity loss) aborts the stream, or if
    /// the run is cancelled.
    pub async fn extract(
        &self,
        text: &str,
        run_config: &RunConfig,
        concurrency: Option<usize>,
    ) -> std::result::Result<KnowledgeGraph, ExtractionError> {
        let chunker = Chunker::new(
            run_config.chunking.max_chunk_size,
            run_config.chunking.preserve_sentences,
        );
        let chunks = chunker.chunk(text);
        if chunks.is_empty() {
            return Ok(KnowledgeGraph::empty());
        }

        let driver = StreamingDriver::new(
            self.ontology.clone(),
            self.llm.clone(),
            run_config.class_retriever_k,
            run_config.relation_grounding_threshold,
        );

        let span = tracing::info_span!(
            "extraction-pipeline",
            chunk.count = chunks.len(),
            chunk.text_length = text.chars().count()
        );
        let _enter = span.enter();

        driver
            .run(
                chunks,
                concurrency.unwrap_or(run_config.concurrency),
                CancellationToken::new(),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn empty_ontology() -> OntologyContext {
        OntologyContext::new(vec![], vec![], HashMap::new(), HashMap::new(), HashMap::new())
            .expect("empty ontology is acyclic")
    }

    struct EmptyLlm;

    #[async_trait::async_trait]
    impl LlmClient for EmptyLlm {
        async fn generate_object(
            &self,
            _system_prompt: &str,
            _user_prompt: &str,
        ) -> error::Result<serde_json::Value> {
            Ok(serde_json::json!({ "items": [] }))
        }
    }

    #[tokio::test]
    async fn empty_text_short_circuits_to_empty_graph() {
        let workflow = ExtractionWorkflow::new(empty_ontology(), Arc::new(EmptyLlm));
        let graph = workflow
            .extract("", &RunConfig::default(), None)
            .await
            .expect("empty text never fails");
        assert!(graph.entities.is_empty());
        assert!(graph.relations.is_empty());
    }

    #[test]
    fn run_config_default_matches_spec_threshold() {
        let config = RunConfig::default();
        assert_eq!(config.relation_grounding_threshold, 0.8);
        assert_eq!(config.concurrency, DEFAULT_CONCURRENCY);
    }
}

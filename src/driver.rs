//! Streaming Driver (spec §4.11, §5, §9): fans a document's chunks out over
//! a bounded worker pool, runs the full per-chunk pipeline unordered, and
//! folds the resulting fragments into one [`KnowledgeGraph`].
//!
//! Generalizes the teacher's sequential per-chunk loop
//! (`extractor.rs::extract_from_document`) into a concurrent, unordered one:
//! chunks don't depend on each other's output, so ordering only matters for
//! the final fold, which is commutative up to log order (spec §4.10).

use crate::class_retriever::ClassRetriever;
use crate::entity_extractor::EntityExtractor;
use crate::error::{Error, ExtractionError, Result};
use crate::grounder::{Grounder, RelationGroundingInput};
use crate::llm::LlmClient;
use crate::mention_extractor::MentionExtractor;
use crate::merge::GraphMerger;
use crate::ontology::OntologyContext;
use crate::property_scoper::PropertyScoper;
use crate::relation_extractor::RelationExtractor;
use crate::types::{Entity, Evidence, Iri, KnowledgeGraph, RangeType, TextChunk};
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::Instrument;

/// A cooperative cancellation flag shared between the driver and every
/// in-flight chunk task. Checked at each phase boundary rather than
/// enforced by interrupting a task mid-call: a chunk already inside an LLM
/// call runs that call to completion, but no further phase starts once
/// cancellation is observed (spec §9: cancellation is cooperative, not
/// preemptive).
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Default relation-grounding acceptance threshold (spec §4.7, §8; surfaced
/// as `RunConfig::relation_grounding_threshold` per the spec §9 Open
/// Question decision recorded in DESIGN.md).
pub const DEFAULT_RELATION_GROUNDING_THRESHOLD: f64 = 0.8;

/// Default worker-pool width when the caller does not override it.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// The per-chunk pipeline plus the fan-out/fold machinery around it (spec
/// §4.11). Holds no document-specific state; one instance serves an entire
/// extraction run, and every collaborator is cheap to clone (each wraps an
/// `Arc<dyn LlmClient>` or a plain `usize`) so a fresh copy travels into
/// each spawned chunk task.
#[derive(Clone)]
pub struct StreamingDriver {
    ontology: OntologyContext,
    mention_extractor: MentionExtractor,
    class_retriever: ClassRetriever,
    entity_extractor: EntityExtractor,
    grounder: Grounder,
    relation_extractor: RelationExtractor,
    relation_grounding_threshold: f64,
}

impl StreamingDriver {
    #[must_use]
    pub fn new(
        ontology: OntologyContext,
        llm: Arc<dyn LlmClient>,
        class_retriever_k: usize,
        relation_grounding_threshold: f64,
    ) -> Self {
        Self {
            ontology,
            mention_extractor: MentionExtractor::new(llm.clone()),
            class_retriever: ClassRetriever::new(class_retriever_k),
            entity_extractor: EntityExtractor::new(llm.clone()),
            grounder: Grounder::new(llm.clone()),
            relation_extractor: RelationExtractor::new(llm),
            relation_grounding_threshold,
        }
    }

    /// Runs the full pipeline over `chunks` with at most `concurrency`
    /// chunks executing at once (spec §4.11). Systemic errors abort the run
    /// and propagate; content/defect errors recover to an empty fragment for
    /// that chunk and the stream continues. Cancellation discards every
    /// fragment produced so far — no partial result is ever emitted.
    ///
    /// Two bounds apply, matching the producer/bounded-buffer/folder model
    /// of spec §9: a `concurrency`-wide semaphore bounds how many chunk
    /// tasks actually execute at once, and a separate `2 × concurrency`
    /// semaphore bounds how many completed-but-not-yet-folded fragments may
    /// exist at once (spec §4.11/§5's "bounded buffer of capacity `2 × N`
    /// between stage output and the fold"). A chunk task releases its
    /// *worker* permit as soon as it finishes processing, but holds its
    /// *pending-fragment* permit until the fragment has actually been
    /// folded into the running accumulator below — once that buffer fills,
    /// the spawn loop blocks before starting the next chunk, instead of
    /// accumulating an unbounded `Vec<KnowledgeGraph>` for one final
    /// collect-then-reduce pass.
    pub async fn run(
        &self,
        chunks: Vec<TextChunk>,
        concurrency: usize,
        cancellation: CancellationToken,
    ) -> std::result::Result<KnowledgeGraph, ExtractionError> {
        let concurrency = concurrency.max(1);
        let worker_slots = Arc::new(Semaphore::new(concurrency));
        let pending_fragment_slots = Arc::new(Semaphore::new(2 * concurrency));
        let mut tasks = FuturesUnordered::new();

        for chunk in chunks {
            if cancellation.is_cancelled() {
                break;
            }
            // Reserve a slot in the bounded output buffer first: if the
            // fold can't keep up, this is where upstream pauses.
            let Ok(pending_permit) = Arc::clone(&pending_fragment_slots)
                .acquire_owned()
                .await
            else {
                break;
            };
            let Ok(worker_permit) = Arc::clone(&worker_slots).acquire_owned().await else {
                break;
            };

            let driver = self.clone();
            let token = cancellation.clone();
            let chunk_index = chunk.index;
            let chunk_len = chunk.text.chars().count();
            let span = tracing::info_span!(
                "chunk-processing",
                chunk.index = chunk_index,
                chunk.text_length = chunk_len
            );

            // Spawning gives each chunk its own task, so a panic surfaces
            // as a `JoinError` (classified as a defect below) instead of
            // taking down the whole driver. The worker permit is dropped
            // the moment processing finishes, freeing that execution slot
            // for the next chunk even while this fragment still waits to
            // be folded; the pending-fragment permit travels back out with
            // the result and is only released once folded.
            let handle = tokio::spawn(
                async move {
                    let result = driver.process_chunk(&chunk, &token).await;
                    drop(worker_permit);
                    (result, pending_permit)
                }
                .instrument(span),
            );
            tasks.push(handle);
        }

        let mut graph = KnowledgeGraph::empty();
        let mut folded_count = 0usize;
        let mut systemic: Option<Error> = None;

        while let Some(joined) = tasks.next().await {
            match joined {
                Ok((Ok(fragment), pending_permit)) => {
                    graph = GraphMerger::merge(graph, fragment);
                    folded_count += 1;
                    drop(pending_permit);
                }
                Ok((Err(err), pending_permit)) if err.is_systemic() => {
                    tracing::error!(
                        error = %err,
                        error_type = err.error_type(),
                        "systemic error, aborting extraction"
                    );
                    cancellation.cancel();
                    systemic = Some(err);
                    drop(pending_permit);
                    break;
                }
                Ok((Err(err), pending_permit)) => {
                    tracing::warn!(
                        chunk.failed = true,
                        chunk.error_type = err.error_type(),
                        error = %err,
                        "chunk failed, recovering to an empty fragment"
                    );
                    graph = GraphMerger::merge(graph, KnowledgeGraph::empty());
                    folded_count += 1;
                    drop(pending_permit);
                }
                Err(join_err) => {
                    // The task panicked before it could return its
                    // pending-fragment permit; the permit's `Drop` impl
                    // still returns it to the semaphore, so the buffer
                    // bound holds even on a defect.
                    tracing::warn!(
                        chunk.failed = true,
                        chunk.error_type = "defect",
                        error = %join_err,
                        "chunk task panicked, recovering to an empty fragment"
                    );
                    graph = GraphMerger::merge(graph, KnowledgeGraph::empty());
                    folded_count += 1;
                }
            }
        }

        // Drain whatever was still in flight when a systemic error fired so
        // every in-flight task has a chance to observe cancellation before
        // we return.
        while tasks.next().await.is_some() {}

        if let Some(err) = systemic {
            return Err(ExtractionError::new(err, ""));
        }
        if cancellation.is_cancelled() {
            return Err(ExtractionError::new(
                Error::Extraction("extraction cancelled".to_string()),
                "",
            ));
        }

        let merge_span = tracing::info_span!("graph-merge", fragment.count = folded_count);
        let _enter = merge_span.enter();
        tracing::info!("folded all chunk fragments");
        Ok(graph)
    }

    /// The per-chunk pipeline (spec §4.11): mentions → candidate classes →
    /// candidate datatype properties → entities → entity grounding →
    /// (short-circuit if no entities) → scoped properties → (short-circuit
    /// if fewer than 2 entities or 0 scoped properties) → relations →
    /// relation grounding → fragment.
    async fn process_chunk(
        &self,
        chunk: &TextChunk,
        cancellation: &CancellationToken,
    ) -> Result<KnowledgeGraph> {
        if cancellation.is_cancelled() {
            return Ok(KnowledgeGraph::empty());
        }

        let mentions = self.mention_extractor.extract(&chunk.text).await?;
        let candidate_classes = self
            .class_retriever
            .retrieve_candidates(&self.ontology, &mentions, None)
            .await;
        let candidate_datatype_properties: Vec<_> = candidate_classes
            .iter()
            .flat_map(|c| self.ontology.get_properties_for_class(&c.id))
            .filter(|p| p.range_type == RangeType::Datatype)
            .cloned()
            .collect();

        if cancellation.is_cancelled() {
            return Ok(KnowledgeGraph::empty());
        }

        let entities = {
            let entity_extraction_span =
                tracing::info_span!("chunk-entity-extraction", chunk.index = chunk.index);
            let _enter = entity_extraction_span.enter();
            self.entity_extractor
                .extract(
                    &chunk.text,
                    &candidate_classes,
                    &candidate_datatype_properties,
                    chunk.index,
                )
                .await?
        };

        if entities.is_empty() {
            tracing::info!(
                entity.count = 0,
                relation.count = 0,
                "no entities extracted from chunk, yielding empty fragment"
            );
            return Ok(KnowledgeGraph::empty());
        }

        if cancellation.is_cancelled() {
            return Ok(KnowledgeGraph::empty());
        }

        let entity_verdicts = {
            let grounding_span = tracing::info_span!(
                "chunk-grounding",
                chunk.index = chunk.index,
                entity.count = entities.len()
            );
            let _enter = grounding_span.enter();
            self.grounder.verify_entity_batch(&chunk.text, &entities).await?
        };

        let mut grounded_entities = entities;
        for entity in &mut grounded_entities {
            if let Some(verdict) = entity_verdicts.get(&entity.id) {
                entity.grounding_confidence = Some(verdict.confidence);
            }
        }

        let type_iris = Self::unique_type_iris(&grounded_entities);
        let scoped_properties = PropertyScoper::properties_for(&self.ontology, &type_iris);

        if grounded_entities.len() < 2 || scoped_properties.is_empty() {
            tracing::info!(
                entity.count = grounded_entities.len(),
                relation.count = 0,
                "too few entities or no scoped properties, skipping relation extraction"
            );
            return Ok(KnowledgeGraph {
                entities: grounded_entities,
                relations: Vec::new(),
            });
        }

        if cancellation.is_cancelled() {
            return Ok(KnowledgeGraph {
                entities: grounded_entities,
                relations: Vec::new(),
            });
        }

        let relations = self
            .relation_extractor
            .extract(&self.ontology, &chunk.text, &grounded_entities, &scoped_properties)
            .await?;

        let kept_relations = if relations.is_empty() {
            Vec::new()
        } else {
            let entities_by_id: HashMap<&str, &Entity> =
                grounded_entities.iter().map(|e| (e.id.as_str(), e)).collect();
            let grounding_inputs: Vec<RelationGroundingInput> = relations
                .iter()
                .filter_map(|r| {
                    entities_by_id.get(r.subject_id.as_str()).map(|subject| RelationGroundingInput {
                        subject: (*subject).clone(),
                        predicate: r.predicate.clone(),
                        object: r.object.clone(),
                    })
                })
                .collect();

            let grounding_span = tracing::info_span!(
                "chunk-grounding",
                chunk.index = chunk.index,
                relation.count = grounding_inputs.len()
            );
            let _enter = grounding_span.enter();
            let relation_verdicts = self
                .grounder
                .verify_relation_batch(&chunk.text, &grounding_inputs)
                .await?;
            drop(_enter);

            relations
                .into_iter()
                .zip(relation_verdicts)
                .filter_map(|(mut relation, verdict)| {
                    if verdict.grounded && verdict.confidence >= self.relation_grounding_threshold {
                        relation.evidence = Some(Evidence {
                            text: String::new(),
                            start_char: chunk.start_offset,
                            end_char: chunk.end_offset,
                            confidence: Some(verdict.confidence),
                        });
                        Some(relation)
                    } else {
                        tracing::debug!(
                            subject = %relation.subject_id,
                            predicate = %relation.predicate,
                            confidence = verdict.confidence,
                            "dropping ungrounded relation"
                        );
                        None
                    }
                })
                .collect()
        };

        tracing::info!(
            entity.count = grounded_entities.len(),
            relation.count = kept_relations.len(),
            "chunk fragment complete"
        );

        Ok(KnowledgeGraph {
            entities: grounded_entities,
            relations: kept_relations,
        })
    }

    fn unique_type_iris(entities: &[Entity]) -> Vec<Iri> {
        let mut seen = HashSet::new();
        entities
            .iter()
            .flat_map(|e| e.types.iter().cloned())
            .filter(|t| seen.insert(t.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ClassDefinition, PropertyDefinition, RangeType as RT};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::HashMap as StdHashMap;
    use std::sync::Mutex;

    /// An LLM whose next response is picked by inspecting the user prompt,
    /// so one fake can stand in for all five chunk-level phases (mirrors
    /// the script-by-content fakes the teacher uses in `extractor.rs`'s
    /// tests, generalized across more than one call shape).
    struct ScriptedLlm {
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedLlm {
        fn new() -> Self {
            Self { calls: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn generate_object(&self, system_prompt: &str, user_prompt: &str) -> Result<Value> {
            self.calls.lock().unwrap().push(system_prompt.to_string());
            if system_prompt.contains("surface-form mentions") {
                return Ok(json!({"mentions": [{"mention": "Alan Bean", "context": "an astronaut"}]}));
            }
            if system_prompt.contains("typed entities") {
                return Ok(json!({"entities": [
                    {"id": "e1", "mention": "Alan Bean", "types": ["http://ex.org/Person"], "attributes": {}},
                    {"id": "e2", "mention": "NASA", "types": ["http://ex.org/Organization"], "attributes": {}}
                ]}));
            }
            if system_prompt.contains("verify whether each candidate entity") {
                return Ok(json!({"results": [
                    {"id": "e1", "grounded": true, "confidence": 0.95},
                    {"id": "e2", "grounded": true, "confidence": 0.9}
                ]}));
            }
            if system_prompt.contains("extract relations") {
                return Ok(json!({"relations": [
                    {"subjectId": "e1", "predicate": "http://ex.org/worksFor", "objectId": "e2"}
                ]}));
            }
            if system_prompt.contains("verify whether each candidate relation") {
                let _ = user_prompt;
                return Ok(json!({"results": [{"index": 0, "grounded": true, "confidence": 0.9}]}));
            }
            Ok(json!({}))
        }
    }

    fn ontology_with_person_and_org() -> OntologyContext {
        let person = ClassDefinition::new("http://ex.org/Person", "Person");
        let org = ClassDefinition::new("http://ex.org/Organization", "Organization");
        let mut works_for = PropertyDefinition::new("http://ex.org/worksFor", "works for", RT::Object);
        works_for.domain = vec!["http://ex.org/Person".to_string()];
        works_for.range = vec!["http://ex.org/Organization".to_string()];
        OntologyContext::new(
            vec![person, org],
            vec![works_for],
            StdHashMap::new(),
            StdHashMap::new(),
            StdHashMap::new(),
        )
        .unwrap()
    }

    fn chunk(index: usize, text: &str) -> TextChunk {
        TextChunk {
            index,
            text: text.to_string(),
            start_offset: 0,
            end_offset: text.chars().count(),
        }
    }

    #[tokio::test]
    async fn single_chunk_produces_entities_and_grounded_relation() {
        let ontology = ontology_with_person_and_org();
        let llm = Arc::new(ScriptedLlm::new());
        let driver = StreamingDriver::new(ontology, llm, 10, DEFAULT_RELATION_GROUNDING_THRESHOLD);

        let graph = driver
            .run(
                vec![chunk(0, "Alan Bean worked at NASA.")],
                DEFAULT_CONCURRENCY,
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(graph.entities.len(), 2);
        assert_eq!(graph.relations.len(), 1);
        assert_eq!(graph.relations[0].subject_id, "e1");
    }

    #[tokio::test]
    async fn multiple_chunks_merge_into_one_graph() {
        let ontology = ontology_with_person_and_org();
        let llm = Arc::new(ScriptedLlm::new());
        let driver = StreamingDriver::new(ontology, llm, 10, DEFAULT_RELATION_GROUNDING_THRESHOLD);

        let chunks = vec![
            chunk(0, "Alan Bean worked at NASA."),
            chunk(1, "Alan Bean worked at NASA."),
        ];
        let graph = driver.run(chunks, 2, CancellationToken::new()).await.unwrap();

        // Both chunks extract the same entity ids, so the fold merges them
        // into one copy of each rather than duplicating (spec §4.10).
        assert_eq!(graph.entities.len(), 2);
        assert_eq!(graph.relations.len(), 1);
    }

    struct AlwaysRateLimited;

    #[async_trait]
    impl LlmClient for AlwaysRateLimited {
        async fn generate_object(&self, _system_prompt: &str, _user_prompt: &str) -> Result<Value> {
            Err(Error::LlmRateLimit("429".to_string()))
        }
    }

    #[tokio::test]
    async fn systemic_error_aborts_and_propagates() {
        let ontology = ontology_with_person_and_org();
        let llm = Arc::new(AlwaysRateLimited);
        let driver = StreamingDriver::new(ontology, llm, 10, DEFAULT_RELATION_GROUNDING_THRESHOLD);

        let result = driver
            .run(vec![chunk(0, "text")], DEFAULT_CONCURRENCY, CancellationToken::new())
            .await;
        assert!(result.is_err());
    }

    struct AlwaysSchemaBroken;

    #[async_trait]
    impl LlmClient for AlwaysSchemaBroken {
        async fn generate_object(&self, _system_prompt: &str, _user_prompt: &str) -> Result<Value> {
            Err(Error::LlmSchemaError("still not json".to_string()))
        }
    }

    #[tokio::test]
    async fn content_error_recovers_to_empty_fragment_not_abort() {
        let ontology = ontology_with_person_and_org();
        let llm = Arc::new(AlwaysSchemaBroken);
        let driver = StreamingDriver::new(ontology, llm, 10, DEFAULT_RELATION_GROUNDING_THRESHOLD);

        let graph = driver
            .run(
                vec![chunk(0, "text one"), chunk(1, "text two")],
                DEFAULT_CONCURRENCY,
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(graph.entities.is_empty());
        assert!(graph.relations.is_empty());
    }

    #[tokio::test]
    async fn empty_chunk_list_yields_empty_graph() {
        let ontology = ontology_with_person_and_org();
        let llm = Arc::new(ScriptedLlm::new());
        let driver = StreamingDriver::new(ontology, llm, 10, DEFAULT_RELATION_GROUNDING_THRESHOLD);

        let graph = driver
            .run(vec![], DEFAULT_CONCURRENCY, CancellationToken::new())
            .await
            .unwrap();
        assert!(graph.entities.is_empty());
    }

    /// Same script as [`ScriptedLlm`] but the relation-grounding confidence
    /// is a parameter, so both sides of spec §8 scenario 6's boundary
    /// (0.79 absent, 0.80 present) can be exercised with one fake.
    struct ConfidenceScriptedLlm {
        relation_confidence: f64,
    }

    #[async_trait]
    impl LlmClient for ConfidenceScriptedLlm {
        async fn generate_object(&self, system_prompt: &str, _user_prompt: &str) -> Result<Value> {
            if system_prompt.contains("surface-form mentions") {
                return Ok(json!({"mentions": [{"mention": "Alan Bean", "context": "an astronaut"}]}));
            }
            if system_prompt.contains("typed entities") {
                return Ok(json!({"entities": [
                    {"id": "e1", "mention": "Alan Bean", "types": ["http://ex.org/Person"], "attributes": {}},
                    {"id": "e2", "mention": "NASA", "types": ["http://ex.org/Organization"], "attributes": {}}
                ]}));
            }
            if system_prompt.contains("verify whether each candidate entity") {
                return Ok(json!({"results": [
                    {"id": "e1", "grounded": true, "confidence": 0.95},
                    {"id": "e2", "grounded": true, "confidence": 0.9}
                ]}));
            }
            if system_prompt.contains("extract relations") {
                return Ok(json!({"relations": [
                    {"subjectId": "e1", "predicate": "http://ex.org/worksFor", "objectId": "e2"}
                ]}));
            }
            if system_prompt.contains("verify whether each candidate relation") {
                return Ok(json!({"results": [
                    {"index": 0, "grounded": true, "confidence": self.relation_confidence}
                ]}));
            }
            Ok(json!({}))
        }
    }

    #[tokio::test]
    async fn relation_grounding_boundary_matches_spec_scenario_six() {
        let ontology = ontology_with_person_and_org();

        let below = Arc::new(ConfidenceScriptedLlm { relation_confidence: 0.79 });
        let driver_below =
            StreamingDriver::new(ontology.clone(), below, 10, DEFAULT_RELATION_GROUNDING_THRESHOLD);
        let graph_below = driver_below
            .run(
                vec![chunk(0, "Alan Bean worked at NASA.")],
                DEFAULT_CONCURRENCY,
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(
            graph_below.relations.is_empty(),
            "confidence 0.79 is below the 0.8 threshold and must be dropped"
        );

        let at_threshold = Arc::new(ConfidenceScriptedLlm { relation_confidence: 0.80 });
        let driver_at =
            StreamingDriver::new(ontology, at_threshold, 10, DEFAULT_RELATION_GROUNDING_THRESHOLD);
        let graph_at = driver_at
            .run(
                vec![chunk(0, "Alan Bean worked at NASA.")],
                DEFAULT_CONCURRENCY,
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(
            graph_at.relations.len(),
            1,
            "confidence 0.80 meets the threshold and must be kept"
        );
    }

    #[tokio::test]
    async fn pre_cancelled_token_yields_empty_graph_not_a_call() {
        let ontology = ontology_with_person_and_org();
        let llm = Arc::new(ScriptedLlm::new());
        let driver = StreamingDriver::new(ontology, llm, 10, DEFAULT_RELATION_GROUNDING_THRESHOLD);

        let token = CancellationToken::new();
        token.cancel();
        let result = driver
            .run(vec![chunk(0, "text")], DEFAULT_CONCURRENCY, token)
            .await;
        assert!(result.is_err());
    }
}

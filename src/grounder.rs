//! Grounder (spec §4.7): batched LLM verification that entities and
//! relations are supported by the chunk text that produced them, each
//! yielding a boolean plus a confidence.

use crate::error::Result;
use crate::llm::LlmClient;
use crate::types::{Entity, Literal, RelationObject};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

const ENTITY_SYSTEM_PROMPT: &str = "You verify whether each candidate entity is actually supported \
by the passage of text it was extracted from. For each entity, return whether it is grounded and a \
confidence in [0, 1]. Return JSON of the form {\"results\": [{\"id\": string, \"grounded\": bool, \
\"confidence\": number}]}.";

const RELATION_SYSTEM_PROMPT: &str = "You verify whether each candidate relation is actually \
supported by the passage of text it was extracted from. For each relation, return whether it is \
grounded and a confidence in [0, 1]. Return JSON of the form {\"results\": [{\"index\": number, \
\"grounded\": bool, \"confidence\": number}]}.";

/// The verdict for one entity or relation (spec §4.7).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GroundingVerdict {
    pub grounded: bool,
    pub confidence: f64,
}

/// One relation candidate handed to [`Grounder::verify_relation_batch`]: the
/// subject entity, the object (entity or literal), and the predicate, plus
/// the chunk text the relation was extracted from (spec §4.7).
#[derive(Debug, Clone)]
pub struct RelationGroundingInput {
    pub subject: Entity,
    pub predicate: String,
    pub object: RelationObject,
}

#[derive(Deserialize)]
struct EntityResultRow {
    id: String,
    #[serde(default)]
    grounded: bool,
    #[serde(default)]
    confidence: f64,
}

#[derive(Deserialize)]
struct EntityResultsResponse {
    #[serde(default)]
    results: Vec<EntityResultRow>,
}

#[derive(Deserialize)]
struct IndexedResultRow {
    index: usize,
    #[serde(default)]
    grounded: bool,
    #[serde(default)]
    confidence: f64,
}

#[derive(Deserialize)]
struct IndexedResultsResponse {
    #[serde(default)]
    results: Vec<IndexedResultRow>,
}

#[derive(Clone)]
pub struct Grounder {
    llm: Arc<dyn LlmClient>,
}

impl Grounder {
    #[must_use]
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// Verifies a batch of entities against `chunk_text`. Any entity whose
    /// id is missing from the LLM's response defaults to ungrounded with
    /// zero confidence — entities are never dropped here (spec §4.7), only
    /// annotated; filtering on confidence is the caller's decision.
    pub async fn verify_entity_batch(
        &self,
        chunk_text: &str,
        entities: &[Entity],
    ) -> Result<HashMap<String, GroundingVerdict>> {
        if entities.is_empty() {
            return Ok(HashMap::new());
        }

        let payload = entities
            .iter()
            .map(|e| json!({"id": e.id, "mention": e.mention, "types": e.types}))
            .collect::<Vec<_>>();
        let user_prompt = format!(
            "Passage:\n\n{chunk_text}\n\nCandidate entities:\n{}",
            serde_json::to_string_pretty(&payload)?
        );

        let value = self
            .llm
            .generate_object(ENTITY_SYSTEM_PROMPT, &user_prompt)
            .await?;
        let parsed: EntityResultsResponse = serde_json::from_value(value)?;

        let mut verdicts: HashMap<String, GroundingVerdict> = parsed
            .results
            .into_iter()
            .map(|row| {
                (
                    row.id,
                    GroundingVerdict {
                        grounded: row.grounded,
                        confidence: row.confidence.clamp(0.0, 1.0),
                    },
                )
            })
            .collect();

        for entity in entities {
            verdicts.entry(entity.id.clone()).or_insert(GroundingVerdict {
                grounded: false,
                confidence: 0.0,
            });
        }
        Ok(verdicts)
    }

    /// Verifies a batch of relation candidates against `chunk_text`,
    /// returning one verdict per input in input order (spec §4.7). Missing
    /// indices default to ungrounded with zero confidence.
    pub async fn verify_relation_batch(
        &self,
        chunk_text: &str,
        inputs: &[RelationGroundingInput],
    ) -> Result<Vec<GroundingVerdict>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let payload = inputs
            .iter()
            .enumerate()
            .map(|(index, input)| {
                let object = match &input.object {
                    RelationObject::Entity(id) => json!({"entityId": id}),
                    RelationObject::Literal(Literal { value, .. }) => json!({"literal": value}),
                };
                json!({
                    "index": index,
                    "subject": { "id": input.subject.id, "mention": input.subject.mention },
                    "predicate": input.predicate,
                    "object": object,
                })
            })
            .collect::<Vec<_>>();
        let user_prompt = format!(
            "Passage:\n\n{chunk_text}\n\nCandidate relations:\n{}",
            serde_json::to_string_pretty(&payload)?
        );

        let value = self
            .llm
            .generate_object(RELATION_SYSTEM_PROMPT, &user_prompt)
            .await?;
        let parsed: IndexedResultsResponse = serde_json::from_value(value)?;

        let mut verdicts = vec![
            GroundingVerdict {
                grounded: false,
                confidence: 0.0,
            };
            inputs.len()
        ];
        for row in parsed.results {
            if let Some(slot) = verdicts.get_mut(row.index) {
                *slot = GroundingVerdict {
                    grounded: row.grounded,
                    confidence: row.confidence.clamp(0.0, 1.0),
                };
            }
        }
        Ok(verdicts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::Value;

    struct FakeLlm(Value);

    #[async_trait]
    impl LlmClient for FakeLlm {
        async fn generate_object(&self, _system_prompt: &str, _user_prompt: &str) -> Result<Value> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn entity_batch_defaults_missing_ids_to_ungrounded() {
        let fake = FakeLlm(json!({
            "results": [{"id": "e1", "grounded": true, "confidence": 0.9}]
        }));
        let grounder = Grounder::new(Arc::new(fake));
        let entities = vec![
            Entity::new("e1", "Alan Bean", vec!["Person".into()]),
            Entity::new("e2", "NASA", vec!["Organization".into()]),
        ];
        let verdicts = grounder.verify_entity_batch("text", &entities).await.unwrap();
        assert!(verdicts["e1"].grounded);
        assert_eq!(verdicts["e1"].confidence, 0.9);
        assert!(!verdicts["e2"].grounded);
        assert_eq!(verdicts["e2"].confidence, 0.0);
    }

    #[tokio::test]
    async fn relation_batch_preserves_input_order() {
        let fake = FakeLlm(json!({
            "results": [
                {"index": 1, "grounded": true, "confidence": 0.8},
                {"index": 0, "grounded": false, "confidence": 0.1}
            ]
        }));
        let grounder = Grounder::new(Arc::new(fake));
        let subject = Entity::new("e1", "Alan Bean", vec!["Person".into()]);
        let inputs = vec![
            RelationGroundingInput {
                subject: subject.clone(),
                predicate: "worksFor".into(),
                object: RelationObject::Entity("e2".into()),
            },
            RelationGroundingInput {
                subject,
                predicate: "birthDate".into(),
                object: RelationObject::Literal(Literal::new("1932-03-15")),
            },
        ];
        let verdicts = grounder.verify_relation_batch("text", &inputs).await.unwrap();
        assert!(!verdicts[0].grounded);
        assert!(verdicts[1].grounded);
        assert_eq!(verdicts[1].confidence, 0.8);
    }

    #[tokio::test]
    async fn empty_batch_is_a_no_op() {
        let grounder = Grounder::new(Arc::new(FakeLlm(json!({}))));
        assert!(grounder.verify_entity_batch("text", &[]).await.unwrap().is_empty());
        assert!(grounder.verify_relation_batch("text", &[]).await.unwrap().is_empty());
    }
}

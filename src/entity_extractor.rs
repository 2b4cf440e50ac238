//! Entity Extractor (spec §4.6): an LLM call producing typed entities,
//! constrained at acceptance time (not prompt time) to the chunk's
//! candidate classes and datatype properties.

use crate::error::Result;
use crate::llm::LlmClient;
use crate::types::{ClassDefinition, Entity, Literal, PropertyDefinition};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

const SYSTEM_PROMPT: &str = "You extract typed entities from a passage, constrained to a fixed set \
of candidate classes and datatype properties given to you. Use only the class and property IRIs \
listed; do not invent new ones. Return JSON of the form {\"entities\": [{\"id\": string, \
\"mention\": string, \"types\": [iri, ...], \"attributes\": {iri: string, ...}}]}.";

#[derive(Deserialize)]
struct RawEntity {
    #[serde(default)]
    id: Option<String>,
    mention: String,
    #[serde(default)]
    types: Vec<String>,
    #[serde(default)]
    attributes: HashMap<String, String>,
}

#[derive(Deserialize)]
struct EntitiesResponse {
    #[serde(default)]
    entities: Vec<RawEntity>,
}

#[derive(Clone)]
pub struct EntityExtractor {
    llm: Arc<dyn LlmClient>,
}

impl EntityExtractor {
    #[must_use]
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    fn build_user_prompt(
        chunk_text: &str,
        candidate_classes: &[ClassDefinition],
        candidate_datatype_properties: &[PropertyDefinition],
    ) -> String {
        let classes = candidate_classes
            .iter()
            .map(|c| format!("- {} ({})", c.id, c.label))
            .collect::<Vec<_>>()
            .join("\n");
        let properties = candidate_datatype_properties
            .iter()
            .map(|p| format!("- {} ({})", p.id, p.label))
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "Candidate classes:\n{classes}\n\nCandidate datatype properties:\n{properties}\n\n\
             Passage:\n\n{chunk_text}"
        )
    }

    /// Returns entities whose `types` are a non-empty subset of
    /// `candidate_classes` and whose `attributes` keys are a subset of
    /// `candidate_datatype_properties` (spec §4.6). Every returned entity
    /// carries `chunk_index`.
    pub async fn extract(
        &self,
        chunk_text: &str,
        candidate_classes: &[ClassDefinition],
        candidate_datatype_properties: &[PropertyDefinition],
        chunk_index: usize,
    ) -> Result<Vec<Entity>> {
        let allowed_classes: HashSet<&str> =
            candidate_classes.iter().map(|c| c.id.as_str()).collect();
        let allowed_properties: HashSet<&str> = candidate_datatype_properties
            .iter()
            .map(|p| p.id.as_str())
            .collect();

        let user_prompt =
            Self::build_user_prompt(chunk_text, candidate_classes, candidate_datatype_properties);
        let value = self
            .llm
            .generate_object(SYSTEM_PROMPT, &user_prompt)
            .await?;
        let parsed: EntitiesResponse = serde_json::from_value(value)?;

        let mut entities = Vec::new();
        for (i, raw) in parsed.entities.into_iter().enumerate() {
            let types: Vec<String> = raw
                .types
                .into_iter()
                .filter(|t| allowed_classes.contains(t.as_str()))
                .collect();
            if types.is_empty() {
                tracing::debug!(
                    chunk.index = chunk_index,
                    mention = %raw.mention,
                    "dropping entity with no candidate-class type"
                );
                continue;
            }

            let attributes = raw
                .attributes
                .into_iter()
                .filter(|(k, _)| allowed_properties.contains(k.as_str()))
                .map(|(k, v)| (k, Literal::new(v)))
                .collect();

            let id = raw.id.unwrap_or_else(|| format!("entity-{chunk_index}-{i}"));
            let mut entity = Entity::new(id, raw.mention, types);
            entity.attributes = attributes;
            entity.chunk_index = Some(chunk_index);
            entities.push(entity);
        }
        Ok(entities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct FakeLlm(Value);

    #[async_trait]
    impl LlmClient for FakeLlm {
        async fn generate_object(&self, _system_prompt: &str, _user_prompt: &str) -> Result<Value> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn drops_types_and_attributes_outside_the_candidate_set() {
        let fake = FakeLlm(json!({
            "entities": [{
                "id": "e1",
                "mention": "Alan Bean",
                "types": ["http://ex.org/Person", "http://ex.org/NotACandidate"],
                "attributes": {
                    "http://ex.org/birthDate": "1932-03-15",
                    "http://ex.org/notScoped": "x"
                }
            }]
        }));
        let extractor = EntityExtractor::new(Arc::new(fake));

        let mut person = ClassDefinition::new("http://ex.org/Person", "Person");
        person.pref_labels = vec!["Person".to_string()];
        let mut birth_date = PropertyDefinition::new(
            "http://ex.org/birthDate",
            "birth date",
            crate::types::RangeType::Datatype,
        );
        birth_date.domain = vec!["http://ex.org/Person".to_string()];

        let entities = extractor
            .extract("text", &[person], &[birth_date], 0)
            .await
            .unwrap();

        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].types, vec!["http://ex.org/Person".to_string()]);
        assert!(entities[0]
            .attributes
            .contains_key("http://ex.org/birthDate"));
        assert!(!entities[0].attributes.contains_key("http://ex.org/notScoped"));
        assert_eq!(entities[0].chunk_index, Some(0));
    }

    #[tokio::test]
    async fn drops_entity_with_no_allowed_type() {
        let fake = FakeLlm(json!({
            "entities": [{
                "mention": "Unknown Thing",
                "types": ["http://ex.org/NotACandidate"],
                "attributes": {}
            }]
        }));
        let extractor = EntityExtractor::new(Arc::new(fake));
        let entities = extractor.extract("text", &[], &[], 0).await.unwrap();
        assert!(entities.is_empty());
    }
}

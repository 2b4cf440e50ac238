//! Relation Extractor (spec §4.9): an LLM call producing relations between
//! entities within a chunk, constrained to scoped properties and accepted
//! only if they pass a subclass-aware domain/range check.

use crate::error::Result;
use crate::llm::LlmClient;
use crate::ontology::OntologyContext;
use crate::types::{Entity, Evidence, Literal, PropertyDefinition, Relation, RelationObject};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

const SYSTEM_PROMPT: &str = "You extract relations between entities in a passage, constrained to a \
fixed set of candidate entities and scoped properties given to you. Use only the entity ids and \
property IRIs listed; do not invent new ones. An object may be another candidate entity id, or a \
literal value. Return JSON of the form {\"relations\": [{\"subjectId\": string, \"predicate\": iri, \
\"objectId\": string or null, \"objectLiteral\": string or null, \"objectDatatype\": iri or null}]}.";

#[derive(Deserialize)]
struct RawRelation {
    subject_id: String,
    predicate: String,
    #[serde(default)]
    object_id: Option<String>,
    #[serde(default)]
    object_literal: Option<String>,
    #[serde(default)]
    object_datatype: Option<String>,
}

#[derive(Deserialize)]
struct RelationsResponse {
    #[serde(default)]
    relations: Vec<RawRelation>,
}

#[derive(Clone)]
pub struct RelationExtractor {
    llm: Arc<dyn LlmClient>,
}

impl RelationExtractor {
    #[must_use]
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    fn build_user_prompt(
        chunk_text: &str,
        entities: &[Entity],
        scoped_properties: &[PropertyDefinition],
    ) -> String {
        let entity_list = entities
            .iter()
            .map(|e| format!("- {} ({}): types {:?}", e.id, e.mention, e.types))
            .collect::<Vec<_>>()
            .join("\n");
        let property_list = scoped_properties
            .iter()
            .map(|p| format!("- {} ({})", p.id, p.label))
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "Candidate entities:\n{entity_list}\n\nScoped properties:\n{property_list}\n\n\
             Passage:\n\n{chunk_text}"
        )
    }

    /// Domain check (spec §4.9): passes when `predicate.domain` is empty, or
    /// some domain class `d` has `isSubClassOf(t, d)` for some type `t` of
    /// the subject.
    fn domain_ok(ontology: &OntologyContext, predicate: &PropertyDefinition, subject: &Entity) -> bool {
        predicate.domain.is_empty()
            || predicate
                .domain
                .iter()
                .any(|d| subject.types.iter().any(|t| ontology.is_subclass_of(t, d)))
    }

    /// Object-property range check (spec §4.9): analogous to the domain
    /// check, against the object entity's types.
    fn object_range_ok(ontology: &OntologyContext, predicate: &PropertyDefinition, object: &Entity) -> bool {
        predicate.range.is_empty()
            || predicate
                .range
                .iter()
                .any(|r| object.types.iter().any(|t| ontology.is_subclass_of(t, r)))
    }

    /// Datatype-property range check (spec §4.9): the literal's effective
    /// datatype must appear in `predicate.range`, or the range is empty.
    fn literal_range_ok(predicate: &PropertyDefinition, literal: &Literal) -> bool {
        predicate.range.is_empty() || predicate.range.iter().any(|r| r == literal.effective_datatype())
    }

    /// Extracts and accepts relations (spec §4.9). Acceptance checks —
    /// entity resolution, property scoping, and the subclass-aware
    /// domain/range predicate — run at acceptance time, not prompt time;
    /// rejects are dropped with a debug log, never a hard error.
    pub async fn extract(
        &self,
        ontology: &OntologyContext,
        chunk_text: &str,
        entities: &[Entity],
        scoped_properties: &[PropertyDefinition],
    ) -> Result<Vec<Relation>> {
        let entities_by_id: HashMap<&str, &Entity> =
            entities.iter().map(|e| (e.id.as_str(), e)).collect();
        let properties_by_id: HashMap<&str, &PropertyDefinition> =
            scoped_properties.iter().map(|p| (p.id.as_str(), p)).collect();

        let user_prompt = Self::build_user_prompt(chunk_text, entities, scoped_properties);
        let value = self
            .llm
            .generate_object(SYSTEM_PROMPT, &user_prompt)
            .await?;
        let parsed: RelationsResponse = serde_json::from_value(value)?;

        let mut relations = Vec::new();
        for raw in parsed.relations {
            if let Some(relation) = Self::accept(ontology, &entities_by_id, &properties_by_id, raw) {
                relations.push(relation);
            }
        }
        Ok(relations)
    }

    fn accept(
        ontology: &OntologyContext,
        entities_by_id: &HashMap<&str, &Entity>,
        properties_by_id: &HashMap<&str, &PropertyDefinition>,
        raw: RawRelation,
    ) -> Option<Relation> {
        let Some(subject) = entities_by_id.get(raw.subject_id.as_str()).copied() else {
            tracing::debug!(subject = %raw.subject_id, "dropping relation: unknown subject entity");
            return None;
        };
        let Some(predicate) = properties_by_id.get(raw.predicate.as_str()).copied() else {
            tracing::debug!(predicate = %raw.predicate, "dropping relation: predicate not in scoped properties");
            return None;
        };

        if !Self::domain_ok(ontology, predicate, subject) {
            tracing::debug!(
                subject = %raw.subject_id,
                predicate = %raw.predicate,
                "dropping relation: subject type fails domain check"
            );
            return None;
        }

        let object = if predicate.is_object_property() {
            let object_id = raw.object_id?;
            let Some(object_entity) = entities_by_id.get(object_id.as_str()).copied() else {
                tracing::debug!(object = %object_id, "dropping relation: unknown object entity");
                return None;
            };
            if !Self::object_range_ok(ontology, predicate, object_entity) {
                tracing::debug!(
                    object = %object_id,
                    predicate = %raw.predicate,
                    "dropping relation: object type fails range check"
                );
                return None;
            }
            RelationObject::Entity(object_id)
        } else {
            let value = raw.object_literal?;
            let mut literal = Literal::new(value);
            if let Some(datatype) = raw.object_datatype {
                literal = literal.with_datatype(datatype);
            }
            if !Self::literal_range_ok(predicate, &literal) {
                tracing::debug!(
                    predicate = %raw.predicate,
                    datatype = literal.effective_datatype(),
                    "dropping relation: literal datatype fails range check"
                );
                return None;
            }
            RelationObject::Literal(literal)
        };

        Some(Relation {
            subject_id: raw.subject_id,
            predicate: raw.predicate,
            object,
            evidence: None::<Evidence>,
        })
    }
}

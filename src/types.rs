//! Core data model (spec §3): IRIs, literals, ontology definitions, chunks,
//! mentions, entities, relations, the knowledge graph, SHACL violations and
//! corrections.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An IRI, treated opaquely apart from local-name extraction.
pub type Iri = String;

/// Returns the substring of `iri` after the last `#` or `/`.
#[must_use]
pub fn local_name(iri: &str) -> &str {
    let hash = iri.rfind('#');
    let slash = iri.rfind('/');
    match (hash, slash) {
        (Some(h), Some(s)) => &iri[h.max(s) + 1..],
        (Some(h), None) => &iri[h + 1..],
        (None, Some(s)) => &iri[s + 1..],
        (None, None) => iri,
    }
}

/// A scalar RDF literal. Datatype defaults to `xsd:string` when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Literal {
    pub value: String,
    pub datatype: Option<Iri>,
    pub language: Option<String>,
}

impl Literal {
    pub const XSD_STRING: &'static str = "http://www.w3.org/2001/XMLSchema#string";

    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            datatype: None,
            language: None,
        }
    }

    #[must_use]
    pub fn with_datatype(mut self, datatype: impl Into<String>) -> Self {
        self.datatype = Some(datatype.into());
        self
    }

    #[must_use]
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// The effective datatype, defaulting to `xsd:string` (spec §3).
    #[must_use]
    pub fn effective_datatype(&self) -> &str {
        self.datatype.as_deref().unwrap_or(Self::XSD_STRING)
    }

    /// The `(value, datatype, language)` identity tuple used by relation
    /// deduplication in the graph merger (spec §4.10).
    #[must_use]
    pub fn identity_tuple(&self) -> (String, String, Option<String>) {
        (
            self.value.clone(),
            self.effective_datatype().to_string(),
            self.language.clone(),
        )
    }
}

/// A value an entity's attribute can hold, or a relation's object, when it
/// is not a reference to another entity.
pub type Scalar = Literal;

/// A class in the ontology.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassDefinition {
    pub id: Iri,
    pub label: String,
    pub comment: String,
    pub properties: Vec<Iri>,
    #[serde(default)]
    pub pref_labels: Vec<String>,
    #[serde(default)]
    pub alt_labels: Vec<String>,
    #[serde(default)]
    pub hidden_labels: Vec<String>,
    pub definition: Option<String>,
    pub scope_note: Option<String>,
    pub example: Option<String>,
    #[serde(default)]
    pub broader: Vec<Iri>,
    #[serde(default)]
    pub narrower: Vec<Iri>,
    #[serde(default)]
    pub related: Vec<Iri>,
    #[serde(default)]
    pub exact_match: Vec<Iri>,
    #[serde(default)]
    pub close_match: Vec<Iri>,
    #[serde(default)]
    pub equivalent_class: Vec<Iri>,
}

impl ClassDefinition {
    #[must_use]
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            ..Self::default()
        }
    }
}

/// Whether a property's range is an ontology class or an RDF datatype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RangeType {
    #[serde(rename = "object")]
    Object,
    #[serde(rename = "datatype")]
    Datatype,
}

/// A property in the ontology.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyDefinition {
    pub id: Iri,
    pub label: String,
    pub comment: String,
    pub domain: Vec<Iri>,
    pub range: Vec<Iri>,
    pub range_type: RangeType,
    #[serde(default)]
    pub inverse_of: Vec<Iri>,
    #[serde(default)]
    pub is_functional: bool,
    #[serde(default)]
    pub pref_labels: Vec<String>,
    #[serde(default)]
    pub alt_labels: Vec<String>,
    #[serde(default)]
    pub hidden_labels: Vec<String>,
    pub definition: Option<String>,
    pub scope_note: Option<String>,
    pub example: Option<String>,
    #[serde(default)]
    pub broader: Vec<Iri>,
    #[serde(default)]
    pub narrower: Vec<Iri>,
    #[serde(default)]
    pub related: Vec<Iri>,
}

impl PropertyDefinition {
    #[must_use]
    pub fn new(id: impl Into<String>, label: impl Into<String>, range_type: RangeType) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            comment: String::new(),
            domain: Vec::new(),
            range: Vec::new(),
            range_type,
            inverse_of: Vec::new(),
            is_functional: false,
            pref_labels: Vec::new(),
            alt_labels: Vec::new(),
            hidden_labels: Vec::new(),
            definition: None,
            scope_note: None,
            example: None,
            broader: Vec::new(),
            narrower: Vec::new(),
            related: Vec::new(),
        }
    }

    #[must_use]
    pub const fn is_object_property(&self) -> bool {
        matches!(self.range_type, RangeType::Object)
    }
}

/// A contiguous slice of source text with character offsets into the
/// original document (spec §4.2). Invariant: `end_offset - start_offset ==
/// text.chars().count()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextChunk {
    pub index: usize,
    pub text: String,
    pub start_offset: usize,
    pub end_offset: usize,
}

/// An untyped surface-form reference produced by the Mention Extractor
/// (spec §4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mention {
    pub mention: String,
    pub context: Option<String>,
}

/// Document-scoped entity identifier, stable within a single extraction run
/// but never assumed stable across documents (spec §3, §9).
pub type EntityId = String;

/// A span in the source chunk that grounds a mention, with an optional
/// per-span confidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MentionSpan {
    pub text: String,
    pub start_char: usize,
    pub end_char: usize,
    pub confidence: Option<f64>,
}

/// A typed, attribute-bearing node (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub mention: String,
    pub types: Vec<Iri>,
    pub attributes: HashMap<Iri, Scalar>,
    pub chunk_index: Option<usize>,
    pub chunk_id: Option<String>,
    pub grounding_confidence: Option<f64>,
    pub mention_spans: Vec<MentionSpan>,
}

impl Entity {
    #[must_use]
    pub fn new(id: impl Into<String>, mention: impl Into<String>, types: Vec<Iri>) -> Self {
        Self {
            id: id.into(),
            mention: mention.into(),
            types,
            attributes: HashMap::new(),
            chunk_index: None,
            chunk_id: None,
            grounding_confidence: None,
            mention_spans: Vec::new(),
        }
    }
}

/// The object of a relation: either a reference to another entity or a
/// literal value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RelationObject {
    Entity(EntityId),
    Literal(Literal),
}

impl RelationObject {
    #[must_use]
    pub const fn as_entity_id(&self) -> Option<&EntityId> {
        match self {
            Self::Entity(id) => Some(id),
            Self::Literal(_) => None,
        }
    }

    #[must_use]
    pub const fn as_literal(&self) -> Option<&Literal> {
        match self {
            Self::Literal(lit) => Some(lit),
            Self::Entity(_) => None,
        }
    }

    /// The identity key used for relation deduplication (spec §4.10):
    /// an entity id string, or the literal's `(value, datatype, language)`
    /// tuple rendered as a string.
    #[must_use]
    pub fn identity_key(&self) -> String {
        match self {
            Self::Entity(id) => format!("entity:{id}"),
            Self::Literal(lit) => {
                let (value, datatype, language) = lit.identity_tuple();
                format!(
                    "literal:{value}\u{0}{datatype}\u{0}{}",
                    language.unwrap_or_default()
                )
            }
        }
    }
}

/// Evidence supporting a grounded entity or relation (spec §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub text: String,
    pub start_char: usize,
    pub end_char: usize,
    pub confidence: Option<f64>,
}

/// A typed edge between two entities, or between an entity and a literal
/// (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    pub subject_id: EntityId,
    pub predicate: Iri,
    pub object: RelationObject,
    pub evidence: Option<Evidence>,
}

impl Relation {
    /// The `(subjectId, predicate, object)` identity tuple used for
    /// deduplication by the graph merger (spec §4.10).
    #[must_use]
    pub fn identity(&self) -> (EntityId, Iri, String) {
        (
            self.subject_id.clone(),
            self.predicate.clone(),
            self.object.identity_key(),
        )
    }
}

/// The whole-document knowledge graph, and the monoid this crate's merge
/// folds chunk fragments into (spec §3, §4.10, §8). Identity = `default()`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeGraph {
    pub entities: Vec<Entity>,
    pub relations: Vec<Relation>,
}

impl KnowledgeGraph {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get_entity(&self, id: &str) -> Option<&Entity> {
        self.entities.iter().find(|e| e.id == id)
    }

    /// Spec §3 invariant check: every relation resolves its subject (and,
    /// for entity-valued objects, its object) to an entity present in the
    /// graph. Used by tests, not enforced at construction time.
    #[must_use]
    pub fn relations_resolve(&self) -> bool {
        self.relations.iter().all(|r| {
            self.get_entity(&r.subject_id).is_some()
                && match &r.object {
                    RelationObject::Entity(id) => self.get_entity(id).is_some(),
                    RelationObject::Literal(_) => true,
                }
        })
    }

    #[must_use]
    pub fn entity_ids_unique(&self) -> bool {
        let mut ids: Vec<&str> = self.entities.iter().map(|e| e.id.as_str()).collect();
        let before = ids.len();
        ids.sort_unstable();
        ids.dedup();
        ids.len() == before
    }
}

/// SHACL severity levels (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Violation,
    Warning,
    Info,
}

/// A single SHACL constraint breach (spec §3, §4.13).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShaclViolation {
    pub focus_node: Iri,
    pub path: Option<Iri>,
    pub value: Option<Scalar>,
    pub message: String,
    pub severity: Severity,
}

/// The report produced by the SHACL Validator (spec §4.13).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShaclValidationReport {
    pub conforms: bool,
    pub violations: Vec<ShaclViolation>,
}

/// The correction strategy a violation is classified into (spec §4.14).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CorrectionStrategy {
    GenerateValue,
    CoerceDatatype,
    RemoveExcess,
    ReclassifyEntity,
    ReformatValue,
    Skip,
}

/// An LLM-generated, typed edit intended to resolve one violation (spec §3,
/// §4.14).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Correction {
    pub strategy: CorrectionStrategy,
    pub focus_node: Iri,
    pub path: Option<Iri>,
    pub original_value: Option<Scalar>,
    pub new_value: Option<Scalar>,
    pub new_type: Option<Iri>,
    pub explanation: String,
    pub confidence: f64,
}

impl Correction {
    /// `shouldApply ⇔ strategy ≠ skip ∧ confidence ≥ 0.5` (spec §3).
    #[must_use]
    pub fn should_apply(&self) -> bool {
        self.strategy != CorrectionStrategy::Skip && self.confidence >= 0.5
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_name_splits_on_hash_or_slash() {
        assert_eq!(local_name("http://example.org/onto#Person"), "Person");
        assert_eq!(local_name("http://example.org/onto/Person"), "Person");
        assert_eq!(local_name("Person"), "Person");
        assert_eq!(local_name("http://example.org/a#b/c"), "c");
    }

    #[test]
    fn literal_defaults_to_xsd_string() {
        let lit = Literal::new("hello");
        assert_eq!(lit.effective_datatype(), Literal::XSD_STRING);
    }

    #[test]
    fn correction_should_apply_rule() {
        let mut c = Correction {
            strategy: CorrectionStrategy::GenerateValue,
            focus_node: "ex:A".into(),
            path: None,
            original_value: None,
            new_value: None,
            new_type: None,
            explanation: String::new(),
            confidence: 0.5,
        };
        assert!(c.should_apply());
        c.confidence = 0.49;
        assert!(!c.should_apply());
        c.confidence = 0.9;
        c.strategy = CorrectionStrategy::Skip;
        assert!(!c.should_apply());
    }

    #[test]
    fn knowledge_graph_invariants() {
        let mut g = KnowledgeGraph::empty();
        g.entities
            .push(Entity::new("e1", "Alice", vec!["Person".into()]));
        g.relations.push(Relation {
            subject_id: "e1".into(),
            predicate: "knows".into(),
            object: RelationObject::Entity("e2".into()),
            evidence: None,
        });
        assert!(g.entity_ids_unique());
        assert!(!g.relations_resolve());

        g.entities
            .push(Entity::new("e2", "Bob", vec!["Person".into()]));
        assert!(g.relations_resolve());
    }

    #[test]
    fn relation_object_identity_key_distinguishes_literal_from_entity() {
        let a = RelationObject::Entity("e1".into());
        let b = RelationObject::Literal(Literal::new("e1"));
        assert_ne!(a.identity_key(), b.identity_key());
    }
}

//! `ClaimFactory` (spec §3, §6, §8): turns accepted entities and relations
//! into content-addressable `Claim` records for an external store. The core
//! never persists a `Claim`; it only produces them.

use crate::types::{Entity, Iri, Literal, Relation, RelationObject};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Rank of a claim relative to other claims about the same subject/predicate
/// (spec §3). Defaults to `Normal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClaimRank {
    Preferred,
    Normal,
    Deprecated,
}

impl Default for ClaimRank {
    fn default() -> Self {
        Self::Normal
    }
}

/// The value side of a claim: either an entity reference (by IRI) or a
/// literal (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClaimObject {
    Iri(Iri),
    Literal(Literal),
}

/// A source-text span backing a claim's evidence (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextSpan {
    pub start_char: usize,
    pub end_char: usize,
}

/// Evidence attached to a claim: the document it came from, the spans within
/// it, and optional surrounding context (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimEvidence {
    pub document_uri: String,
    pub spans: Vec<TextSpan>,
    pub context: Option<String>,
}

/// A content-addressable, evidence-carrying record of a single extracted
/// triple (spec §3). `id` follows the pattern `claim-[0-9a-f]{12}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claim {
    pub id: String,
    pub subject: Iri,
    pub predicate: Iri,
    pub object: ClaimObject,
    pub document_uri: String,
    pub evidence: ClaimEvidence,
    pub extracted_at: i64,
    pub confidence: f64,
    pub rank: ClaimRank,
    pub valid_from: Option<i64>,
    pub valid_to: Option<i64>,
}

/// Parameters shared by every claim emitted for one document (spec §6).
#[derive(Debug, Clone)]
pub struct ClaimOptions {
    pub base_namespace: String,
    pub document_id: String,
    pub ontology_id: String,
    pub default_confidence: f64,
    /// Injected rather than read from a system clock, so claim batches are
    /// reproducible in tests (spec §6 `Clock.now()`).
    pub extracted_at: i64,
}

pub struct ClaimFactory;

impl ClaimFactory {
    /// `"claim-" + first 12 hex chars of SHA-256(subject || \0 || predicate
    /// || \0 || stringified(object) || \0 || documentId)` (spec §3, §8). The
    /// NUL separator prevents `"abc"+"xyz"` from colliding with
    /// `"ab"+"cxyz"`.
    #[must_use]
    pub fn claim_id(subject: &str, predicate: &str, object: &str, document_id: &str) -> String {
        Self::content_id("claim", subject, predicate, object, document_id)
    }

    #[must_use]
    pub fn assertion_id(subject: &str, predicate: &str, object: &str, document_id: &str) -> String {
        Self::content_id("assertion", subject, predicate, object, document_id)
    }

    #[must_use]
    pub fn derived_assertion_id(
        subject: &str,
        predicate: &str,
        object: &str,
        document_id: &str,
    ) -> String {
        Self::content_id("derived", subject, predicate, object, document_id)
    }

    fn content_id(prefix: &str, subject: &str, predicate: &str, object: &str, document_id: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(subject.as_bytes());
        hasher.update(b"\0");
        hasher.update(predicate.as_bytes());
        hasher.update(b"\0");
        hasher.update(object.as_bytes());
        hasher.update(b"\0");
        hasher.update(document_id.as_bytes());
        let digest = hasher.finalize();
        format!("{prefix}-{}", &hex::encode(digest)[..12])
    }

    fn stringify_object(object: &ClaimObject) -> String {
        match object {
            ClaimObject::Iri(iri) => iri.clone(),
            ClaimObject::Literal(lit) => {
                format!(
                    "{}^^{}@{}",
                    lit.value,
                    lit.effective_datatype(),
                    lit.language.as_deref().unwrap_or("")
                )
            }
        }
    }

    /// One claim per attribute and per type assertion on `entity` (spec §3,
    /// §6). An entity with no attributes and a single type yields one claim
    /// (the `rdf:type` assertion).
    #[must_use]
    pub fn entity_to_claims(entity: &Entity, options: &ClaimOptions) -> Vec<Claim> {
        const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";
        let subject_iri = format!("{}{}", options.base_namespace, entity.id);
        let spans: Vec<TextSpan> = entity
            .mention_spans
            .iter()
            .map(|s| TextSpan {
                start_char: s.start_char,
                end_char: s.end_char,
            })
            .collect();

        let mut claims = Vec::new();
        for ty in &entity.types {
            claims.push(Self::build_claim(
                &subject_iri,
                RDF_TYPE,
                &ClaimObject::Iri(ty.clone()),
                options,
                spans.clone(),
                entity.grounding_confidence,
            ));
        }
        for (predicate, value) in &entity.attributes {
            claims.push(Self::build_claim(
                &subject_iri,
                predicate,
                &ClaimObject::Literal(value.clone()),
                options,
                spans.clone(),
                entity.grounding_confidence,
            ));
        }
        claims
    }

    /// One claim for `relation` (spec §3, §6).
    #[must_use]
    pub fn relation_to_claim(relation: &Relation, options: &ClaimOptions) -> Claim {
        let subject_iri = format!("{}{}", options.base_namespace, relation.subject_id);
        let object = match &relation.object {
            RelationObject::Entity(id) => ClaimObject::Iri(format!("{}{id}", options.base_namespace)),
            RelationObject::Literal(lit) => ClaimObject::Literal(lit.clone()),
        };
        let spans = relation
            .evidence
            .as_ref()
            .map(|e| {
                vec![TextSpan {
                    start_char: e.start_char,
                    end_char: e.end_char,
                }]
            })
            .unwrap_or_default();
        let context = relation.evidence.as_ref().map(|e| e.text.clone());
        let confidence = relation.evidence.as_ref().and_then(|e| e.confidence);

        Self::build_claim_with_context(
            &subject_iri,
            &relation.predicate,
            &object,
            options,
            spans,
            context,
            confidence,
        )
    }

    fn build_claim(
        subject: &str,
        predicate: &str,
        object: &ClaimObject,
        options: &ClaimOptions,
        spans: Vec<TextSpan>,
        confidence: Option<f64>,
    ) -> Claim {
        Self::build_claim_with_context(subject, predicate, object, options, spans, None, confidence)
    }

    fn build_claim_with_context(
        subject: &str,
        predicate: &str,
        object: &ClaimObject,
        options: &ClaimOptions,
        spans: Vec<TextSpan>,
        context: Option<String>,
        confidence: Option<f64>,
    ) -> Claim {
        let object_string = Self::stringify_object(object);
        let id = Self::claim_id(subject, predicate, &object_string, &options.document_id);
        Claim {
            id,
            subject: subject.to_string(),
            predicate: predicate.to_string(),
            object: object.clone(),
            document_uri: options.document_id.clone(),
            evidence: ClaimEvidence {
                document_uri: options.document_id.clone(),
                spans,
                context,
            },
            extracted_at: options.extracted_at,
            confidence: confidence.unwrap_or(options.default_confidence),
            rank: ClaimRank::default(),
            valid_from: None,
            valid_to: None,
        }
    }
}

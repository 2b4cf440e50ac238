//! Corrector (spec §4.14): classifies SHACL violations into correction
//! strategies, asks an LLM for a typed `Correction`, and applies it in place
//! to the data store.

use crate::error::Result;
use crate::llm::LlmClient;
use crate::ontology::OntologyContext;
use crate::store::RdfStore;
use crate::types::{Correction, CorrectionStrategy, Literal, ShaclValidationReport, ShaclViolation};
use futures::stream::{self, StreamExt};
use oxigraph::model::{GraphName, Literal as OxLiteral, NamedNode, Quad, Subject};
use std::sync::Arc;
use std::time::Instant;

const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";

const SYSTEM_PROMPT: &str = "You generate a single typed correction for one SHACL constraint \
violation. You are told the chosen strategy; do not change it. Return JSON matching exactly: \
{\"strategy\": string, \"focus_node\": iri, \"path\": iri or null, \"original_value\": \
{\"value\": string, \"datatype\": iri or null, \"language\": string or null} or null, \
\"new_value\": same shape as original_value or null, \"new_type\": iri or null, \
\"explanation\": string, \"confidence\": number in [0,1]}. strategy must be exactly one of \
\"GenerateValue\", \"CoerceDatatype\", \"RemoveExcess\", \"ReclassifyEntity\", \"ReformatValue\", \
\"Skip\".";

/// The outcome of correcting a single violation (spec §4.14, §6).
#[derive(Debug, Clone)]
pub struct CorrectionOutcome {
    pub violation: ShaclViolation,
    pub correction: Correction,
    pub applied: bool,
}

/// `Corrector.correctAll` result (spec §6).
#[derive(Debug, Clone)]
pub struct BatchCorrectionResult {
    pub results: Vec<CorrectionOutcome>,
    pub total_violations: usize,
    pub corrected_count: usize,
    pub skipped_count: usize,
    pub duration_ms: u64,
    pub all_corrected: bool,
    pub success_rate: f64,
}

pub struct Corrector {
    llm: Arc<dyn LlmClient>,
}

impl Corrector {
    #[must_use]
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// Message-based, case-insensitive, deterministic classification (spec
    /// §4.14). Checked in an order that resolves overlaps: maxCount before
    /// minCount, since both substrings contain "count".
    #[must_use]
    pub fn classify(violation: &ShaclViolation) -> CorrectionStrategy {
        let message = violation.message.to_lowercase();
        if message.contains("maxcount") || message.contains("more than") {
            CorrectionStrategy::RemoveExcess
        } else if message.contains("mincount") || message.contains("fewer than") {
            CorrectionStrategy::GenerateValue
        } else if message.contains("datatype") {
            CorrectionStrategy::CoerceDatatype
        } else if message.contains("not an instance of class") || message.contains("class mismatch") {
            CorrectionStrategy::ReclassifyEntity
        } else if message.contains("pattern") || message.contains("format") {
            CorrectionStrategy::ReformatValue
        } else {
            CorrectionStrategy::Skip
        }
    }

    /// `correctAll(report, dataStore, ontologyContext, { concurrency? })`
    /// (spec §6). Corrections are generated concurrently (bounded by
    /// `concurrency`) but applied to `data_store` one at a time, honoring the
    /// single-writer discipline of §5.
    pub async fn correct_all(
        &self,
        report: &ShaclValidationReport,
        data_store: &dyn RdfStore,
        ontology: &OntologyContext,
        concurrency: usize,
    ) -> Result<BatchCorrectionResult> {
        let started = Instant::now();
        let total_violations = report.violations.len();

        let generated: Vec<(ShaclViolation, Correction)> = stream::iter(&report.violations)
            .map(|violation| self.generate(violation, data_store, ontology))
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;

        let mut results = Vec::with_capacity(generated.len());
        for (violation, correction) in generated {
            let applied = self.apply(&violation, &correction, data_store);
            results.push(CorrectionOutcome {
                violation,
                correction,
                applied,
            });
        }

        let corrected_count = results.iter().filter(|r| r.applied).count();
        let skipped_count = results.len() - corrected_count;
        let success_rate = if total_violations == 0 {
            1.0
        } else {
            corrected_count as f64 / total_violations as f64
        };

        Ok(BatchCorrectionResult {
            all_corrected: corrected_count == total_violations,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            results,
            total_violations,
            corrected_count,
            skipped_count,
            success_rate,
        })
    }

    /// Downgrades any LLM failure to an explained `skip` correction so the
    /// batch always completes (spec §4.14, §7).
    async fn generate(
        &self,
        violation: &ShaclViolation,
        data_store: &dyn RdfStore,
        ontology: &OntologyContext,
    ) -> (ShaclViolation, Correction) {
        let strategy = Self::classify(violation);
        if strategy == CorrectionStrategy::Skip {
            return (
                violation.clone(),
                Self::skip_correction(violation, "classified as not auto-correctable"),
            );
        }

        match self.ask_llm(violation, strategy, data_store, ontology).await {
            Ok(correction) => (violation.clone(), correction),
            Err(err) => {
                tracing::warn!(
                    focus_node = %violation.focus_node,
                    error = %err,
                    "correction generation failed, downgrading to skip"
                );
                (
                    violation.clone(),
                    Self::skip_correction(violation, &format!("LLM error: {err}")),
                )
            }
        }
    }

    fn skip_correction(violation: &ShaclViolation, explanation: &str) -> Correction {
        Correction {
            strategy: CorrectionStrategy::Skip,
            focus_node: violation.focus_node.clone(),
            path: violation.path.clone(),
            original_value: None,
            new_value: None,
            new_type: None,
            explanation: explanation.to_string(),
            confidence: 0.0,
        }
    }

    async fn ask_llm(
        &self,
        violation: &ShaclViolation,
        strategy: CorrectionStrategy,
        data_store: &dyn RdfStore,
        ontology: &OntologyContext,
    ) -> Result<Correction> {
        let prompt = Self::build_prompt(violation, strategy, data_store, ontology)?;
        let value = self.llm.generate_object(SYSTEM_PROMPT, &prompt).await?;
        let correction: Correction = serde_json::from_value(value)?;
        Ok(correction)
    }

    fn build_prompt(
        violation: &ShaclViolation,
        strategy: CorrectionStrategy,
        data_store: &dyn RdfStore,
        ontology: &OntologyContext,
    ) -> Result<String> {
        let turtle_context = Self::focus_node_triples(violation, data_store)?;
        let ontology_summary = Self::ontology_summary(ontology);

        Ok(format!(
            "Violation:\n  focusNode: {}\n  path: {:?}\n  message: {}\n  severity: {:?}\n\n\
             Strategy: {strategy:?}\n\n\
             Current triples for the focus node:\n{turtle_context}\n\n\
             Ontology summary:\n{ontology_summary}",
            violation.focus_node, violation.path, violation.message, violation.severity,
        ))
    }

    fn focus_node_triples(violation: &ShaclViolation, data_store: &dyn RdfStore) -> Result<String> {
        let Ok(subject) = NamedNode::new(&violation.focus_node) else {
            return Ok(String::new());
        };
        let quads = data_store.get_quads(Some(&Subject::NamedNode(subject)), None, None, None)?;
        Ok(quads
            .iter()
            .map(|q| {
                format!(
                    "<{}> <{}> {} .",
                    Self::subject_str(&q.subject),
                    q.predicate.as_str(),
                    Self::term_str(&q.object)
                )
            })
            .collect::<Vec<_>>()
            .join("\n"))
    }

    fn subject_str(subject: &Subject) -> String {
        match subject {
            Subject::NamedNode(n) => n.as_str().to_string(),
            Subject::BlankNode(b) => format!("_:{}", b.as_str()),
        }
    }

    fn term_str(term: &oxigraph::model::Term) -> String {
        match term {
            oxigraph::model::Term::NamedNode(n) => format!("<{}>", n.as_str()),
            oxigraph::model::Term::BlankNode(b) => format!("_:{}", b.as_str()),
            oxigraph::model::Term::Literal(lit) => format!("\"{}\"", lit.value()),
        }
    }

    fn ontology_summary(ontology: &OntologyContext) -> String {
        const PREVIEW: usize = 5;
        let classes = ontology
            .classes()
            .take(PREVIEW)
            .map(|c| format!("- {} ({})", c.id, c.label))
            .collect::<Vec<_>>()
            .join("\n");
        let properties = ontology
            .properties()
            .take(PREVIEW)
            .map(|p| format!("- {} ({})", p.id, p.label))
            .collect::<Vec<_>>()
            .join("\n");
        format!("Classes:\n{classes}\n\nProperties:\n{properties}")
    }

    /// Applies `correction` to `data_store` when `shouldApply` holds, except
    /// `remove-excess`, which is never auto-applied (spec §4.14) — it is
    /// always logged instead. Returns whether the store was mutated.
    fn apply(&self, violation: &ShaclViolation, correction: &Correction, data_store: &dyn RdfStore) -> bool {
        if correction.strategy == CorrectionStrategy::RemoveExcess {
            tracing::warn!(
                focus_node = %violation.focus_node,
                "remove-excess correction requires domain judgement, not applied automatically"
            );
            return false;
        }

        if !correction.should_apply() {
            tracing::debug!(focus_node = %violation.focus_node, strategy = ?correction.strategy, "correction not applied: skip or low confidence");
            return false;
        }

        let Some(focus_node) = Self::named_node(&correction.focus_node) else {
            return false;
        };

        let applied = match correction.strategy {
            CorrectionStrategy::GenerateValue | CorrectionStrategy::CoerceDatatype | CorrectionStrategy::ReformatValue => {
                Self::apply_value_correction(data_store, &focus_node, correction)
            }
            CorrectionStrategy::ReclassifyEntity => {
                Self::apply_reclassify(data_store, &focus_node, correction)
            }
            CorrectionStrategy::RemoveExcess | CorrectionStrategy::Skip => Ok(false),
        };

        match applied {
            Ok(mutated) => mutated,
            Err(err) => {
                tracing::warn!(focus_node = %correction.focus_node, error = %err, "failed to apply correction");
                false
            }
        }
    }

    fn apply_value_correction(
        data_store: &dyn RdfStore,
        focus_node: &NamedNode,
        correction: &Correction,
    ) -> Result<bool> {
        let Some(path) = &correction.path else {
            return Ok(false);
        };
        let Some(predicate) = Self::named_node(path) else {
            return Ok(false);
        };

        if let Some(original) = &correction.original_value {
            let quad = Quad::new(
                focus_node.clone(),
                predicate.clone(),
                Self::literal_term(original),
                GraphName::DefaultGraph,
            );
            data_store.remove_quad(&quad)?;
        }

        if let Some(new_value) = &correction.new_value {
            let quad = Quad::new(
                focus_node.clone(),
                predicate,
                Self::literal_term(new_value),
                GraphName::DefaultGraph,
            );
            data_store.add_quad(quad)?;
            return Ok(true);
        }
        Ok(false)
    }

    fn apply_reclassify(
        data_store: &dyn RdfStore,
        focus_node: &NamedNode,
        correction: &Correction,
    ) -> Result<bool> {
        let Some(new_type) = &correction.new_type else {
            return Ok(false);
        };
        let Some(new_type_node) = Self::named_node(new_type) else {
            return Ok(false);
        };
        let rdf_type = NamedNode::new(RDF_TYPE).expect("constant IRI");

        let existing = data_store.get_quads(
            Some(&Subject::NamedNode(focus_node.clone())),
            Some(&rdf_type),
            None,
            None,
        )?;
        for quad in existing {
            data_store.remove_quad(&quad)?;
        }
        data_store.add_quad(Quad::new(
            focus_node.clone(),
            rdf_type,
            new_type_node,
            GraphName::DefaultGraph,
        ))?;
        Ok(true)
    }

    fn named_node(iri: &str) -> Option<NamedNode> {
        NamedNode::new(iri).ok()
    }

    fn literal_term(literal: &Literal) -> OxLiteral {
        match (&literal.datatype, &literal.language) {
            (_, Some(lang)) => OxLiteral::new_language_tagged_literal(&literal.value, lang)
                .unwrap_or_else(|_| OxLiteral::new_simple_literal(&literal.value)),
            (Some(datatype), None) => NamedNode::new(datatype)
                .map(|dt| OxLiteral::new_typed_literal(&literal.value, dt))
                .unwrap_or_else(|_| OxLiteral::new_simple_literal(&literal.value)),
            (None, None) => OxLiteral::new_simple_literal(&literal.value),
        }
    }
}

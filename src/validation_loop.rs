//! Validation–Correction Loop (spec §4.15): drives `validate → correct →
//! re-validate` against a single data store until conformance, an iteration
//! cap, or no-progress is reached.

use crate::corrector::Corrector;
use crate::error::Result;
use crate::ontology::OntologyContext;
use crate::shacl::ShaclValidator;
use crate::store::RdfStore;
use crate::types::ShaclValidationReport;
use std::time::{Duration, Instant};

/// `{ iterationIndex, violationCount, correctedCount }` (spec §4.15).
#[derive(Debug, Clone)]
pub struct IterationCheckpoint {
    pub iteration_index: usize,
    pub violation_count: usize,
    pub corrected_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    Conformant,
    MaxIterations,
    NoProgress,
    Timeout,
}

#[derive(Debug, Clone)]
pub struct ValidationCorrectionResult {
    pub report: ShaclValidationReport,
    pub iterations: Vec<IterationCheckpoint>,
    pub termination: TerminationReason,
}

/// `maxIterations` defaults to 5 (spec §4.15); `timeout` is an optional
/// wall-clock bound, checked once per iteration.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub max_iterations: usize,
    pub correction_concurrency: usize,
    pub timeout: Option<Duration>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            correction_concurrency: 4,
            timeout: None,
        }
    }
}

pub struct ValidationCorrectionLoop {
    corrector: Corrector,
    config: LoopConfig,
}

impl ValidationCorrectionLoop {
    #[must_use]
    pub fn new(corrector: Corrector, config: LoopConfig) -> Self {
        Self { corrector, config }
    }

    /// Runs the state machine `Pending → Validating → (Conformant |
    /// Correcting) → Validating → …` (spec §4.15) against `data_store`,
    /// which is the single source of truth across iterations.
    pub async fn run(
        &self,
        data_store: &dyn RdfStore,
        shapes_store: &dyn RdfStore,
        ontology: &OntologyContext,
    ) -> Result<ValidationCorrectionResult> {
        let started = Instant::now();
        let mut iterations = Vec::new();
        let mut iteration_index = 0usize;

        loop {
            let report = ShaclValidator::validate(data_store, shapes_store)?;

            if report.conforms {
                return Ok(Self::finish(report, iterations, TerminationReason::Conformant));
            }
            if iteration_index >= self.config.max_iterations {
                return Ok(Self::finish(report, iterations, TerminationReason::MaxIterations));
            }
            if let Some(timeout) = self.config.timeout {
                if started.elapsed() >= timeout {
                    return Ok(Self::finish(report, iterations, TerminationReason::Timeout));
                }
            }

            let violation_count = report.violations.len();
            let correction_result = self
                .corrector
                .correct_all(&report, data_store, ontology, self.config.correction_concurrency)
                .await?;
            let corrected_count = correction_result.corrected_count;

            tracing::info!(
                iteration_index,
                violation_count,
                corrected_count,
                "validation-correction iteration checkpoint"
            );
            iterations.push(IterationCheckpoint {
                iteration_index,
                violation_count,
                corrected_count,
            });

            if corrected_count == 0 {
                return Ok(Self::finish(report, iterations, TerminationReason::NoProgress));
            }
            iteration_index += 1;
        }
    }

    fn finish(
        report: ShaclValidationReport,
        iterations: Vec<IterationCheckpoint>,
        termination: TerminationReason,
    ) -> ValidationCorrectionResult {
        ValidationCorrectionResult {
            report,
            iterations,
            termination,
        }
    }
}

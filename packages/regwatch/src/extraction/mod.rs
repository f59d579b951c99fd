//! Extraction service: validated, self-checked structured extraction.
//!
//! Wraps an [`Extractor`] and turns its best-effort output into a contract:
//!
//! - every returned mapping is conformed to the declared schema (extraneous
//!   keys, missing required fields and type mismatches are rejected)
//! - the extractor is invoked `self_check_runs` times on the same input and
//!   every conformed mapping must be identical, otherwise the run fails with
//!   `ExtractionDeterminismViolation`
//! - empty summaries and out-of-range confidence count as an invalid
//!   payload (`ExtractionUnavailable`)
//!
//! Retries are the orchestration layer's job; this service makes exactly
//! `self_check_runs` calls per `extract`.

#[cfg(feature = "openai")]
pub mod openai;

use std::collections::BTreeSet;
use std::time::Duration;

use tracing::{debug, warn};

use crate::diff::diff_fields;
use crate::error::{PipelineError, Result};
use crate::traits::extractor::{ExtractionRequest, Extractor, ExtractorError, RawExtraction};
use crate::types::schema::{ExtractionSchema, FieldMap};

/// Validated extraction output.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub fields: FieldMap,
    pub summary: String,
    pub confidence: f64,
}

/// One validated invocation, plus the key set the backend actually returned.
struct Checked {
    extraction: Extraction,
    raw_keys: BTreeSet<String>,
}

pub struct ExtractionService<E> {
    extractor: E,
    self_check_runs: usize,
    timeout: Duration,
}

impl<E: Extractor> ExtractionService<E> {
    pub const DEFAULT_SELF_CHECK_RUNS: usize = 2;

    pub fn new(extractor: E) -> Self {
        Self {
            extractor,
            self_check_runs: Self::DEFAULT_SELF_CHECK_RUNS,
            timeout: Duration::from_secs(120),
        }
    }

    /// Number of invocations compared per extraction (minimum 1).
    pub fn with_self_check_runs(mut self, runs: usize) -> Self {
        self.self_check_runs = runs.max(1);
        self
    }

    /// Deadline for each extractor call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn extractor(&self) -> &E {
        &self.extractor
    }

    /// Extract `schema` fields from `normalized_text`.
    pub async fn extract(
        &self,
        normalized_text: &str,
        schema: &ExtractionSchema,
        instructions: Option<&str>,
    ) -> Result<Extraction> {
        let request = ExtractionRequest {
            normalized_text: normalized_text.to_string(),
            schema: schema.clone(),
            instructions: instructions.map(str::to_string),
        };

        let first = self.invoke(&request).await?;

        for run in 1..self.self_check_runs {
            let next = self.invoke(&request).await?;

            let mut differing: BTreeSet<String> =
                diff_fields(&first.extraction.fields, &next.extraction.fields)
                    .differing_keys()
                    .into_iter()
                    .collect();
            differing.extend(first.raw_keys.symmetric_difference(&next.raw_keys).cloned());

            if !differing.is_empty() {
                warn!(
                    model = %self.extractor.model(),
                    schema = %schema.name,
                    run,
                    differing = ?differing,
                    "Extraction self-check failed"
                );
                return Err(PipelineError::ExtractionDeterminismViolation {
                    first_keys: first.raw_keys.into_iter().collect(),
                    second_keys: next.raw_keys.into_iter().collect(),
                    differing_keys: differing.into_iter().collect(),
                });
            }
        }

        debug!(
            model = %self.extractor.model(),
            schema = %schema.name,
            fields = first.extraction.fields.len(),
            runs = self.self_check_runs,
            "Extraction passed self-check"
        );
        Ok(first.extraction)
    }

    async fn invoke(&self, request: &ExtractionRequest) -> Result<Checked> {
        let raw = match tokio::time::timeout(self.timeout, self.extractor.extract(request)).await {
            Ok(result) => result.map_err(unavailable)?,
            Err(_) => {
                return Err(PipelineError::ExtractionUnavailable {
                    reason: format!("timed out after {:?}", self.timeout),
                })
            }
        };
        validate(raw, &request.schema)
    }
}

fn unavailable(e: ExtractorError) -> PipelineError {
    PipelineError::ExtractionUnavailable {
        reason: e.to_string(),
    }
}

fn validate(raw: RawExtraction, schema: &ExtractionSchema) -> Result<Checked> {
    let summary = raw.summary.trim();
    if summary.is_empty() {
        return Err(PipelineError::ExtractionUnavailable {
            reason: "empty summary".into(),
        });
    }
    if !raw.confidence.is_finite() || !(0.0..=1.0).contains(&raw.confidence) {
        return Err(PipelineError::ExtractionUnavailable {
            reason: format!("confidence {} outside [0, 1]", raw.confidence),
        });
    }

    let raw_keys = raw.fields.keys().cloned().collect();
    let fields = schema
        .conform(&raw.fields)
        .map_err(|issues| PipelineError::ExtractionSchemaViolation {
            schema: schema.name.clone(),
            issues,
        })?;

    Ok(Checked {
        extraction: Extraction {
            fields,
            summary: summary.to_string(),
            confidence: raw.confidence,
        },
        raw_keys,
    })
}

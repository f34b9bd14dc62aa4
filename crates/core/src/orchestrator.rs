//! Transformation Orchestrator.
//!
//! Runs the parse → rule selection → mapping pipeline and writes exactly one
//! [`TransformationLog`] per attempt, including attempts that fail before a rule is found.
//! Transforms share no mutable state beyond the append-only log, so one orchestrator can
//! serve many concurrent callers.

use crate::store::{IntegrationStore, LogFilter};
use crate::{Actor, BridgeError, BridgeResult, IdSequence};
use bridge_mapping::{
    Direction, FieldIssue, Mapper, MappingOutcome, MappingStore, TransformStatus,
    TransformationRule,
};
use bridge_types::{Checksum, TimestampId};
use chrono::{DateTime, Utc};
use fhir::{Bundle, FHIR_VERSION};
use hl7::Hl7Message;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

/// Explicit rule selection, bypassing detection from the input.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuleHint {
    pub message_type: String,
    pub version: String,
}

impl RuleHint {
    pub fn new(message_type: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            message_type: message_type.into(),
            version: version.into(),
        }
    }
}

/// The document a transformation produced.
#[derive(Clone, Debug, PartialEq)]
pub enum TransformOutput {
    Fhir(Bundle),
    Hl7(Hl7Message),
}

impl TransformOutput {
    /// Render to wire form: FHIR Bundle JSON, or HL7 text with `\r` segment terminators.
    pub fn render(&self) -> BridgeResult<String> {
        match self {
            TransformOutput::Fhir(bundle) => Ok(bundle.to_json()?),
            TransformOutput::Hl7(message) => Ok(message.encode()),
        }
    }
}

/// What a caller gets back from [`Orchestrator::transform`].
#[derive(Clone, Debug)]
pub struct TransformationResult {
    /// Id of the audit log entry written for this attempt.
    pub log_id: TimestampId,
    pub rule_id: String,
    pub status: TransformStatus,
    /// Best-effort output. `None` when the mapping aborted.
    pub output: Option<TransformOutput>,
    pub warnings: Vec<FieldIssue>,
    pub errors: Vec<FieldIssue>,
}

/// Immutable audit record of one transform attempt.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TransformationLog {
    pub id: TimestampId,
    pub input_checksum: Checksum,
    /// Absent when the attempt failed before a rule was selected.
    pub rule_id: Option<String>,
    pub direction: Direction,
    pub message_type: Option<String>,
    pub version: Option<String>,
    pub status: TransformStatus,
    pub warnings: Vec<FieldIssue>,
    pub errors: Vec<FieldIssue>,
    /// Why the attempt was rejected before or during rule selection.
    pub failure: Option<String>,
    pub actor: Option<Actor>,
    pub created_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// What is known about an attempt so far; copied into its log entry.
#[derive(Default)]
struct Attempt {
    rule_id: Option<String>,
    message_type: Option<String>,
    version: Option<String>,
}

struct Mapped {
    rule_id: String,
    outcome: MappingOutcome<TransformOutput>,
}

pub struct Orchestrator {
    mapper: Mapper,
    store: Arc<dyn IntegrationStore>,
    log_ids: IdSequence,
}

impl Orchestrator {
    pub fn new(mapping: Arc<MappingStore>, store: Arc<dyn IntegrationStore>) -> Self {
        Self {
            mapper: Mapper::new(mapping),
            store,
            log_ids: IdSequence::default(),
        }
    }

    pub fn mapping_store(&self) -> &MappingStore {
        self.mapper.store()
    }

    /// Transform `input` in `direction` and record the attempt.
    ///
    /// The rule is chosen by `hint` when given, otherwise detected from the input: HL7 uses
    /// `MSH-9` (type and trigger) and `MSH-12`, FHIR uses the first resource type and `R4`.
    ///
    /// # Arguments
    ///
    /// * `input` - Raw HL7 wire text or FHIR JSON.
    /// * `direction` - Which way to transform.
    /// * `hint` - Optional explicit `(message type, version)`.
    /// * `actor` - Caller identity, recorded for audit only.
    ///
    /// # Errors
    ///
    /// Returns an error when the input does not parse, the rule cannot be detected or found,
    /// the rule fails validation, or the audit log cannot be written. In every case except
    /// the last, a log entry with status `failed` has been written first. Mapping problems
    /// are not errors: they come back as `Ok` with status `partial` or `failed`.
    pub async fn transform(
        &self,
        input: &[u8],
        direction: Direction,
        hint: Option<&RuleHint>,
        actor: Option<&Actor>,
    ) -> BridgeResult<TransformationResult> {
        let started = Instant::now();
        let mut attempt = Attempt::default();
        let result = self.run(input, direction, hint, &mut attempt).await;

        let (status, warnings, errors, failure) = match &result {
            Ok(mapped) => (
                mapped.outcome.status,
                mapped.outcome.warnings.clone(),
                mapped.outcome.errors.clone(),
                None,
            ),
            Err(err) => (
                TransformStatus::Failed,
                Vec::new(),
                Vec::new(),
                Some(err.to_string()),
            ),
        };

        let log = TransformationLog {
            id: self.log_ids.next().await,
            input_checksum: Checksum::of(input),
            rule_id: attempt.rule_id,
            direction,
            message_type: attempt.message_type,
            version: attempt.version,
            status,
            warnings,
            errors,
            failure,
            actor: actor.cloned(),
            created_at: Utc::now(),
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        };
        let log_id = log.id.clone();
        self.store.append_transformation_log(log).await?;

        match result {
            Ok(Mapped { rule_id, outcome }) => {
                tracing::info!(
                    log_id = %log_id,
                    rule = %rule_id,
                    direction = %direction,
                    status = %outcome.status,
                    warnings = outcome.warnings.len(),
                    "transformation recorded"
                );
                Ok(TransformationResult {
                    log_id,
                    rule_id,
                    status: outcome.status,
                    output: outcome.output,
                    warnings: outcome.warnings,
                    errors: outcome.errors,
                })
            }
            Err(err) => {
                tracing::warn!(
                    log_id = %log_id,
                    direction = %direction,
                    error = %err,
                    "transformation rejected"
                );
                Err(err)
            }
        }
    }

    /// The audit trail, newest first.
    pub async fn transformation_logs(&self, filter: &LogFilter) -> BridgeResult<Vec<TransformationLog>> {
        self.store.transformation_logs(filter).await
    }

    async fn run(
        &self,
        input: &[u8],
        direction: Direction,
        hint: Option<&RuleHint>,
        attempt: &mut Attempt,
    ) -> BridgeResult<Mapped> {
        match direction {
            Direction::Hl7ToFhir => {
                let message = Hl7Message::parse(input)?;
                let rule = self
                    .select_rule(direction, hint, message.message_type(), message.version(), attempt)
                    .await?;
                let outcome = self.mapper.to_fhir(&message, &rule).await?;
                Ok(Mapped {
                    rule_id: rule.id.clone(),
                    outcome: outcome.map(TransformOutput::Fhir),
                })
            }
            Direction::FhirToHl7 => {
                let text = std::str::from_utf8(input).map_err(|e| {
                    BridgeError::InvalidInput(format!("FHIR input is not valid UTF-8: {e}"))
                })?;
                let bundle = Bundle::from_json(text)?;
                let resource_type = bundle.first_resource_type().map(str::to_owned);
                let rule = self
                    .select_rule(
                        direction,
                        hint,
                        resource_type,
                        Some(FHIR_VERSION.to_owned()),
                        attempt,
                    )
                    .await?;
                let outcome = self.mapper.to_hl7(&bundle, &rule).await?;
                Ok(Mapped {
                    rule_id: rule.id.clone(),
                    outcome: outcome.map(TransformOutput::Hl7),
                })
            }
        }
    }

    async fn select_rule(
        &self,
        direction: Direction,
        hint: Option<&RuleHint>,
        detected_type: Option<String>,
        detected_version: Option<String>,
        attempt: &mut Attempt,
    ) -> BridgeResult<Arc<TransformationRule>> {
        let (message_type, version) = match hint {
            Some(hint) => (Some(hint.message_type.clone()), Some(hint.version.clone())),
            None => (detected_type, detected_version),
        };
        attempt.message_type = message_type.clone();
        attempt.version = version.clone();

        let message_type = message_type.ok_or(BridgeError::Undetectable("message type"))?;
        let version = version.ok_or(BridgeError::Undetectable("version"))?;

        let rule = self
            .mapper
            .store()
            .load_rule(direction, &message_type, &version)
            .await?;
        attempt.rule_id = Some(rule.id.clone());
        Ok(rule)
    }
}

//! FHIR Mapper: applies a transformation rule in either direction.
//!
//! The mapper borrows its input immutably and always builds a new output document.
//! Mappings run in rule order. Per-field problems are recorded on the outcome instead of
//! aborting, except for critical mappings and missing required segments/resources.

use crate::rule::{DocPath, FallbackPolicy, MappingKind, TransformationRule};
use crate::store::MappingStore;
use crate::transform::ValueTransform;
use crate::{Direction, MappingError, MappingResult};
use fhir::{Bundle, Node};
use hl7::{Delimiters, Hl7Message};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

// ============================================================================
// Outcome
// ============================================================================

/// Overall status of one transformation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformStatus {
    /// Every mapping applied cleanly.
    Success,
    /// Output produced with warnings.
    Partial,
    /// A field error, a critical failure, or a structural failure.
    Failed,
}

impl TransformStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TransformStatus::Success => "success",
            TransformStatus::Partial => "partial",
            TransformStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TransformStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A warning or error attached to one target path (or required segment).
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FieldIssue {
    pub target: String,
    pub message: String,
}

impl fmt::Display for FieldIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.target, self.message)
    }
}

/// Result of applying a rule.
///
/// `output` is `None` when the transformation aborted (critical field failure or missing
/// required input). A non-critical field error leaves the output in place with status
/// [`TransformStatus::Failed`].
#[derive(Clone, Debug)]
pub struct MappingOutcome<T> {
    pub output: Option<T>,
    pub status: TransformStatus,
    pub warnings: Vec<FieldIssue>,
    pub errors: Vec<FieldIssue>,
}

impl<T> MappingOutcome<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> MappingOutcome<U> {
        MappingOutcome {
            output: self.output.map(f),
            status: self.status,
            warnings: self.warnings,
            errors: self.errors,
        }
    }
}

#[derive(Default)]
struct Ledger {
    warnings: Vec<FieldIssue>,
    errors: Vec<FieldIssue>,
}

impl Ledger {
    fn warn(&mut self, target: &str, message: impl Into<String>) {
        self.warnings.push(FieldIssue {
            target: target.to_owned(),
            message: message.into(),
        });
    }

    fn error(&mut self, target: &str, message: impl Into<String>) {
        self.errors.push(FieldIssue {
            target: target.to_owned(),
            message: message.into(),
        });
    }

    fn finish<T>(self, output: Option<T>) -> MappingOutcome<T> {
        let status = if output.is_none() || !self.errors.is_empty() {
            TransformStatus::Failed
        } else if !self.warnings.is_empty() {
            TransformStatus::Partial
        } else {
            TransformStatus::Success
        };
        MappingOutcome {
            output,
            status,
            warnings: self.warnings,
            errors: self.errors,
        }
    }
}

// ============================================================================
// Documents
// ============================================================================

/// Read access to the source side of a transformation.
trait SourceDocument: Sync {
    fn read(&self, path: &DocPath) -> Option<String>;

    /// Whether a required segment id or resource type is present.
    fn contains(&self, required: &str) -> bool;

    fn required_kind(&self) -> &'static str;
}

/// Write access to the target side of a transformation.
trait TargetDocument: Send {
    fn write(&mut self, path: &DocPath, value: String) -> Result<(), String>;
}

impl SourceDocument for Hl7Message {
    fn read(&self, path: &DocPath) -> Option<String> {
        match path {
            DocPath::Hl7(p) => self.get(p),
            DocPath::Fhir(_) => None,
        }
    }

    fn contains(&self, required: &str) -> bool {
        self.has_segment(required)
    }

    fn required_kind(&self) -> &'static str {
        "required segment"
    }
}

impl SourceDocument for Bundle {
    fn read(&self, path: &DocPath) -> Option<String> {
        match path {
            DocPath::Fhir(p) => self.get(p),
            DocPath::Hl7(_) => None,
        }
    }

    fn contains(&self, required: &str) -> bool {
        self.has_resource(required)
    }

    fn required_kind(&self) -> &'static str {
        "required resource"
    }
}

impl TargetDocument for Hl7Message {
    fn write(&mut self, path: &DocPath, value: String) -> Result<(), String> {
        match path {
            DocPath::Hl7(p) => self.set(p, value).map_err(|e| e.to_string()),
            DocPath::Fhir(p) => Err(format!("'{p}' is not an HL7 path")),
        }
    }
}

impl TargetDocument for Bundle {
    fn write(&mut self, path: &DocPath, value: String) -> Result<(), String> {
        match path {
            DocPath::Fhir(p) => self.set(p, Node::Text(value)).map_err(|e| e.to_string()),
            DocPath::Hl7(p) => Err(format!("'{p}' is not a FHIR path")),
        }
    }
}

// ============================================================================
// Mapper
// ============================================================================

/// How one mapping resolved before its value is written.
enum Resolution {
    Value {
        value: String,
        warning: Option<String>,
    },
    /// Conditional with a false predicate and no `otherwise` branch.
    Skip,
    /// No value and no default.
    Missing(String),
    /// Field error (`fail-field`).
    Failed(String),
}

impl Resolution {
    fn value(value: String) -> Self {
        Resolution::Value {
            value,
            warning: None,
        }
    }
}

/// Applies [`TransformationRule`]s, resolving terminology and lookups through a
/// [`MappingStore`].
#[derive(Clone)]
pub struct Mapper {
    store: Arc<MappingStore>,
}

impl Mapper {
    pub fn new(store: Arc<MappingStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &MappingStore {
        &self.store
    }

    /// Build a FHIR bundle from an HL7 message.
    ///
    /// # Errors
    ///
    /// Returns [`MappingError::DirectionMismatch`] if `rule` is not an HL7 → FHIR rule.
    /// Mapping problems are reported on the outcome, not as errors.
    pub async fn to_fhir(
        &self,
        message: &Hl7Message,
        rule: &TransformationRule,
    ) -> MappingResult<MappingOutcome<Bundle>> {
        expect_direction(rule, Direction::Hl7ToFhir)?;
        Ok(self.run(message, Bundle::new(), rule).await)
    }

    /// Build an HL7 message from a FHIR bundle.
    ///
    /// The output starts as a bare `MSH` header with standard delimiters; the rule is
    /// expected to populate the header fields it needs.
    ///
    /// # Errors
    ///
    /// Returns [`MappingError::DirectionMismatch`] if `rule` is not a FHIR → HL7 rule.
    pub async fn to_hl7(
        &self,
        bundle: &Bundle,
        rule: &TransformationRule,
    ) -> MappingResult<MappingOutcome<Hl7Message>> {
        expect_direction(rule, Direction::FhirToHl7)?;
        let output = Hl7Message::new(Delimiters::default());
        Ok(self.run(bundle, output, rule).await)
    }

    async fn run<S, T>(&self, source: &S, mut output: T, rule: &TransformationRule) -> MappingOutcome<T>
    where
        S: SourceDocument,
        T: TargetDocument,
    {
        let mut ledger = Ledger::default();

        let missing: Vec<&String> = rule
            .required
            .iter()
            .filter(|r| !source.contains(r))
            .collect();
        if !missing.is_empty() {
            for required in missing {
                ledger.error(required, format!("{} missing", source.required_kind()));
            }
            tracing::warn!(rule = %rule.id, "required input missing; transformation aborted");
            return ledger.finish(None);
        }

        for mapping in &rule.mappings {
            let target = mapping.target.to_string();

            let value = match self.resolve(source, &mapping.kind).await {
                Resolution::Value { value, warning } => {
                    if let Some(warning) = warning {
                        ledger.warn(&target, warning);
                    }
                    value
                }
                Resolution::Skip => {
                    tracing::debug!(rule = %rule.id, target = %target, "condition false; mapping skipped");
                    continue;
                }
                Resolution::Missing(message) if mapping.critical => {
                    ledger.error(&target, message);
                    return abort(ledger, &rule.id, &target);
                }
                Resolution::Missing(message) => {
                    ledger.warn(&target, message);
                    continue;
                }
                Resolution::Failed(message) => {
                    ledger.error(&target, message);
                    if mapping.critical {
                        return abort(ledger, &rule.id, &target);
                    }
                    continue;
                }
            };

            let value = match &mapping.transform {
                Some(transform) => self.apply_transform(transform, value, &target, &mut ledger).await,
                None => value,
            };

            if let Err(reason) = output.write(&mapping.target, value) {
                ledger.error(&target, reason);
                if mapping.critical {
                    return abort(ledger, &rule.id, &target);
                }
            }
        }

        ledger.finish(Some(output))
    }

    /// Resolve a mapping kind to a value, following conditional branches until a
    /// value-producing kind is reached.
    async fn resolve<S: SourceDocument>(&self, source: &S, kind: &MappingKind) -> Resolution {
        let read = |path: &DocPath| source.read(path);
        let mut kind = kind;
        loop {
            match kind {
                MappingKind::Conditional {
                    predicate,
                    then,
                    otherwise,
                } => {
                    if predicate.evaluate(&read) {
                        kind = then.as_ref();
                    } else if let Some(otherwise) = otherwise {
                        kind = otherwise.as_ref();
                    } else {
                        return Resolution::Skip;
                    }
                }
                MappingKind::Direct {
                    source: path,
                    default_value,
                } => {
                    return match read(path).or_else(|| default_value.clone()) {
                        Some(value) => Resolution::value(value),
                        None => Resolution::Missing(format!("no value at {path} and no default")),
                    };
                }
                MappingKind::Constant { value } => return Resolution::value(value.clone()),
                MappingKind::Concatenate { sources, separator } => {
                    let parts: Vec<String> = sources.iter().filter_map(|p| read(p)).collect();
                    return if parts.is_empty() {
                        let names: Vec<String> = sources.iter().map(ToString::to_string).collect();
                        Resolution::Missing(format!("none of {} has a value", names.join(", ")))
                    } else {
                        Resolution::value(parts.join(separator))
                    };
                }
                MappingKind::Terminology {
                    source: path,
                    systems,
                    fallback,
                    default_value,
                } => {
                    let Some(code) = read(path) else {
                        return match default_value {
                            Some(value) => Resolution::value(value.clone()),
                            None => Resolution::Missing(format!("no code at {path} and no default")),
                        };
                    };

                    let reason = match self.store.resolve_terminology(systems, &code).await {
                        Ok(mapped) => return Resolution::value(mapped),
                        Err(err) => err.to_string(),
                    };

                    return match (fallback, default_value) {
                        (FallbackPolicy::UseDefaultValue, Some(value)) => Resolution::Value {
                            value: value.clone(),
                            warning: Some(format!("{reason}; used default '{value}'")),
                        },
                        (FallbackPolicy::UseSourceVerbatim, _) => Resolution::Value {
                            warning: Some(format!("{reason}; kept source code")),
                            value: code,
                        },
                        (FallbackPolicy::UseDefaultValue, None) | (FallbackPolicy::FailField, _) => {
                            Resolution::Failed(reason)
                        }
                    };
                }
            }
        }
    }

    async fn apply_transform(
        &self,
        transform: &ValueTransform,
        value: String,
        target: &str,
        ledger: &mut Ledger,
    ) -> String {
        if let Some(table) = transform.lookup_table() {
            return match self.store.lookup(table, &value).await {
                Some(mapped) => mapped,
                None => {
                    ledger.warn(
                        target,
                        format!("no entry for '{value}' in lookup table '{table}'; value kept"),
                    );
                    value
                }
            };
        }

        match transform.apply_local(&value) {
            Some(transformed) => transformed,
            None => {
                ledger.warn(
                    target,
                    format!("transform '{transform}' does not apply to '{value}'; value kept"),
                );
                value
            }
        }
    }
}

fn abort<T>(ledger: Ledger, rule: &str, target: &str) -> MappingOutcome<T> {
    tracing::warn!(rule, target, "critical mapping failed; transformation aborted");
    ledger.finish(None)
}

fn expect_direction(rule: &TransformationRule, expected: Direction) -> MappingResult<()> {
    if rule.direction() == expected {
        Ok(())
    } else {
        Err(MappingError::DirectionMismatch {
            rule: rule.id.clone(),
            expected,
            actual: rule.direction(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::RuleKey;
    use crate::ruleset::RuleSet;
    use fhir::FhirPath;
    use hl7::Hl7Path;

    const ADT: &str = "MSH|^~\\&|SIMRS|RSUD|||20250101083000||ADT^A01|MSG1|P|2.5\r\
PID|1||12345||DOE^JOHN||19800101|X\r\
PV1|1|I|W1^101^A";

    const RULES: &str = r#"
rules:
  - id: patient-name
    direction: hl7-to-fhir
    message_type: ADT_A01
    version: "2.5"
    mappings:
      - target: Patient.name[0].family
        type: direct
        source: PID.5.1
  - id: gender-verbatim
    direction: hl7-to-fhir
    message_type: ADT_A01
    version: "2.6"
    mappings:
      - target: Patient.gender
        type: terminology
        source: PID.8
        source_system: hl7-v2-0001
        target_system: http://hl7.org/fhir/administrative-gender
        fallback: use-source-verbatim
  - id: full-name
    direction: hl7-to-fhir
    message_type: ADT_A01
    version: "2.7"
    mappings:
      - target: Patient.name[0].text
        type: concatenate
        sources: [PID.5.2, PID.5.3]
        separator: " "
      - target: Patient.name[0].given[0]
        type: concatenate
        sources: [PID.5.4, PID.5.5]
      - target: Patient.birthDate
        type: direct
        source: PID.7
        transform: hl7-date-to-fhir
      - target: Patient.maritalStatus.text
        type: direct
        source: PID.16
        default: unknown
      - target: Patient.managingOrganization.display
        type: direct
        source: MSH.4
        transform: "lookup:facility"
      - target: Patient.meta.source
        type: direct
        source: MSH.3
        transform: "lookup:facility"
  - id: fail-field
    direction: hl7-to-fhir
    message_type: ADT_A01
    version: "2.8"
    mappings:
      - target: Patient.gender
        type: terminology
        source: PID.8
        source_system: hl7-v2-0001
        target_system: http://hl7.org/fhir/administrative-gender
        fallback: fail-field
      - target: Patient.name[0].family
        type: direct
        source: PID.5.1
  - id: critical
    direction: hl7-to-fhir
    message_type: ADT_A01
    version: "2.9"
    mappings:
      - target: Patient.gender
        type: terminology
        source: PID.8
        source_system: hl7-v2-0001
        target_system: http://hl7.org/fhir/administrative-gender
        fallback: fail-field
        critical: true
      - target: Patient.name[0].family
        type: direct
        source: PID.5.1
  - id: encounter
    direction: hl7-to-fhir
    message_type: ADT_A03
    version: "2.5"
    required_segments: [PID, PV2]
    mappings:
      - { target: Encounter.status, type: constant, value: finished }
  - id: conditional
    direction: hl7-to-fhir
    message_type: ADT_A08
    version: "2.5"
    mappings:
      - target: Encounter.class.code
        type: conditional
        when: "PV1.2 == 'I'"
        then: { type: constant, value: IMP }
        otherwise: { type: constant, value: AMB }
      - target: Encounter.status
        type: conditional
        when: "PV1.2 == 'O'"
        then: { type: constant, value: arrived }
      - target: Encounter.location[0].location.display
        type: conditional
        when: "exists(PV1.3) && !(PID.8 == 'M')"
        then:
          type: conditional
          when: "PV1.3.2 == '101'"
          then: { type: direct, source: PV1.3.1 }
  - id: patient-to-adt
    direction: fhir-to-hl7
    message_type: Patient
    version: R4
    required_segments: [Patient]
    mappings:
      - { target: MSH.9.1, type: constant, value: ADT }
      - { target: MSH.9.2, type: constant, value: A28 }
      - { target: MSH.12, type: constant, value: "2.5" }
      - { target: PID.3.1, type: direct, source: Patient.identifier.value }
      - { target: PID.5.1, type: direct, source: "Patient.name[0].family" }
      - { target: PID.5.2, type: direct, source: "Patient.name[0].given[0]" }
      - target: PID.7
        type: direct
        source: Patient.birthDate
        transform: fhir-date-to-hl7
      - target: PID.8
        type: terminology
        source: Patient.gender
        source_system: http://hl7.org/fhir/administrative-gender
        target_system: hl7-v2-0001
        fallback: use-default-value
        default: U
terminology:
  - source_system: hl7-v2-0001
    target_system: http://hl7.org/fhir/administrative-gender
    source_code: M
    target_code: male
  - source_system: http://hl7.org/fhir/administrative-gender
    target_system: hl7-v2-0001
    source_code: male
    target_code: M
lookup_tables:
  - name: facility
    entries:
      RSUD: Rumah Sakit Umum Daerah
"#;

    async fn mapper() -> Mapper {
        let source = Arc::new(RuleSet::from_yaml(RULES).expect("valid rule set"));
        Mapper::new(Arc::new(MappingStore::new(source).await.expect("store")))
    }

    async fn rule(mapper: &Mapper, direction: Direction, ty: &str, version: &str) -> Arc<TransformationRule> {
        mapper
            .store()
            .load_rule_by_key(&RuleKey::new(direction, ty, version))
            .await
            .expect("rule loads")
    }

    fn adt(raw: &str) -> Hl7Message {
        Hl7Message::parse(raw.as_bytes()).expect("valid HL7")
    }

    fn get(bundle: &Bundle, path: &str) -> Option<String> {
        bundle.get(&path.parse::<FhirPath>().expect("valid path"))
    }

    #[tokio::test]
    async fn direct_mapping_copies_family_name() {
        let mapper = mapper().await;
        let rule = rule(&mapper, Direction::Hl7ToFhir, "ADT_A01", "2.5").await;
        let msg = adt("MSH|^~\\&|A|B|||||ADT^A01|1|P|2.5\rPID|1||12345||DOE^JOHN");

        let outcome = mapper.to_fhir(&msg, &rule).await.expect("direction matches");
        assert_eq!(outcome.status, TransformStatus::Success);
        assert!(outcome.warnings.is_empty());
        let bundle = outcome.output.expect("bundle produced");
        assert_eq!(get(&bundle, "Patient.name[0].family").as_deref(), Some("DOE"));
    }

    #[tokio::test]
    async fn unmapped_code_kept_verbatim_is_partial() {
        let mapper = mapper().await;
        let rule = rule(&mapper, Direction::Hl7ToFhir, "ADT_A01", "2.6").await;

        let outcome = mapper.to_fhir(&adt(ADT), &rule).await.expect("direction matches");
        assert_eq!(outcome.status, TransformStatus::Partial);
        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(outcome.warnings[0].target, "Patient.gender");
        assert!(outcome.errors.is_empty());
        let bundle = outcome.output.expect("bundle produced");
        assert_eq!(get(&bundle, "Patient.gender").as_deref(), Some("X"));
    }

    #[tokio::test]
    async fn mapped_code_is_translated() {
        let mapper = mapper().await;
        let rule = rule(&mapper, Direction::Hl7ToFhir, "ADT_A01", "2.6").await;
        let msg = adt(&ADT.replace("|X\r", "|M\r"));

        let outcome = mapper.to_fhir(&msg, &rule).await.expect("direction matches");
        assert_eq!(outcome.status, TransformStatus::Success);
        let bundle = outcome.output.expect("bundle produced");
        assert_eq!(get(&bundle, "Patient.gender").as_deref(), Some("male"));
    }

    #[tokio::test]
    async fn concatenate_skips_missing_sources_and_transforms_apply() {
        let mapper = mapper().await;
        let rule = rule(&mapper, Direction::Hl7ToFhir, "ADT_A01", "2.7").await;

        let outcome = mapper.to_fhir(&adt(ADT), &rule).await.expect("direction matches");
        let bundle = outcome.output.as_ref().expect("bundle produced");

        // PID.5.3 is absent: no stray separator.
        assert_eq!(get(bundle, "Patient.name[0].text").as_deref(), Some("JOHN"));
        assert_eq!(get(bundle, "Patient.birthDate").as_deref(), Some("1980-01-01"));
        assert_eq!(get(bundle, "Patient.maritalStatus.text").as_deref(), Some("unknown"));
        assert_eq!(
            get(bundle, "Patient.managingOrganization.display").as_deref(),
            Some("Rumah Sakit Umum Daerah")
        );
        // SIMRS is not in the table: value kept with a warning.
        assert_eq!(get(bundle, "Patient.meta.source").as_deref(), Some("SIMRS"));
        // Both PID.5.4 and PID.5.5 are absent: warning, target skipped.
        assert_eq!(get(bundle, "Patient.name[0].given[0]"), None);

        let warned: Vec<&str> = outcome.warnings.iter().map(|w| w.target.as_str()).collect();
        assert_eq!(warned, vec!["Patient.name[0].given[0]", "Patient.meta.source"]);
        assert_eq!(outcome.status, TransformStatus::Partial);
    }

    #[tokio::test]
    async fn fail_field_fails_but_continues() {
        let mapper = mapper().await;
        let rule = rule(&mapper, Direction::Hl7ToFhir, "ADT_A01", "2.8").await;

        let outcome = mapper.to_fhir(&adt(ADT), &rule).await.expect("direction matches");
        assert_eq!(outcome.status, TransformStatus::Failed);
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.warnings.is_empty());
        let bundle = outcome.output.expect("non-critical failure keeps output");
        assert_eq!(get(&bundle, "Patient.gender"), None);
        assert_eq!(get(&bundle, "Patient.name[0].family").as_deref(), Some("DOE"));
    }

    #[tokio::test]
    async fn critical_failure_aborts_without_output() {
        let mapper = mapper().await;
        let rule = rule(&mapper, Direction::Hl7ToFhir, "ADT_A01", "2.9").await;

        let outcome = mapper.to_fhir(&adt(ADT), &rule).await.expect("direction matches");
        assert_eq!(outcome.status, TransformStatus::Failed);
        assert!(outcome.output.is_none());
        assert_eq!(outcome.errors[0].target, "Patient.gender");
    }

    #[tokio::test]
    async fn missing_required_segment_is_structural_failure() {
        let mapper = mapper().await;
        let rule = rule(&mapper, Direction::Hl7ToFhir, "ADT_A03", "2.5").await;

        let outcome = mapper.to_fhir(&adt(ADT), &rule).await.expect("direction matches");
        assert_eq!(outcome.status, TransformStatus::Failed);
        assert!(outcome.output.is_none());
        assert_eq!(
            outcome.errors,
            vec![FieldIssue {
                target: "PV2".into(),
                message: "required segment missing".into()
            }]
        );
    }

    #[tokio::test]
    async fn conditional_branches() {
        let mapper = mapper().await;
        let rule = rule(&mapper, Direction::Hl7ToFhir, "ADT_A08", "2.5").await;

        let outcome = mapper.to_fhir(&adt(ADT), &rule).await.expect("direction matches");
        assert_eq!(outcome.status, TransformStatus::Success);
        let bundle = outcome.output.expect("bundle produced");
        assert_eq!(get(&bundle, "Encounter.class.code").as_deref(), Some("IMP"));
        // False predicate without otherwise: skipped silently.
        assert_eq!(get(&bundle, "Encounter.status"), None);
        // Nested conditional resolves down to the direct mapping.
        assert_eq!(
            get(&bundle, "Encounter.location[0].location.display").as_deref(),
            Some("W1")
        );

        let outpatient = adt(&ADT.replace("PV1|1|I|", "PV1|1|O|"));
        let outcome = mapper.to_fhir(&outpatient, &rule).await.expect("direction matches");
        let bundle = outcome.output.expect("bundle produced");
        assert_eq!(get(&bundle, "Encounter.class.code").as_deref(), Some("AMB"));
        assert_eq!(get(&bundle, "Encounter.status").as_deref(), Some("arrived"));
    }

    #[tokio::test]
    async fn fhir_bundle_maps_to_hl7_message() {
        let mapper = mapper().await;
        let rule = rule(&mapper, Direction::FhirToHl7, "Patient", "R4").await;
        let bundle = Bundle::from_json(
            r#"{"resourceType":"Patient","identifier":[{"value":"12345"}],
                "name":[{"family":"DOE","given":["JOHN"]}],
                "birthDate":"1980-01-01","gender":"male"}"#,
        )
        .expect("valid patient");

        let outcome = mapper.to_hl7(&bundle, &rule).await.expect("direction matches");
        assert_eq!(outcome.status, TransformStatus::Success, "{:?}", outcome.warnings);
        let msg = outcome.output.expect("message produced");
        assert_eq!(msg.message_type().as_deref(), Some("ADT_A28"));
        assert_eq!(msg.version().as_deref(), Some("2.5"));
        assert_eq!(
            String::from_utf8(msg.build()).expect("utf8"),
            "MSH|^~\\&|||||||ADT^A28|||2.5\rPID|||12345||DOE^JOHN||19800101|M\r"
        );
    }

    #[tokio::test]
    async fn unmapped_code_uses_default_value() {
        let mapper = mapper().await;
        let rule = rule(&mapper, Direction::FhirToHl7, "Patient", "R4").await;
        let bundle = Bundle::from_json(
            r#"{"resourceType":"Patient","identifier":[{"value":"1"}],
                "name":[{"family":"ROE","given":["JANE"]}],
                "birthDate":"1990-02-03","gender":"other"}"#,
        )
        .expect("valid patient");

        let outcome = mapper.to_hl7(&bundle, &rule).await.expect("direction matches");
        assert_eq!(outcome.status, TransformStatus::Partial);
        let msg = outcome.output.expect("message produced");
        let sex: Hl7Path = "PID.8".parse().expect("path");
        assert_eq!(msg.get(&sex).as_deref(), Some("U"));
    }

    #[tokio::test]
    async fn wrong_direction_is_rejected() {
        let mapper = mapper().await;
        let rule = rule(&mapper, Direction::FhirToHl7, "Patient", "R4").await;
        match mapper.to_fhir(&adt(ADT), &rule).await {
            Err(MappingError::DirectionMismatch { expected, actual, .. }) => {
                assert_eq!(expected, Direction::Hl7ToFhir);
                assert_eq!(actual, Direction::FhirToHl7);
            }
            other => panic!("expected DirectionMismatch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn input_is_left_untouched() {
        let mapper = mapper().await;
        let rule = rule(&mapper, Direction::Hl7ToFhir, "ADT_A01", "2.7").await;
        let msg = adt(ADT);
        let before = msg.clone();
        let _ = mapper.to_fhir(&msg, &rule).await.expect("direction matches");
        assert_eq!(msg, before);
    }
}

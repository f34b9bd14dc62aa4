//! Rule definitions as authored, and the YAML rule set file.
//!
//! A rule set file carries three lists:
//!
//! ```yaml
//! rules:
//!   - id: adt-a01-patient
//!     direction: hl7-to-fhir
//!     message_type: ADT_A01
//!     version: "2.5"
//!     required_segments: [PID]
//!     mappings:
//!       - target: Patient.name[0].family
//!         type: direct
//!         source: PID.5.1
//!       - target: Patient.gender
//!         type: terminology
//!         source: PID.8
//!         source_system: hl7-v2-0001
//!         target_system: http://hl7.org/fhir/administrative-gender
//!         fallback: use-source-verbatim
//! terminology:
//!   - { source_system: hl7-v2-0001, target_system: http://hl7.org/fhir/administrative-gender,
//!       source_code: M, target_code: male }
//! lookup_tables:
//!   - name: facility
//!     entries: { RSUD: Rumah Sakit Umum Daerah }
//! ```
//!
//! Definitions become [`TransformationRule`]s through [`RuleDefinition::compile`], which
//! reports every validation problem at once.

use crate::predicate::Predicate;
use crate::rule::{
    CodeSystemPair, DocPath, FallbackPolicy, FieldMapping, LookupTable, MappingKind, RuleKey,
    TerminologyMapping, TransformationRule, ValidationIssue,
};
use crate::store::RuleSource;
use crate::transform::ValueTransform;
use crate::{Direction, Format, MappingError, MappingResult, MappingValidationError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tokio::sync::RwLock;

// ============================================================================
// Definition types
// ============================================================================

/// One transformation rule as written in configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleDefinition {
    pub id: String,
    pub direction: Direction,
    pub message_type: String,
    pub version: String,

    /// Segment ids (HL7 source) or resource types (FHIR source) that must be present.
    #[serde(default, skip_serializing_if = "Vec::is_empty", alias = "required_resources")]
    pub required_segments: Vec<String>,

    #[serde(default)]
    pub mappings: Vec<MappingDefinition>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingDefinition {
    pub target: String,

    #[serde(flatten)]
    pub kind: KindDefinition,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<String>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub critical: bool,
}

/// Mapping variants as written, tagged by `type`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum KindDefinition {
    Direct {
        source: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<String>,
    },
    Terminology {
        source: String,
        source_system: String,
        target_system: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        terminology_version: Option<String>,
        fallback: FallbackPolicy,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<String>,
    },
    Constant {
        value: String,
    },
    Concatenate {
        sources: Vec<String>,
        #[serde(default = "default_separator")]
        separator: String,
    },
    Conditional {
        when: String,
        then: Box<KindDefinition>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        otherwise: Option<Box<KindDefinition>>,
    },
}

fn default_separator() -> String {
    " ".to_owned()
}

// ============================================================================
// Validation
// ============================================================================

impl RuleDefinition {
    pub fn key(&self) -> RuleKey {
        RuleKey::new(
            self.direction,
            self.message_type.trim(),
            self.version.trim(),
        )
    }

    /// Validate this definition and build the rule it describes.
    ///
    /// `has_table` answers whether a lookup table name is known to the store.
    ///
    /// # Errors
    ///
    /// Returns a [`MappingValidationError`] listing every problem found:
    /// - empty id, message type, or version,
    /// - two mappings writing the same target path,
    /// - paths that do not parse for the side of the rule they address,
    /// - predicates that do not parse,
    /// - `concatenate` without sources, `use-default-value` without a default,
    /// - unknown transforms and lookup tables that do not exist.
    pub fn compile(
        &self,
        has_table: impl Fn(&str) -> bool,
    ) -> Result<TransformationRule, MappingValidationError> {
        let mut issues = Vec::new();
        for (field, value) in [
            ("id", &self.id),
            ("message_type", &self.message_type),
            ("version", &self.version),
        ] {
            if value.trim().is_empty() {
                issues.push(ValidationIssue::EmptyField { field });
            }
        }

        let mut compiler = Compiler {
            direction: self.direction,
            issues,
        };

        let mut seen_targets = HashSet::new();
        let mut mappings = Vec::with_capacity(self.mappings.len());
        for def in &self.mappings {
            let target = compiler.path(self.direction.target(), &def.target);
            if let Some(target) = &target {
                // Canonical form, so `PID[0].5` and `PID.5` collide.
                let canonical = target.to_string();
                if !seen_targets.insert(canonical.clone()) {
                    compiler
                        .issues
                        .push(ValidationIssue::DuplicateTarget { target: canonical });
                }
            }

            let transform = def
                .transform
                .as_deref()
                .and_then(|t| compiler.transform(&def.target, t, &has_table));
            let kind = compiler.kind(&def.target, &def.kind);

            if let (Some(target), Some(kind)) = (target, kind) {
                mappings.push(FieldMapping {
                    target,
                    kind,
                    transform,
                    critical: def.critical,
                });
            }
        }

        let required = self
            .required_segments
            .iter()
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty())
            .collect();

        if !compiler.issues.is_empty() {
            return Err(MappingValidationError {
                rule: self.id.clone(),
                issues: compiler.issues,
            });
        }

        Ok(TransformationRule {
            id: self.id.trim().to_owned(),
            key: self.key(),
            required,
            mappings,
        })
    }
}

/// Collects issues while a definition is compiled.
struct Compiler {
    direction: Direction,
    issues: Vec<ValidationIssue>,
}

impl Compiler {
    fn path(&mut self, format: Format, text: &str) -> Option<DocPath> {
        match DocPath::parse(format, text) {
            Ok(path) => Some(path),
            Err(reason) => {
                self.issues.push(ValidationIssue::InvalidPath {
                    path: text.to_owned(),
                    reason,
                });
                None
            }
        }
    }

    fn transform(
        &mut self,
        target: &str,
        text: &str,
        has_table: &impl Fn(&str) -> bool,
    ) -> Option<ValueTransform> {
        match text.parse::<ValueTransform>() {
            Ok(transform) => {
                if let Some(table) = transform.lookup_table() {
                    if !has_table(table) {
                        self.issues.push(ValidationIssue::UnknownLookupTable {
                            target: target.to_owned(),
                            table: table.to_owned(),
                        });
                        return None;
                    }
                }
                Some(transform)
            }
            Err(reason) => {
                self.issues.push(ValidationIssue::InvalidTransform {
                    target: target.to_owned(),
                    transform: text.to_owned(),
                    reason,
                });
                None
            }
        }
    }

    fn kind(&mut self, target: &str, def: &KindDefinition) -> Option<MappingKind> {
        let source_format = self.direction.source();
        match def {
            KindDefinition::Direct { source, default } => Some(MappingKind::Direct {
                source: self.path(source_format, source)?,
                default_value: default.clone(),
            }),
            KindDefinition::Terminology {
                source,
                source_system,
                target_system,
                terminology_version,
                fallback,
                default,
            } => {
                let source = self.path(source_format, source);
                if *fallback == FallbackPolicy::UseDefaultValue && default.is_none() {
                    self.issues.push(ValidationIssue::MissingDefault {
                        target: target.to_owned(),
                    });
                    return None;
                }
                Some(MappingKind::Terminology {
                    source: source?,
                    systems: CodeSystemPair {
                        source: source_system.clone(),
                        target: target_system.clone(),
                        version: terminology_version.clone(),
                    },
                    fallback: *fallback,
                    default_value: default.clone(),
                })
            }
            KindDefinition::Constant { value } => Some(MappingKind::Constant {
                value: value.clone(),
            }),
            KindDefinition::Concatenate { sources, separator } => {
                if sources.is_empty() {
                    self.issues.push(ValidationIssue::EmptyConcatenate {
                        target: target.to_owned(),
                    });
                    return None;
                }
                let parsed: Vec<Option<DocPath>> = sources
                    .iter()
                    .map(|s| self.path(source_format, s))
                    .collect();
                Some(MappingKind::Concatenate {
                    sources: parsed.into_iter().collect::<Option<Vec<_>>>()?,
                    separator: separator.clone(),
                })
            }
            KindDefinition::Conditional {
                when,
                then,
                otherwise,
            } => {
                let predicate = match Predicate::parse(when, source_format) {
                    Ok(p) => Some(p),
                    Err(err) => {
                        self.issues.push(ValidationIssue::InvalidPredicate {
                            predicate: when.clone(),
                            reason: err.to_string(),
                        });
                        None
                    }
                };
                let then = self.kind(target, then);
                let otherwise = match otherwise {
                    Some(def) => Some(self.kind(target, def)),
                    None => None,
                };
                Some(MappingKind::Conditional {
                    predicate: predicate?,
                    then: Box::new(then?),
                    otherwise: match otherwise {
                        Some(kind) => Some(Box::new(kind?)),
                        None => None,
                    },
                })
            }
        }
    }
}

// ============================================================================
// YAML rule set
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuleSetFile {
    #[serde(default)]
    rules: Vec<RuleDefinition>,
    #[serde(default)]
    terminology: Vec<TerminologyMapping>,
    #[serde(default)]
    lookup_tables: Vec<LookupTable>,
}

/// A rule source backed by a YAML document.
///
/// Rules written through [`RuleSource::save_rule`] replace the in-memory definition only;
/// the file on disk is left untouched.
#[derive(Debug)]
pub struct RuleSet {
    rules: RwLock<HashMap<RuleKey, RuleDefinition>>,
    terminology: Vec<TerminologyMapping>,
    lookup_tables: Vec<LookupTable>,
}

impl RuleSet {
    /// Parse a rule set from YAML text.
    ///
    /// Uses `serde_path_to_error` so that schema mismatches name the failing path
    /// (for example `rules[0].mappings[2].fallback`).
    ///
    /// # Errors
    ///
    /// Returns [`MappingError::InvalidRuleSet`] if the YAML does not match the schema, if
    /// two rules share a `(direction, message_type, version)` key, or if two lookup tables
    /// share a name. Individual rules are not validated here; see [`RuleDefinition::compile`].
    pub fn from_yaml(yaml_text: &str) -> MappingResult<Self> {
        let deserializer = serde_yaml::Deserializer::from_str(yaml_text);
        let file: RuleSetFile = match serde_path_to_error::deserialize(deserializer) {
            Ok(parsed) => parsed,
            Err(err) => {
                let path = err.path().to_string();
                let source = err.into_inner();
                let path = if path.is_empty() || path == "." {
                    "<root>"
                } else {
                    path.as_str()
                };
                return Err(MappingError::InvalidRuleSet(format!(
                    "schema mismatch at {path}: {source}"
                )));
            }
        };

        let mut rules = HashMap::with_capacity(file.rules.len());
        for def in file.rules {
            let key = def.key();
            if let Some(existing) = rules.insert(key.clone(), def) {
                return Err(MappingError::InvalidRuleSet(format!(
                    "more than one rule for {key} (first: '{}')",
                    existing.id
                )));
            }
        }

        let mut names = HashSet::new();
        for table in &file.lookup_tables {
            if !names.insert(table.name.as_str()) {
                return Err(MappingError::InvalidRuleSet(format!(
                    "lookup table '{}' is defined more than once",
                    table.name
                )));
            }
        }

        Ok(Self {
            rules: RwLock::new(rules),
            terminology: file.terminology,
            lookup_tables: file.lookup_tables,
        })
    }

    /// Read and parse a YAML rule set file.
    ///
    /// # Errors
    ///
    /// Returns [`MappingError::Io`] if the file cannot be read, otherwise as
    /// [`RuleSet::from_yaml`].
    pub fn from_path(path: &Path) -> MappingResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }
}

#[async_trait]
impl RuleSource for RuleSet {
    async fn fetch_rule(&self, key: &RuleKey) -> MappingResult<Option<RuleDefinition>> {
        Ok(self.rules.read().await.get(key).cloned())
    }

    async fn rule_keys(&self) -> MappingResult<Vec<RuleKey>> {
        let mut keys: Vec<RuleKey> = self.rules.read().await.keys().cloned().collect();
        keys.sort_by(|a, b| {
            (a.direction.as_str(), &a.message_type, &a.version).cmp(&(
                b.direction.as_str(),
                &b.message_type,
                &b.version,
            ))
        });
        Ok(keys)
    }

    async fn terminology(&self) -> MappingResult<Vec<TerminologyMapping>> {
        Ok(self.terminology.clone())
    }

    async fn lookup_tables(&self) -> MappingResult<Vec<LookupTable>> {
        Ok(self.lookup_tables.clone())
    }

    async fn save_rule(&self, definition: &RuleDefinition) -> MappingResult<()> {
        self.rules
            .write()
            .await
            .insert(definition.key(), definition.clone());
        Ok(())
    }
}

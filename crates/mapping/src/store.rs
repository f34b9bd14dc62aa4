//! Mapping Store: validated and cached access to rules and reference data.
//!
//! Rule definitions, terminology mappings, and lookup tables are owned by the integration
//! configuration layer and reached through a [`RuleSource`]. The store validates a rule the
//! first time it is requested and caches the result; it never caches a rule that fails
//! validation.
//!
//! Cache coherence is explicit: [`MappingStore::invalidate`] and
//! [`MappingStore::invalidate_all`] drop cached rules, [`MappingStore::update_rule`] writes
//! through to the source and replaces the cached entry, and
//! [`MappingStore::reload_reference_data`] re-reads terminology and lookup tables (and drops
//! every cached rule, since lookup-table references are validated against them).

use crate::rule::{CodeSystemPair, LookupTable, RuleKey, TerminologyMapping, TransformationRule};
use crate::ruleset::RuleDefinition;
use crate::{Direction, MappingError, MappingResult, MappingValidationError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

// ============================================================================
// Collaborators
// ============================================================================

/// Where rule definitions and reference data come from.
#[async_trait]
pub trait RuleSource: Send + Sync {
    /// The definition registered for `key`, if any. Definitions are returned unvalidated.
    async fn fetch_rule(&self, key: &RuleKey) -> MappingResult<Option<RuleDefinition>>;

    /// Keys of every rule the source holds.
    async fn rule_keys(&self) -> MappingResult<Vec<RuleKey>>;

    async fn terminology(&self) -> MappingResult<Vec<TerminologyMapping>>;

    async fn lookup_tables(&self) -> MappingResult<Vec<LookupTable>>;

    /// Persist a definition, replacing any definition with the same key.
    async fn save_rule(&self, definition: &RuleDefinition) -> MappingResult<()>;
}

/// A remote terminology server consulted when local mappings have no entry.
#[async_trait]
pub trait TerminologyService: Send + Sync {
    /// Translate `code`; `Ok(None)` means the server knows no translation.
    async fn translate(&self, systems: &CodeSystemPair, code: &str)
        -> MappingResult<Option<String>>;
}

// ============================================================================
// Store
// ============================================================================

type TerminologyIndex = HashMap<(String, String, String), Vec<TerminologyMapping>>;

#[derive(Default)]
struct ReferenceData {
    terminology: TerminologyIndex,
    tables: HashMap<String, LookupTable>,
}

/// Cached rules plus a generation bumped by every write-through and invalidation.
///
/// A load that started under an older generation must not publish its rule: the source
/// may have changed while it was fetching.
#[derive(Default)]
struct RuleCache {
    generation: u64,
    entries: HashMap<RuleKey, Arc<TransformationRule>>,
}

impl RuleCache {
    fn bump(&mut self) {
        self.generation = self.generation.wrapping_add(1);
    }
}

struct RemoteTerminology {
    service: Arc<dyn TerminologyService>,
    timeout: Duration,
}

pub struct MappingStore {
    source: Arc<dyn RuleSource>,
    rules: RwLock<RuleCache>,
    reference: RwLock<ReferenceData>,
    remote: Option<RemoteTerminology>,
}

impl MappingStore {
    /// Create a store over `source`, loading terminology and lookup tables eagerly.
    ///
    /// # Errors
    ///
    /// Returns the source's error if reference data cannot be read, or
    /// [`MappingError::InvalidRuleSet`] if one source code maps to two different target codes
    /// under the same code systems and version.
    pub async fn new(source: Arc<dyn RuleSource>) -> MappingResult<Self> {
        let reference = load_reference_data(source.as_ref()).await?;
        Ok(Self {
            source,
            rules: RwLock::new(RuleCache::default()),
            reference: RwLock::new(reference),
            remote: None,
        })
    }

    /// Consult `service` for codes with no local mapping, waiting at most `timeout` per call.
    pub fn with_terminology_service(
        mut self,
        service: Arc<dyn TerminologyService>,
        timeout: Duration,
    ) -> Self {
        self.remote = Some(RemoteTerminology { service, timeout });
        self
    }

    /// Load the validated rule for `(direction, message_type, version)`.
    ///
    /// # Errors
    ///
    /// Returns [`MappingError::NotFound`] if the source has no such rule, and
    /// [`MappingError::Validation`] if its definition is invalid.
    pub async fn load_rule(
        &self,
        direction: Direction,
        message_type: &str,
        version: &str,
    ) -> MappingResult<Arc<TransformationRule>> {
        self.load_rule_by_key(&RuleKey::new(direction, message_type, version))
            .await
    }

    pub async fn load_rule_by_key(&self, key: &RuleKey) -> MappingResult<Arc<TransformationRule>> {
        let generation = {
            let cache = self.rules.read().await;
            if let Some(rule) = cache.entries.get(key) {
                tracing::debug!(rule = %rule.id, key = %key, "rule cache hit");
                return Ok(Arc::clone(rule));
            }
            cache.generation
        };

        let definition = self
            .source
            .fetch_rule(key)
            .await?
            .ok_or_else(|| MappingError::NotFound(key.clone()))?;
        let rule = Arc::new(self.compile(&definition).await?);

        let mut cache = self.rules.write().await;
        if cache.generation != generation {
            // Updated or invalidated while this load was in flight.
            if let Some(current) = cache.entries.get(key) {
                return Ok(Arc::clone(current));
            }
            tracing::debug!(rule = %rule.id, key = %key, "stale rule load not cached");
            return Ok(rule);
        }

        tracing::info!(
            rule = %rule.id,
            key = %key,
            mappings = rule.mappings.len(),
            "transformation rule loaded"
        );
        Ok(Arc::clone(cache.entries.entry(key.clone()).or_insert(rule)))
    }

    async fn compile(
        &self,
        definition: &RuleDefinition,
    ) -> Result<TransformationRule, MappingValidationError> {
        let reference = self.reference.read().await;
        definition
            .compile(|name| reference.tables.contains_key(name))
            .inspect_err(|err| {
                tracing::warn!(rule = %definition.id, error = %err, "transformation rule rejected");
            })
    }

    /// Drop the cached rule for `key`. Returns whether an entry was cached.
    pub async fn invalidate(&self, key: &RuleKey) -> bool {
        let mut cache = self.rules.write().await;
        cache.bump();
        let removed = cache.entries.remove(key).is_some();
        if removed {
            tracing::debug!(key = %key, "rule cache entry invalidated");
        }
        removed
    }

    pub async fn invalidate_all(&self) {
        let mut cache = self.rules.write().await;
        cache.bump();
        cache.entries.clear();
        tracing::debug!("rule cache cleared");
    }

    /// Validate `definition`, save it to the source, and replace the cached rule.
    ///
    /// An invalid definition is rejected before anything is written, so the previous rule
    /// stays in effect.
    ///
    /// # Errors
    ///
    /// Returns [`MappingError::Validation`] for an invalid definition, or the source's error
    /// if saving fails.
    pub async fn update_rule(
        &self,
        definition: RuleDefinition,
    ) -> MappingResult<Arc<TransformationRule>> {
        let rule = Arc::new(self.compile(&definition).await?);
        self.source.save_rule(&definition).await?;
        {
            let mut cache = self.rules.write().await;
            cache.bump();
            cache.entries.insert(rule.key.clone(), Arc::clone(&rule));
        }
        tracing::info!(rule = %rule.id, key = %rule.key, "transformation rule updated");
        Ok(rule)
    }

    /// Re-read terminology mappings and lookup tables from the source.
    ///
    /// Cached rules are dropped so lookup-table references are validated again.
    pub async fn reload_reference_data(&self) -> MappingResult<()> {
        let reference = load_reference_data(self.source.as_ref()).await?;
        *self.reference.write().await = reference;
        self.invalidate_all().await;
        Ok(())
    }

    /// Load every rule the source holds, returning the ones that fail validation.
    ///
    /// Valid rules end up cached.
    pub async fn validate_all(&self) -> MappingResult<Vec<MappingValidationError>> {
        let mut failures = Vec::new();
        for key in self.source.rule_keys().await? {
            match self.load_rule_by_key(&key).await {
                Ok(_) => {}
                Err(MappingError::Validation(err)) => failures.push(err),
                Err(other) => return Err(other),
            }
        }
        Ok(failures)
    }

    /// Number of rules currently cached.
    pub async fn cached_rules(&self) -> usize {
        self.rules.read().await.entries.len()
    }

    /// Translate `code` from `systems.source` to `systems.target`.
    ///
    /// Local mappings are consulted first. When none matches and a remote service is
    /// configured, it is called under the configured timeout; a timeout or service error is
    /// treated as no translation.
    ///
    /// # Errors
    ///
    /// Returns [`MappingError::Unmapped`] when no translation is found.
    pub async fn resolve_terminology(
        &self,
        systems: &CodeSystemPair,
        code: &str,
    ) -> MappingResult<String> {
        {
            let reference = self.reference.read().await;
            let key = (systems.source.clone(), systems.target.clone(), code.to_owned());
            if let Some(target) = reference
                .terminology
                .get(&key)
                .and_then(|candidates| pick(candidates, systems.version.as_deref()))
            {
                return Ok(target.to_owned());
            }
        }

        if let Some(remote) = &self.remote {
            match tokio::time::timeout(remote.timeout, remote.service.translate(systems, code))
                .await
            {
                Ok(Ok(Some(target))) => return Ok(target),
                Ok(Ok(None)) => {}
                Ok(Err(err)) => {
                    tracing::warn!(systems = %systems, code, error = %err, "terminology service failed");
                }
                Err(_) => {
                    tracing::warn!(
                        systems = %systems,
                        code,
                        timeout_ms = remote.timeout.as_millis() as u64,
                        "terminology service timed out"
                    );
                }
            }
        }

        Err(MappingError::Unmapped {
            systems: systems.clone(),
            code: code.to_owned(),
        })
    }

    /// Value for `key` in the lookup table `table`.
    pub async fn lookup(&self, table: &str, key: &str) -> Option<String> {
        self.reference
            .read()
            .await
            .tables
            .get(table)
            .and_then(|t| t.get(key))
            .map(str::to_owned)
    }
}

/// Choose among mappings of one source code: an exact version match, then an unversioned
/// mapping, then (only when no version was asked for) any mapping.
fn pick<'a>(candidates: &'a [TerminologyMapping], version: Option<&str>) -> Option<&'a str> {
    candidates
        .iter()
        .find(|m| version.is_some() && m.version.as_deref() == version)
        .or_else(|| candidates.iter().find(|m| m.version.is_none()))
        .or_else(|| version.is_none().then(|| candidates.first()).flatten())
        .map(|m| m.target_code.as_str())
}

async fn load_reference_data(source: &dyn RuleSource) -> MappingResult<ReferenceData> {
    let mut terminology: TerminologyIndex = HashMap::new();
    for mapping in source.terminology().await? {
        let key = (
            mapping.source_system.clone(),
            mapping.target_system.clone(),
            mapping.source_code.clone(),
        );
        let candidates = terminology.entry(key).or_default();
        if let Some(existing) = candidates
            .iter()
            .find(|m| m.version == mapping.version && m.target_code != mapping.target_code)
        {
            return Err(MappingError::InvalidRuleSet(format!(
                "code '{}' in {} maps to both '{}' and '{}'",
                mapping.source_code, mapping.source_system, existing.target_code, mapping.target_code
            )));
        }
        candidates.push(mapping);
    }

    let tables = source
        .lookup_tables()
        .await?
        .into_iter()
        .map(|t| (t.name.clone(), t))
        .collect();

    Ok(ReferenceData {
        terminology,
        tables,
    })
}

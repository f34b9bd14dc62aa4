//! # Bridge Core
//!
//! Orchestration and monitoring for the HL7 v2 / FHIR R4 bridge:
//! - [`Orchestrator`]: parse, select a rule, map, and record one audit log per attempt
//! - [`IntegrationMonitor`]: append integration events, derive endpoint status, raise alerts
//! - [`HealthPoller`]: background probing of registered endpoints
//! - [`IntegrationStore`]: the persistence capability, with an in-memory implementation
//!
//! **No API concerns**: HTTP handlers, authentication and transport to external systems
//! belong to the callers of this crate. Callers pass in the identity ([`Actor`]) they
//! authenticated, and this crate records it for audit.

pub mod config;
mod error;
pub mod integration;
pub mod monitor;
pub mod orchestrator;
pub mod poller;
pub mod store;

use bridge_types::{NonEmptyText, TimestampId};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::Mutex;

pub use config::{BridgeConfig, MonitorConfig, StatusWindow};
pub use error::{BridgeError, BridgeResult};
pub use integration::{
    AlertCondition, EndpointDefinition, EndpointKind, EndpointStatus, EventRecord,
    IntegrationAlert, IntegrationEndpoint, IntegrationErrorKind, IntegrationEvent,
    IntegrationMetric,
};
pub use monitor::IntegrationMonitor;
pub use orchestrator::{
    Orchestrator, RuleHint, TransformOutput, TransformationLog, TransformationResult,
};
pub use poller::{EndpointProbe, HealthPoller, PollerHandle, ProbeError, TcpProbe};
pub use store::{EventQuery, IntegrationStore, LogFilter, MemoryStore};

/// Identity of the caller, as supplied by the authentication layer.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    pub id: NonEmptyText,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl Actor {
    pub fn new(id: impl AsRef<str>) -> BridgeResult<Self> {
        let id = NonEmptyText::new(id)
            .map_err(|_| BridgeError::InvalidInput("actor id cannot be empty".into()))?;
        Ok(Self {
            id,
            display_name: None,
        })
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id.as_str())
    }
}

/// Issues strictly increasing [`TimestampId`]s for one append-only sequence.
#[derive(Default)]
pub(crate) struct IdSequence {
    last: Mutex<Option<TimestampId>>,
}

impl IdSequence {
    pub(crate) async fn next(&self) -> TimestampId {
        let mut last = self.last.lock().await;
        let id = TimestampId::generate(last.as_ref());
        *last = Some(id.clone());
        id
    }
}

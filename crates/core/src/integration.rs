//! Integration endpoints and the event-sourced records kept about them.
//!
//! Events, alerts and transformation logs are append-only. The only mutable fields are the
//! cached endpoint status (always derived from events by the monitor) and the
//! acknowledgement fields of an alert.

use crate::config::StatusWindow;
use crate::{Actor, BridgeError, BridgeResult};
use bridge_types::{NonEmptyText, TimestampId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Endpoints
// ============================================================================

/// Kind of external system behind an endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EndpointKind {
    /// National health-insurance integration.
    Bpjs,
    /// National FHIR health-data exchange.
    Satusehat,
    Hl7Mllp,
    FhirRest,
    Other,
}

/// Derived health of an endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointStatus {
    Unknown,
    Healthy,
    Degraded,
    Down,
}

impl EndpointStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EndpointStatus::Unknown => "unknown",
            EndpointStatus::Healthy => "healthy",
            EndpointStatus::Degraded => "degraded",
            EndpointStatus::Down => "down",
        }
    }
}

impl fmt::Display for EndpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One external integration point.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct IntegrationEndpoint {
    pub id: NonEmptyText,
    pub name: String,
    pub kind: EndpointKind,
    /// `host:port` probed by the health poller, if any.
    pub address: Option<String>,
    /// Cached result of the last status derivation.
    pub status: EndpointStatus,
    pub status_changed_at: Option<DateTime<Utc>>,
    pub registered_at: DateTime<Utc>,
}

/// Registration data for an endpoint, as authored in the endpoints file.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EndpointDefinition {
    pub id: NonEmptyText,
    pub name: String,
    pub kind: EndpointKind,
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct EndpointsFile {
    endpoints: Vec<EndpointDefinition>,
}

impl EndpointDefinition {
    /// Parse an endpoints file:
    ///
    /// ```yaml
    /// endpoints:
    ///   - id: satusehat
    ///     name: SATUSEHAT FHIR API
    ///     kind: satusehat
    ///     address: api-satusehat.kemkes.go.id:443
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::YamlDeserialization`] naming the failing path, or
    /// [`BridgeError::InvalidInput`] when two endpoints share an id.
    pub fn parse_file(yaml: &str) -> BridgeResult<Vec<EndpointDefinition>> {
        let deserializer = serde_yaml::Deserializer::from_str(yaml);
        let file: EndpointsFile = serde_path_to_error::deserialize(deserializer).map_err(|e| {
            let path = e.path().to_string();
            let path = if path.is_empty() || path == "." {
                "<root>"
            } else {
                path.as_str()
            };
            BridgeError::YamlDeserialization(format!(
                "endpoints file mismatch at {path}: {}",
                e.inner()
            ))
        })?;

        let mut seen = std::collections::HashSet::new();
        for endpoint in &file.endpoints {
            if !seen.insert(endpoint.id.as_str()) {
                return Err(BridgeError::InvalidInput(format!(
                    "endpoint '{}' is defined more than once",
                    endpoint.id
                )));
            }
        }
        Ok(file.endpoints)
    }

    /// Read and parse an endpoints file from disk.
    pub fn load(path: &std::path::Path) -> BridgeResult<Vec<EndpointDefinition>> {
        let yaml = std::fs::read_to_string(path).map_err(|source| BridgeError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse_file(&yaml)
    }
}

// ============================================================================
// Events
// ============================================================================

/// Classification of a transport-level failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IntegrationErrorKind {
    EndpointUnavailable,
    Timeout,
    /// The endpoint answered and refused the request.
    Rejected,
    /// The endpoint answered with something that is not a valid response.
    Protocol,
    Internal,
}

impl IntegrationErrorKind {
    /// Whether a caller's retry policy may retry this failure. Nothing in this crate
    /// retries on its own.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            IntegrationErrorKind::EndpointUnavailable | IntegrationErrorKind::Timeout
        )
    }
}

impl fmt::Display for IntegrationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IntegrationErrorKind::EndpointUnavailable => "endpoint-unavailable",
            IntegrationErrorKind::Timeout => "timeout",
            IntegrationErrorKind::Rejected => "rejected",
            IntegrationErrorKind::Protocol => "protocol",
            IntegrationErrorKind::Internal => "internal",
        })
    }
}

/// Something observed about an endpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum IntegrationEvent {
    /// A completed request/response exchange.
    Log {
        success: bool,
        latency_ms: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status_code: Option<u16>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
    },
    /// A transport-level failure.
    Error {
        kind: IntegrationErrorKind,
        message: String,
    },
    HealthCheck {
        healthy: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        latency_ms: Option<u64>,
    },
}

impl IntegrationEvent {
    pub fn is_failure(&self) -> bool {
        match self {
            IntegrationEvent::Log { success, .. } => !success,
            IntegrationEvent::Error { .. } => true,
            IntegrationEvent::HealthCheck { healthy, .. } => !healthy,
        }
    }

    pub fn latency_ms(&self) -> Option<u64> {
        match self {
            IntegrationEvent::Log { latency_ms, .. } => Some(*latency_ms),
            IntegrationEvent::HealthCheck { latency_ms, .. } => *latency_ms,
            IntegrationEvent::Error { .. } => None,
        }
    }
}

/// An event as stored.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EventRecord {
    pub id: TimestampId,
    pub endpoint_id: String,
    pub recorded_at: DateTime<Utc>,
    pub event: IntegrationEvent,
}

// ============================================================================
// Alerts
// ============================================================================

/// Status condition an alert was raised for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertCondition {
    Degraded,
    Down,
}

impl AlertCondition {
    /// The alert condition for a status, if the status is alert-worthy.
    pub fn for_status(status: EndpointStatus) -> Option<Self> {
        match status {
            EndpointStatus::Degraded => Some(AlertCondition::Degraded),
            EndpointStatus::Down => Some(AlertCondition::Down),
            EndpointStatus::Unknown | EndpointStatus::Healthy => None,
        }
    }
}

impl fmt::Display for AlertCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AlertCondition::Degraded => "degraded",
            AlertCondition::Down => "down",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct IntegrationAlert {
    pub id: TimestampId,
    pub endpoint_id: String,
    pub condition: AlertCondition,
    pub message: String,
    pub raised_at: DateTime<Utc>,
    pub acknowledged_by: Option<Actor>,
    pub acknowledged_at: Option<DateTime<Utc>>,
}

impl IntegrationAlert {
    pub fn is_open(&self) -> bool {
        self.acknowledged_at.is_none()
    }
}

// ============================================================================
// Metrics
// ============================================================================

/// Aggregates over a window of events. Always derived, never stored.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct IntegrationMetric {
    pub endpoint_id: String,
    pub window: StatusWindow,
    pub total: usize,
    pub successes: usize,
    pub failures: usize,
    pub health_checks: usize,
    /// `failures / total`; zero when there are no events.
    pub error_rate: f64,
    pub average_latency_ms: Option<f64>,
    pub max_latency_ms: Option<u64>,
    pub last_event_at: Option<DateTime<Utc>>,
}

impl IntegrationMetric {
    /// Aggregate `events` (any order) for `endpoint_id`.
    pub fn from_events(endpoint_id: &str, window: StatusWindow, events: &[EventRecord]) -> Self {
        let total = events.len();
        let failures = events.iter().filter(|e| e.event.is_failure()).count();
        let health_checks = events
            .iter()
            .filter(|e| matches!(e.event, IntegrationEvent::HealthCheck { .. }))
            .count();

        let latencies: Vec<u64> = events.iter().filter_map(|e| e.event.latency_ms()).collect();
        let average_latency_ms = if latencies.is_empty() {
            None
        } else {
            Some(latencies.iter().sum::<u64>() as f64 / latencies.len() as f64)
        };

        Self {
            endpoint_id: endpoint_id.to_owned(),
            window,
            total,
            successes: total - failures,
            failures,
            health_checks,
            error_rate: if total == 0 {
                0.0
            } else {
                failures as f64 / total as f64
            },
            average_latency_ms,
            max_latency_ms: latencies.iter().copied().max(),
            last_event_at: events.iter().map(|e| e.recorded_at).max(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(event: IntegrationEvent) -> EventRecord {
        EventRecord {
            id: TimestampId::generate(None),
            endpoint_id: "satusehat".into(),
            recorded_at: Utc::now(),
            event,
        }
    }

    #[test]
    fn parses_endpoints_file() {
        let yaml = r#"
endpoints:
  - id: satusehat
    name: SATUSEHAT FHIR API
    kind: satusehat
    address: api-satusehat.kemkes.go.id:443
  - id: lab-mllp
    name: Laboratory HL7 feed
    kind: hl7-mllp
"#;
        let endpoints = EndpointDefinition::parse_file(yaml).expect("valid endpoints");
        assert_eq!(endpoints.len(), 2);
        assert_eq!(endpoints[0].kind, EndpointKind::Satusehat);
        assert_eq!(endpoints[1].kind, EndpointKind::Hl7Mllp);
        assert_eq!(endpoints[1].address, None);
    }

    #[test]
    fn endpoints_file_errors_name_the_path() {
        let yaml = "endpoints:\n  - id: x\n    name: X\n    kind: ftp\n";
        match EndpointDefinition::parse_file(yaml) {
            Err(BridgeError::YamlDeserialization(msg)) => {
                assert!(msg.contains("endpoints[0].kind"), "{msg}")
            }
            other => panic!("expected YamlDeserialization, got {other:?}"),
        }

        let duplicate = "endpoints:\n  - {id: x, name: X, kind: other}\n  - {id: x, name: Y, kind: other}\n";
        assert!(matches!(
            EndpointDefinition::parse_file(duplicate),
            Err(BridgeError::InvalidInput(_))
        ));

        let blank_id = "endpoints:\n  - {id: ' ', name: X, kind: other}\n";
        assert!(EndpointDefinition::parse_file(blank_id).is_err());
    }

    #[test]
    fn failure_classification() {
        assert!(IntegrationEvent::Log {
            success: false,
            latency_ms: 10,
            status_code: Some(500),
            summary: None
        }
        .is_failure());
        assert!(!IntegrationEvent::HealthCheck {
            healthy: true,
            latency_ms: Some(3)
        }
        .is_failure());
        assert!(IntegrationErrorKind::Timeout.is_retryable());
        assert!(IntegrationErrorKind::EndpointUnavailable.is_retryable());
        assert!(!IntegrationErrorKind::Rejected.is_retryable());
        assert!(!IntegrationErrorKind::Protocol.is_retryable());
    }

    #[test]
    fn events_serialise_with_type_tag() {
        let event = IntegrationEvent::Error {
            kind: IntegrationErrorKind::EndpointUnavailable,
            message: "connection refused".into(),
        };
        let json = serde_json::to_value(&event).expect("serialise");
        assert_eq!(json["type"], "error");
        assert_eq!(json["kind"], "endpoint-unavailable");
    }

    #[test]
    fn metrics_aggregate_events() {
        let events = vec![
            record(IntegrationEvent::Log {
                success: true,
                latency_ms: 100,
                status_code: Some(200),
                summary: None,
            }),
            record(IntegrationEvent::Error {
                kind: IntegrationErrorKind::Timeout,
                message: "no answer".into(),
            }),
            record(IntegrationEvent::HealthCheck {
                healthy: true,
                latency_ms: Some(20),
            }),
            record(IntegrationEvent::Log {
                success: false,
                latency_ms: 300,
                status_code: Some(503),
                summary: None,
            }),
        ];

        let metric = IntegrationMetric::from_events("satusehat", StatusWindow::Count(10), &events);
        assert_eq!(metric.total, 4);
        assert_eq!(metric.failures, 2);
        assert_eq!(metric.successes, 2);
        assert_eq!(metric.health_checks, 1);
        assert_eq!(metric.error_rate, 0.5);
        assert_eq!(metric.average_latency_ms, Some(140.0));
        assert_eq!(metric.max_latency_ms, Some(300));
        assert!(metric.last_event_at.is_some());

        let empty = IntegrationMetric::from_events("satusehat", StatusWindow::Count(10), &[]);
        assert_eq!(empty.error_rate, 0.0);
        assert_eq!(empty.average_latency_ms, None);
        assert_eq!(empty.last_event_at, None);
    }
}

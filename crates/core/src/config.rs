//! Core runtime configuration.
//!
//! Configuration is resolved once at process startup and passed into the orchestrator, the
//! monitor and the health poller. Nothing in this crate reads environment variables while
//! handling a transform or an integration event; binaries read the raw values and hand them
//! to the `*_from_env_value` helpers below.
//!
//! The status window, failure threshold and degraded error rate have no defaults. They
//! depend on the traffic profile of each deployment and must be configured explicitly.

use crate::{BridgeError, BridgeResult};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Poll interval used when `BRIDGE_POLL_INTERVAL_SECS` is not set.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Terminology timeout used when `BRIDGE_TERMINOLOGY_TIMEOUT_MS` is not set.
pub const DEFAULT_TERMINOLOGY_TIMEOUT: Duration = Duration::from_millis(2_000);

// ============================================================================
// Status window
// ============================================================================

/// Trailing window of integration events considered when deriving endpoint status.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusWindow {
    /// The most recent `n` events.
    Count(usize),
    /// Events recorded within this duration of now.
    Duration(Duration),
}

impl FromStr for StatusWindow {
    type Err = BridgeError;

    /// Parse `50` (event count) or `90s`, `15m`, `1h` (time span).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || {
            BridgeError::InvalidConfig(format!(
                "status window '{s}' must be an event count (e.g. 50) or a duration (e.g. 90s, 15m, 1h)"
            ))
        };

        let (digits, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
            Some(idx) => s.split_at(idx),
            None => (s, ""),
        };
        let amount: u64 = digits.parse().map_err(|_| invalid())?;
        if amount == 0 {
            return Err(BridgeError::InvalidConfig(
                "status window must not be empty".into(),
            ));
        }

        let secs = match unit {
            "" => {
                let count = usize::try_from(amount).map_err(|_| invalid())?;
                return Ok(StatusWindow::Count(count));
            }
            "s" => amount,
            "m" => amount.checked_mul(60).ok_or_else(invalid)?,
            "h" => amount.checked_mul(3_600).ok_or_else(invalid)?,
            _ => return Err(invalid()),
        };
        Ok(StatusWindow::Duration(Duration::from_secs(secs)))
    }
}

impl fmt::Display for StatusWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusWindow::Count(n) => write!(f, "last {n} events"),
            StatusWindow::Duration(d) => write!(f, "last {}s", d.as_secs()),
        }
    }
}

impl serde::Serialize for StatusWindow {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

// ============================================================================
// Monitor configuration
// ============================================================================

/// Thresholds used to derive endpoint status.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MonitorConfig {
    window: StatusWindow,
    failure_threshold: usize,
    degraded_error_rate: f64,
}

impl MonitorConfig {
    /// Create a new `MonitorConfig`.
    ///
    /// # Arguments
    ///
    /// * `window` - Trailing window of events used for status and alerts.
    /// * `failure_threshold` - Consecutive failures (newest first) that mark an endpoint down.
    /// * `degraded_error_rate` - Error-rate fraction over the window above which an endpoint
    ///   is degraded. Must be in `[0, 1)`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::InvalidConfig`] for an empty window, a zero threshold, a count
    /// window smaller than the threshold, or an error rate outside `[0, 1)`.
    pub fn new(
        window: StatusWindow,
        failure_threshold: usize,
        degraded_error_rate: f64,
    ) -> BridgeResult<Self> {
        match window {
            StatusWindow::Count(0) => {
                return Err(BridgeError::InvalidConfig(
                    "status window must hold at least one event".into(),
                ))
            }
            StatusWindow::Duration(d) if d.is_zero() => {
                return Err(BridgeError::InvalidConfig(
                    "status window duration must be positive".into(),
                ))
            }
            _ => {}
        }
        if failure_threshold == 0 {
            return Err(BridgeError::InvalidConfig(
                "failure threshold must be at least 1".into(),
            ));
        }
        if let StatusWindow::Count(n) = window {
            if n < failure_threshold {
                return Err(BridgeError::InvalidConfig(format!(
                    "status window of {n} events can never hold {failure_threshold} consecutive failures"
                )));
            }
        }
        if !(0.0..1.0).contains(&degraded_error_rate) {
            return Err(BridgeError::InvalidConfig(format!(
                "degraded error rate must be in [0, 1), got {degraded_error_rate}"
            )));
        }

        Ok(Self {
            window,
            failure_threshold,
            degraded_error_rate,
        })
    }

    pub fn window(&self) -> StatusWindow {
        self.window
    }

    pub fn failure_threshold(&self) -> usize {
        self.failure_threshold
    }

    pub fn degraded_error_rate(&self) -> f64 {
        self.degraded_error_rate
    }
}

// ============================================================================
// Bridge configuration
// ============================================================================

/// Configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct BridgeConfig {
    rules_path: PathBuf,
    endpoints_path: Option<PathBuf>,
    monitor: MonitorConfig,
    terminology_timeout: Duration,
    poll_interval: Duration,
}

impl BridgeConfig {
    pub fn new(
        rules_path: PathBuf,
        endpoints_path: Option<PathBuf>,
        monitor: MonitorConfig,
        terminology_timeout: Duration,
        poll_interval: Duration,
    ) -> BridgeResult<Self> {
        if terminology_timeout.is_zero() {
            return Err(BridgeError::InvalidConfig(
                "terminology timeout must be positive".into(),
            ));
        }
        if poll_interval.is_zero() {
            return Err(BridgeError::InvalidConfig(
                "poll interval must be positive".into(),
            ));
        }

        Ok(Self {
            rules_path,
            endpoints_path,
            monitor,
            terminology_timeout,
            poll_interval,
        })
    }

    pub fn rules_path(&self) -> &Path {
        &self.rules_path
    }

    pub fn endpoints_path(&self) -> Option<&Path> {
        self.endpoints_path.as_deref()
    }

    pub fn monitor(&self) -> &MonitorConfig {
        &self.monitor
    }

    pub fn terminology_timeout(&self) -> Duration {
        self.terminology_timeout
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}

// ============================================================================
// Environment value helpers
// ============================================================================

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required(name: &str, value: Option<String>) -> BridgeResult<String> {
    non_empty(value).ok_or_else(|| BridgeError::InvalidConfig(format!("{name} is required")))
}

/// Parse a required path variable such as `BRIDGE_RULES_PATH`.
pub fn path_from_env_value(name: &str, value: Option<String>) -> BridgeResult<PathBuf> {
    required(name, value).map(PathBuf::from)
}

/// Parse an optional path variable such as `BRIDGE_ENDPOINTS_PATH`.
pub fn optional_path_from_env_value(value: Option<String>) -> Option<PathBuf> {
    non_empty(value).map(PathBuf::from)
}

/// Parse `BRIDGE_STATUS_WINDOW`. Required.
pub fn status_window_from_env_value(value: Option<String>) -> BridgeResult<StatusWindow> {
    required("BRIDGE_STATUS_WINDOW", value)?.parse()
}

/// Parse `BRIDGE_FAILURE_THRESHOLD`. Required.
pub fn failure_threshold_from_env_value(value: Option<String>) -> BridgeResult<usize> {
    let raw = required("BRIDGE_FAILURE_THRESHOLD", value)?;
    raw.parse().map_err(|_| {
        BridgeError::InvalidConfig(format!(
            "BRIDGE_FAILURE_THRESHOLD must be a positive integer, got '{raw}'"
        ))
    })
}

/// Parse `BRIDGE_DEGRADED_ERROR_RATE`. Required.
pub fn degraded_error_rate_from_env_value(value: Option<String>) -> BridgeResult<f64> {
    let raw = required("BRIDGE_DEGRADED_ERROR_RATE", value)?;
    raw.parse().map_err(|_| {
        BridgeError::InvalidConfig(format!(
            "BRIDGE_DEGRADED_ERROR_RATE must be a fraction, got '{raw}'"
        ))
    })
}

/// Parse `BRIDGE_POLL_INTERVAL_SECS`, defaulting to [`DEFAULT_POLL_INTERVAL`].
pub fn poll_interval_from_env_value(value: Option<String>) -> BridgeResult<Duration> {
    let Some(raw) = non_empty(value) else {
        return Ok(DEFAULT_POLL_INTERVAL);
    };
    raw.parse().map(Duration::from_secs).map_err(|_| {
        BridgeError::InvalidConfig(format!(
            "BRIDGE_POLL_INTERVAL_SECS must be whole seconds, got '{raw}'"
        ))
    })
}

/// Parse `BRIDGE_TERMINOLOGY_TIMEOUT_MS`, defaulting to [`DEFAULT_TERMINOLOGY_TIMEOUT`].
pub fn terminology_timeout_from_env_value(value: Option<String>) -> BridgeResult<Duration> {
    let Some(raw) = non_empty(value) else {
        return Ok(DEFAULT_TERMINOLOGY_TIMEOUT);
    };
    raw.parse().map(Duration::from_millis).map_err(|_| {
        BridgeError::InvalidConfig(format!(
            "BRIDGE_TERMINOLOGY_TIMEOUT_MS must be whole milliseconds, got '{raw}'"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_window_parses_counts_and_durations() {
        assert_eq!("50".parse::<StatusWindow>().expect("count"), StatusWindow::Count(50));
        assert_eq!(
            " 90s ".parse::<StatusWindow>().expect("seconds"),
            StatusWindow::Duration(Duration::from_secs(90))
        );
        assert_eq!(
            "15m".parse::<StatusWindow>().expect("minutes"),
            StatusWindow::Duration(Duration::from_secs(900))
        );
        assert_eq!(
            "1h".parse::<StatusWindow>().expect("hours"),
            StatusWindow::Duration(Duration::from_secs(3_600))
        );
        for bad in ["", "0", "0s", "ten", "5d", "-5", "1.5m"] {
            assert!(bad.parse::<StatusWindow>().is_err(), "{bad:?} should fail");
        }
    }

    #[test]
    fn monitor_config_validates_inputs() {
        assert!(MonitorConfig::new(StatusWindow::Count(20), 5, 0.5).is_ok());
        assert!(MonitorConfig::new(StatusWindow::Count(0), 5, 0.5).is_err());
        assert!(MonitorConfig::new(StatusWindow::Duration(Duration::ZERO), 5, 0.5).is_err());
        assert!(MonitorConfig::new(StatusWindow::Count(20), 0, 0.5).is_err());
        assert!(MonitorConfig::new(StatusWindow::Count(20), 5, 1.0).is_err());
        assert!(MonitorConfig::new(StatusWindow::Count(20), 5, -0.1).is_err());
        assert!(MonitorConfig::new(StatusWindow::Count(20), 5, f64::NAN).is_err());
    }

    #[test]
    fn count_window_must_fit_the_failure_threshold() {
        assert!(MonitorConfig::new(StatusWindow::Count(5), 5, 0.5).is_ok());
        match MonitorConfig::new(StatusWindow::Count(4), 5, 0.5) {
            Err(BridgeError::InvalidConfig(msg)) => assert!(msg.contains("4 events")),
            other => panic!("expected InvalidConfig, got {other:?}"),
        }
        // A time window has no fixed event count.
        let window = StatusWindow::Duration(Duration::from_secs(60));
        assert!(MonitorConfig::new(window, 50, 0.5).is_ok());
    }

    #[test]
    fn monitor_thresholds_are_required() {
        match status_window_from_env_value(None) {
            Err(BridgeError::InvalidConfig(msg)) => assert!(msg.contains("BRIDGE_STATUS_WINDOW")),
            other => panic!("expected InvalidConfig, got {other:?}"),
        }
        assert!(failure_threshold_from_env_value(Some("  ".into())).is_err());
        assert!(degraded_error_rate_from_env_value(None).is_err());
        assert_eq!(
            failure_threshold_from_env_value(Some("5".into())).expect("threshold"),
            5
        );
        assert!(failure_threshold_from_env_value(Some("five".into())).is_err());
        assert_eq!(
            degraded_error_rate_from_env_value(Some("0.25".into())).expect("rate"),
            0.25
        );
    }

    #[test]
    fn optional_values_fall_back_to_defaults() {
        assert_eq!(
            poll_interval_from_env_value(None).expect("default"),
            DEFAULT_POLL_INTERVAL
        );
        assert_eq!(
            poll_interval_from_env_value(Some("10".into())).expect("parsed"),
            Duration::from_secs(10)
        );
        assert_eq!(
            terminology_timeout_from_env_value(Some(" ".into())).expect("default"),
            DEFAULT_TERMINOLOGY_TIMEOUT
        );
        assert!(terminology_timeout_from_env_value(Some("1.5".into())).is_err());
        assert_eq!(optional_path_from_env_value(Some("".into())), None);
        assert!(path_from_env_value("BRIDGE_RULES_PATH", None).is_err());
    }

    #[test]
    fn bridge_config_rejects_zero_durations() {
        let monitor = MonitorConfig::new(StatusWindow::Count(10), 3, 0.5).expect("valid");
        assert!(BridgeConfig::new(
            "rules.yaml".into(),
            None,
            monitor,
            Duration::ZERO,
            DEFAULT_POLL_INTERVAL
        )
        .is_err());
        let config = BridgeConfig::new(
            "rules.yaml".into(),
            Some("endpoints.yaml".into()),
            monitor,
            DEFAULT_TERMINOLOGY_TIMEOUT,
            DEFAULT_POLL_INTERVAL,
        )
        .expect("valid");
        assert_eq!(config.rules_path(), Path::new("rules.yaml"));
        assert_eq!(config.endpoints_path(), Some(Path::new("endpoints.yaml")));
        assert_eq!(config.monitor().failure_threshold(), 3);
    }
}

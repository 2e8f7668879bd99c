//! Anomaly detection over grid-edge telemetry: rule checks, statistical
//! baselines, and alert cooldown.

pub mod baseline;
pub mod cooldown;
pub mod engine;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("insufficient baseline data: need {needed} samples, have {have}")]
    InsufficientBaseline { needed: usize, have: usize },

    #[error("baseline window has zero variance")]
    ZeroVariance,

    #[error("unknown severity '{0}'")]
    UnknownSeverity(String),
}

/// Severity levels for emitted alerts. Stored lowercase in the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Severity {
    type Err = DetectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(Severity::Info),
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(DetectError::UnknownSeverity(other.to_string())),
        }
    }
}

/// A single telemetry field. Payloads mix numeric readings with text
/// markers like `status`; only numeric values are baselined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Number(f64),
    Text(String),
}

impl MetricValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetricValue::Number(v) => Some(*v),
            MetricValue::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            MetricValue::Number(_) => None,
            MetricValue::Text(t) => Some(t.as_str()),
        }
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        MetricValue::Number(v)
    }
}

impl From<&str> for MetricValue {
    fn from(v: &str) -> Self {
        MetricValue::Text(v.to_string())
    }
}

/// One telemetry snapshot for one component. Transient; a derived record
/// is what gets persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub component: String,
    pub payload: BTreeMap<String, MetricValue>,
}

impl TelemetrySample {
    pub fn new(component: impl Into<String>, payload: BTreeMap<String, MetricValue>) -> Self {
        Self {
            component: component.into(),
            payload,
        }
    }

    pub fn numeric(&self, metric: &str) -> Option<f64> {
        self.payload.get(metric).and_then(MetricValue::as_f64)
    }

    pub fn text(&self, metric: &str) -> Option<&str> {
        self.payload.get(metric).and_then(MetricValue::as_text)
    }
}

/// An emitted alert. Immutable once produced; persisted as a security
/// event with this record as its JSON context.
#[derive(Debug, Clone, Serialize)]
pub struct AlertRecord {
    pub component: String,
    pub reason: String,
    pub severity: Severity,
    pub metric: String,
    pub value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mitigation: Option<String>,
}

impl AlertRecord {
    /// Deduplication key: the same component re-raising the same reason
    /// is suppressed inside the cooldown window.
    pub fn key(&self) -> String {
        format!("{}:{}", self.component, self.reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_value_deserializes_untagged() {
        let payload: BTreeMap<String, MetricValue> =
            serde_json::from_str(r#"{"voltage": 231.5, "status": "online"}"#).unwrap();
        assert_eq!(payload["voltage"].as_f64(), Some(231.5));
        assert_eq!(payload["status"].as_text(), Some("online"));
    }

    #[test]
    fn severity_round_trips_lowercase() {
        assert_eq!("critical".parse::<Severity>().unwrap(), Severity::Critical);
        assert_eq!(Severity::Medium.to_string(), "medium");
        assert!("warning".parse::<Severity>().is_err());
    }
}

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::error;

use crate::detect::baseline::BaselineStore;
use crate::detect::cooldown::CooldownTracker;
use crate::detect::{AlertRecord, Severity, TelemetrySample};
use crate::storage::store::Store;

fn default_deviation_threshold() -> f64 {
    4.0
}

fn default_cooldown_seconds() -> u64 {
    120
}

fn default_baseline_window() -> usize {
    100
}

/// Tunables for the anomaly engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectConfig {
    /// Statistical alerts fire at this many standard deviations (inclusive).
    #[serde(default = "default_deviation_threshold")]
    pub deviation_threshold: f64,

    /// Repeat alerts for the same component and reason are suppressed
    /// inside this window.
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u64,

    /// Observations retained per component metric.
    #[serde(default = "default_baseline_window")]
    pub baseline_window: usize,
}

impl Default for DetectConfig {
    fn default() -> Self {
        Self {
            deviation_threshold: default_deviation_threshold(),
            cooldown_seconds: default_cooldown_seconds(),
            baseline_window: default_baseline_window(),
        }
    }
}

/// Hybrid rule-based and statistical anomaly detection over telemetry
/// snapshots. Owns its baseline and cooldown state; construct one per
/// process (or per test).
pub struct AnomalyEngine {
    cfg: DetectConfig,
    store: Arc<dyn Store>,
    baseline: BaselineStore,
    cooldown: CooldownTracker,
}

impl AnomalyEngine {
    pub fn new(cfg: DetectConfig, store: Arc<dyn Store>) -> Self {
        let baseline = BaselineStore::new(cfg.baseline_window);
        let cooldown = CooldownTracker::new(Duration::from_secs(cfg.cooldown_seconds));
        Self {
            cfg,
            store,
            baseline,
            cooldown,
        }
    }

    /// Fold every numeric metric of every sample into the rolling
    /// baselines. Text fields are not baselined.
    pub fn update_baseline(&mut self, samples: &[TelemetrySample]) {
        for sample in samples {
            for (metric, value) in &sample.payload {
                if let Some(v) = value.as_f64() {
                    self.baseline.observe(&sample.component, metric, v);
                }
            }
        }
    }

    /// Evaluate samples for anomalies. Candidates pass rule checks, then
    /// statistical checks, then the cooldown filter; survivors are
    /// persisted and returned. A persistence failure is logged, never
    /// propagated.
    pub fn analyze(&mut self, samples: &[TelemetrySample]) -> Vec<AlertRecord> {
        let mut alerts = Vec::new();
        for sample in samples {
            let mut candidates = self.rule_checks(sample);
            candidates.extend(self.statistical_checks(sample));
            for alert in candidates {
                if !self.cooldown.should_emit(&alert.key()) {
                    continue;
                }
                self.persist_alert(&alert, "ids_alert");
                alerts.push(alert);
            }
        }
        alerts
    }

    /// Persist telemetry snapshots for forensics, upserting components.
    pub fn ingest_and_store(&self, samples: &[TelemetrySample]) {
        for sample in samples {
            let payload = match serde_json::to_value(&sample.payload) {
                Ok(payload) => payload,
                Err(e) => {
                    error!(component = %sample.component, "failed to encode telemetry: {e}");
                    continue;
                }
            };
            let result = self
                .store
                .create_or_get_component(&sample.component)
                .and_then(|c| self.store.record_telemetry(c.id, &payload, "normal"));
            if let Err(e) = result {
                error!(component = %sample.component, "failed to persist telemetry: {e}");
            }
        }
    }

    /// Record a synthetic alert from the operator-facing attack catalog.
    /// Bypasses the cooldown: simulations always record.
    pub fn simulate_attack(&self, attack_type: &str, component: Option<&str>) -> AlertRecord {
        let component = component.unwrap_or("microgrid-core");
        let (severity, description, mitigation) = match attack_type {
            "dos" => (
                Severity::Critical,
                "Detected high-rate traffic saturating control interface",
                "Rate limiting applied, offending IPs blocked",
            ),
            "spoof" => (
                Severity::High,
                "Detected spoofed telemetry with inconsistent signatures",
                "Telemetry quarantined, device certificates revalidated",
            ),
            "malware" => (
                Severity::Critical,
                "Firmware integrity violation detected during scan",
                "Patch manager rolled back update and isolated node",
            ),
            _ => (
                Severity::Medium,
                "Generic anomalous behavior detected",
                "Standard containment applied",
            ),
        };
        let alert = AlertRecord {
            component: component.to_string(),
            reason: format!("Simulated {attack_type} attack"),
            severity,
            metric: attack_type.to_string(),
            value: 1.0,
            description: Some(description.to_string()),
            mitigation: Some(mitigation.to_string()),
        };
        self.persist_alert(&alert, "attack_simulation");
        alert
    }

    /// Drop all baseline history. Operator-triggered reload path.
    pub fn reset_baseline(&mut self) {
        self.baseline.clear();
    }

    fn rule_checks(&self, sample: &TelemetrySample) -> Vec<AlertRecord> {
        let mut alerts = Vec::new();
        let component = &sample.component;

        if sample.text("status") == Some("offline") {
            alerts.push(rule_alert(component, "Device offline", Severity::High, "status", 0.0));
        }
        if let Some(voltage) = sample.numeric("voltage") {
            if !(200.0..=260.0).contains(&voltage) {
                alerts.push(rule_alert(
                    component,
                    "Voltage out of bounds",
                    Severity::Medium,
                    "voltage",
                    voltage,
                ));
            }
        }
        if let Some(frequency) = sample.numeric("frequency") {
            if (frequency - 60.0).abs() > 1.5 {
                alerts.push(rule_alert(
                    component,
                    "Frequency deviation",
                    Severity::Medium,
                    "frequency",
                    frequency,
                ));
            }
        }
        if let Some(failed_logins) = sample.numeric("failed_logins") {
            if failed_logins > 5.0 {
                alerts.push(rule_alert(
                    component,
                    "Excessive failed logins",
                    Severity::High,
                    "failed_logins",
                    failed_logins,
                ));
            }
        }

        alerts
    }

    fn statistical_checks(&self, sample: &TelemetrySample) -> Vec<AlertRecord> {
        let mut alerts = Vec::new();
        let Some(metrics) = self.baseline.component(&sample.component) else {
            return alerts;
        };
        for (metric, window) in metrics {
            let Some(current) = sample.numeric(metric) else {
                continue;
            };
            // Too-small or zero-variance windows are skipped, not alerted
            let Ok(z) = window.z_score(current) else {
                continue;
            };
            if z >= self.cfg.deviation_threshold {
                alerts.push(AlertRecord {
                    component: sample.component.clone(),
                    reason: format!("{metric} deviation z={z:.2}"),
                    severity: Severity::Medium,
                    metric: metric.clone(),
                    value: current,
                    description: None,
                    mitigation: None,
                });
            }
        }
        alerts
    }

    fn persist_alert(&self, alert: &AlertRecord, category: &str) {
        let details = format!("{} on {}", alert.reason, alert.component);
        let context = serde_json::to_value(alert).ok();
        if let Err(e) =
            self.store
                .record_security_event(alert.severity, category, &details, context, None)
        {
            error!(component = %alert.component, "failed to persist alert: {e}");
        }
    }
}

fn rule_alert(
    component: &str,
    reason: &str,
    severity: Severity,
    metric: &str,
    value: f64,
) -> AlertRecord {
    AlertRecord {
        component: component.to_string(),
        reason: reason.to_string(),
        severity,
        metric: metric.to_string(),
        value,
        description: None,
        mitigation: None,
    }
}

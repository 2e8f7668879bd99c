//! Telemetry synthesis for the simulated fleet: seed catalog, per-cycle
//! jitter, and the ingestion cycle the scheduler drives.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::detect::engine::AnomalyEngine;
use crate::detect::{AlertRecord, MetricValue, TelemetrySample};

/// One seed node. Per-cycle readings are jittered from these nominals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetNode {
    pub name: String,
    pub telemetry: BTreeMap<String, MetricValue>,
}

/// Load a seed catalog from a JSON file.
pub fn load_fleet(path: &Path) -> Result<Vec<FleetNode>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read fleet file: {}", path.display()))?;
    let fleet: Vec<FleetNode> = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse fleet file: {}", path.display()))?;
    Ok(fleet)
}

/// Compiled-in fleet used when no seed file is configured.
pub fn default_fleet() -> Vec<FleetNode> {
    fn node(name: &str, fields: &[(&str, MetricValue)]) -> FleetNode {
        let mut telemetry = BTreeMap::new();
        for (key, value) in fields {
            telemetry.insert(key.to_string(), value.clone());
        }
        FleetNode {
            name: name.to_string(),
            telemetry,
        }
    }

    vec![
        node(
            "solar-inverter-a1",
            &[
                ("voltage", 231.0.into()),
                ("frequency", 60.0.into()),
                ("power_kw", 42.0.into()),
                ("status", "online".into()),
            ],
        ),
        node(
            "battery-bank-b1",
            &[
                ("voltage", 228.5.into()),
                ("frequency", 60.0.into()),
                ("soc", 76.0.into()),
                ("status", "online".into()),
            ],
        ),
        node(
            "feeder-relay-f3",
            &[
                ("voltage", 233.0.into()),
                ("frequency", 59.9.into()),
                ("failed_logins", 1.0.into()),
                ("status", "online".into()),
            ],
        ),
        node(
            "substation-gw",
            &[
                ("voltage", 230.0.into()),
                ("frequency", 60.1.into()),
                ("power_kw", 118.0.into()),
                ("failed_logins", 0.0.into()),
                ("status", "online".into()),
            ],
        ),
    ]
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

fn jitter_numeric<R: Rng>(rng: &mut R, key: &str, value: f64) -> f64 {
    match key {
        "voltage" => round2((value + rng.gen_range(-14.0..18.0)).max(0.0)),
        "frequency" => round3(value + rng.gen_range(-1.2..1.2)),
        "power_kw" | "soc" => round2((value + rng.gen_range(-22.0..28.0)).max(0.0)),
        _ => {
            let span = (value.abs() * 0.08).max(1.0);
            round2(value + rng.gen_range(-span..span))
        }
    }
}

/// Jitter a nominal payload into one cycle's readings. A small fraction
/// of cycles force the node offline with zeroed electricals.
pub fn jitter_payload<R: Rng>(
    rng: &mut R,
    nominal: &BTreeMap<String, MetricValue>,
) -> BTreeMap<String, MetricValue> {
    let mut payload = BTreeMap::new();
    for (key, value) in nominal {
        match value {
            MetricValue::Number(v) => {
                if key == "failed_logins" {
                    let jittered = (*v as i64 + rng.gen_range(-2..=3)).max(0);
                    payload.insert(key.clone(), MetricValue::Number(jittered as f64));
                } else {
                    payload.insert(key.clone(), MetricValue::Number(jitter_numeric(rng, key, *v)));
                }
            }
            MetricValue::Text(t) => {
                payload.insert(key.clone(), MetricValue::Text(t.clone()));
            }
        }
    }

    if rng.gen::<f64>() < 0.12 {
        payload.insert("status".to_string(), MetricValue::Text("offline".to_string()));
        payload.insert("voltage".to_string(), MetricValue::Number(0.0));
        payload.insert("frequency".to_string(), MetricValue::Number(0.0));
    } else if !payload.contains_key("status") {
        payload.insert("status".to_string(), MetricValue::Text("online".to_string()));
    }

    if !payload.contains_key("failed_logins") {
        payload.insert(
            "failed_logins".to_string(),
            MetricValue::Number(rng.gen_range(0..=4) as f64),
        );
    }

    payload
}

/// Synthesize one cycle of samples for the whole fleet.
pub fn synthesize<R: Rng>(rng: &mut R, fleet: &[FleetNode]) -> Vec<TelemetrySample> {
    fleet
        .iter()
        .map(|node| TelemetrySample::new(node.name.clone(), jitter_payload(rng, &node.telemetry)))
        .collect()
}

/// One full ingestion cycle: synthesize, baseline, persist, analyze.
/// Surviving alerts are logged and returned.
pub fn run_cycle<R: Rng>(
    engine: &Mutex<AnomalyEngine>,
    fleet: &[FleetNode],
    rng: &mut R,
) -> Vec<AlertRecord> {
    let samples = synthesize(rng, fleet);
    let mut engine = engine.lock();
    engine.update_baseline(&samples);
    engine.ingest_and_store(&samples);
    let alerts = engine.analyze(&samples);
    for alert in &alerts {
        warn!(
            component = %alert.component,
            severity = %alert.severity,
            metric = %alert.metric,
            "{}", alert.reason
        );
    }
    alerts
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn jitter_preserves_keys_and_fills_required_fields() {
        let mut rng = StdRng::seed_from_u64(11);
        let fleet = default_fleet();
        let nominal = &fleet[0].telemetry;

        for _ in 0..200 {
            let payload = jitter_payload(&mut rng, nominal);
            assert!(payload.contains_key("status"));
            assert!(payload.contains_key("failed_logins"));
            for key in nominal.keys() {
                assert!(payload.contains_key(key), "missing {key}");
            }
            let voltage = payload["voltage"].as_f64().unwrap();
            assert!(voltage >= 0.0);
            let failed = payload["failed_logins"].as_f64().unwrap();
            assert!(failed >= 0.0);
        }
    }

    #[test]
    fn jitter_occasionally_forces_nodes_offline() {
        let mut rng = StdRng::seed_from_u64(3);
        let fleet = default_fleet();
        let nominal = &fleet[0].telemetry;

        let mut offline = 0;
        for _ in 0..500 {
            let payload = jitter_payload(&mut rng, nominal);
            if payload["status"].as_text() == Some("offline") {
                offline += 1;
                assert_eq!(payload["voltage"].as_f64(), Some(0.0));
                assert_eq!(payload["frequency"].as_f64(), Some(0.0));
            }
        }
        // Around 12% of 500 draws; generous bounds to stay seed-stable
        assert!(offline > 20, "offline draws: {offline}");
        assert!(offline < 150, "offline draws: {offline}");
    }

    #[test]
    fn synthesize_covers_the_whole_fleet() {
        let mut rng = StdRng::seed_from_u64(5);
        let fleet = default_fleet();
        let samples = synthesize(&mut rng, &fleet);
        assert_eq!(samples.len(), fleet.len());
        assert_eq!(samples[0].component, "solar-inverter-a1");
    }

    #[test]
    fn fleet_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleet.json");
        let fleet = default_fleet();
        std::fs::write(&path, serde_json::to_string_pretty(&fleet).unwrap()).unwrap();

        let loaded = load_fleet(&path).unwrap();
        assert_eq!(loaded.len(), fleet.len());
        assert_eq!(loaded[1].name, "battery-bank-b1");
        assert_eq!(loaded[1].telemetry["soc"].as_f64(), Some(76.0));

        assert!(load_fleet(&dir.path().join("missing.json")).is_err());
    }
}

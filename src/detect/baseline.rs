use std::collections::{BTreeMap, VecDeque};

use crate::detect::DetectError;

/// Minimum observations before a metric is judged statistically.
pub const MIN_SAMPLES: usize = 5;

/// Bounded window of recent observations for one metric. Oldest values
/// drop first once the cap is reached.
#[derive(Debug, Clone)]
pub struct MetricWindow {
    values: VecDeque<f64>,
    cap: usize,
}

impl MetricWindow {
    pub fn new(cap: usize) -> Self {
        Self {
            values: VecDeque::with_capacity(cap),
            cap,
        }
    }

    pub fn push(&mut self, value: f64) {
        if self.values.len() == self.cap {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.values.iter().copied()
    }

    pub fn mean(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.values.iter().sum::<f64>() / self.values.len() as f64
    }

    /// Population standard deviation of the window.
    pub fn std_dev(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        let mean = self.mean();
        let sum_sq_diff: f64 = self.values.iter().map(|&x| (x - mean).powi(2)).sum();
        (sum_sq_diff / self.values.len() as f64).sqrt()
    }

    /// Absolute z-score of `value` against this window.
    ///
    /// Errors when the window is too small to judge or has zero variance;
    /// callers skip the metric in either case.
    pub fn z_score(&self, value: f64) -> Result<f64, DetectError> {
        if self.values.len() < MIN_SAMPLES {
            return Err(DetectError::InsufficientBaseline {
                needed: MIN_SAMPLES,
                have: self.values.len(),
            });
        }
        let std = self.std_dev();
        if std == 0.0 {
            return Err(DetectError::ZeroVariance);
        }
        Ok((value - self.mean()).abs() / std)
    }
}

/// Per-component, per-metric rolling histories. Lives for the process
/// lifetime unless explicitly cleared.
#[derive(Debug)]
pub struct BaselineStore {
    window: usize,
    components: BTreeMap<String, BTreeMap<String, MetricWindow>>,
}

impl BaselineStore {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            components: BTreeMap::new(),
        }
    }

    pub fn observe(&mut self, component: &str, metric: &str, value: f64) {
        let window = self.window;
        self.components
            .entry(component.to_string())
            .or_default()
            .entry(metric.to_string())
            .or_insert_with(|| MetricWindow::new(window))
            .push(value);
    }

    pub fn component(&self, component: &str) -> Option<&BTreeMap<String, MetricWindow>> {
        self.components.get(component)
    }

    pub fn clear(&mut self) {
        self.components.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_keeps_most_recent_values() {
        let mut w = MetricWindow::new(100);
        for i in 0..150 {
            w.push(i as f64);
        }
        assert_eq!(w.len(), 100);
        let values: Vec<f64> = w.values().collect();
        assert_eq!(values[0], 50.0);
        assert_eq!(values[99], 149.0);
    }

    #[test]
    fn stats_match_hand_computed_values() {
        let mut w = MetricWindow::new(10);
        for v in [1.0, 2.0, 3.0, 4.0, 5.0] {
            w.push(v);
        }
        assert_eq!(w.mean(), 3.0);
        // Population variance of 1..5 is 2.0
        assert!((w.std_dev() - 2.0_f64.sqrt()).abs() < 1e-12);
        let z = w.z_score(10.0).unwrap();
        assert!(z > 4.9);
    }

    #[test]
    fn z_score_requires_enough_samples() {
        let mut w = MetricWindow::new(10);
        for v in [1.0, 2.0, 3.0, 4.0] {
            w.push(v);
        }
        assert!(matches!(
            w.z_score(100.0),
            Err(DetectError::InsufficientBaseline { needed: 5, have: 4 })
        ));
    }

    #[test]
    fn z_score_skips_constant_baseline() {
        let mut w = MetricWindow::new(10);
        for _ in 0..8 {
            w.push(42.0);
        }
        assert!(matches!(w.z_score(999.0), Err(DetectError::ZeroVariance)));
    }

    #[test]
    fn store_tracks_components_independently() {
        let mut store = BaselineStore::new(100);
        store.observe("n1", "voltage", 230.0);
        store.observe("n2", "voltage", 231.0);
        store.observe("n1", "frequency", 60.0);

        let n1 = store.component("n1").unwrap();
        assert_eq!(n1.len(), 2);
        assert_eq!(n1["voltage"].len(), 1);
        assert!(store.component("n3").is_none());

        store.clear();
        assert!(store.is_empty());
    }
}

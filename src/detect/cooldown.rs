use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Suppresses repeated alerts for the same key inside a cooldown window.
///
/// Best-effort cache: eviction may forget a key early (at worst one extra
/// alert), but a key never blocks insertion of a new one.
#[derive(Debug)]
pub struct CooldownTracker {
    cooldown: Duration,
    last_emit: HashMap<String, Instant>,
}

impl CooldownTracker {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_emit: HashMap::new(),
        }
    }

    /// Returns true if the alert should be emitted, recording the emit
    /// time. Entries idle for more than five cooldown windows are dropped
    /// on the way through.
    pub fn should_emit(&mut self, key: &str) -> bool {
        let now = Instant::now();
        if let Some(&last) = self.last_emit.get(key) {
            if now.duration_since(last) < self.cooldown {
                return false;
            }
        }
        self.last_emit.insert(key.to_string(), now);

        let stale_after = self.cooldown * 5;
        self.last_emit
            .retain(|_, &mut ts| now.duration_since(ts) <= stale_after);
        true
    }

    pub fn len(&self) -> usize {
        self.last_emit.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_emit.is_empty()
    }
}

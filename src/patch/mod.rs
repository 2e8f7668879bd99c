//! Firmware patch rollout for grid-edge components: scheduling with
//! checksum notation, then apply with simulated deployment latency and
//! failure injection.

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{error, info};

use crate::storage::store::{Store, StoreError};

#[derive(Debug, Error)]
pub enum PatchError {
    #[error("invalid patch request: {0}")]
    Invalid(&'static str),

    /// Status writes are surfaced: a lost lifecycle record would leave
    /// the operator blind.
    #[error("patch status write failed: {0}")]
    Store(#[from] StoreError),
}

/// Lifecycle state of one rollout. Linear: pending, in_progress, then
/// exactly one terminal state. Terminal states never transition again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchState {
    Pending,
    InProgress,
    Success,
    Failed,
}

impl PatchState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatchState::Pending => "pending",
            PatchState::InProgress => "in_progress",
            PatchState::Success => "success",
            PatchState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> PatchState {
        match s {
            "in_progress" => PatchState::InProgress,
            "success" => PatchState::Success,
            "failed" => PatchState::Failed,
            _ => PatchState::Pending,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PatchState::Success | PatchState::Failed)
    }
}

impl std::fmt::Display for PatchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable rollout request. The checksum is derived, never stored
/// on the request itself.
#[derive(Debug, Clone)]
pub struct PatchRequest {
    pub component_name: String,
    pub version: String,
    pub payload: Vec<u8>,
    pub requested_by: String,
}

impl PatchRequest {
    /// Lowercase-hex SHA-256 of the payload bytes.
    pub fn checksum(&self) -> String {
        hex::encode(Sha256::digest(&self.payload))
    }
}

/// The in-flight view of one persisted rollout.
#[derive(Debug, Clone)]
pub struct PatchTicket {
    pub id: i64,
    pub component_id: i64,
    pub version: String,
    pub state: PatchState,
    pub notes: String,
}

fn default_failure_rate() -> f64 {
    0.1
}

fn default_processing_delay_ms() -> u64 {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchConfig {
    /// Probability in [0, 1] that an apply draw fails validation.
    #[serde(default = "default_failure_rate")]
    pub failure_rate: f64,

    /// Simulated deployment latency per status. One bounded pause, no
    /// spinning, no shared locks held across it.
    #[serde(default = "default_processing_delay_ms")]
    pub processing_delay_ms: u64,
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self {
            failure_rate: default_failure_rate(),
            processing_delay_ms: default_processing_delay_ms(),
        }
    }
}

impl PatchConfig {
    pub fn processing_delay(&self) -> Duration {
        Duration::from_millis(self.processing_delay_ms)
    }
}

/// Drives the pending -> in_progress -> {success|failed} lifecycle.
pub struct PatchManager {
    cfg: PatchConfig,
    store: Arc<dyn Store>,
    rng: StdRng,
}

impl PatchManager {
    pub fn new(cfg: PatchConfig, store: Arc<dyn Store>) -> Self {
        Self {
            cfg,
            store,
            rng: StdRng::from_entropy(),
        }
    }

    /// Seeded constructor so tests can pin apply outcomes.
    pub fn with_seed(cfg: PatchConfig, store: Arc<dyn Store>, seed: u64) -> Self {
        Self {
            cfg,
            store,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Validate the request, upsert its component, and persist a pending
    /// status whose notes carry the payload checksum.
    pub fn schedule_patch(&self, request: &PatchRequest) -> Result<PatchTicket, PatchError> {
        if request.component_name.trim().is_empty() {
            return Err(PatchError::Invalid("component_name is required"));
        }
        if request.version.trim().is_empty() {
            return Err(PatchError::Invalid("version is required"));
        }

        info!(
            component = %request.component_name,
            version = %request.version,
            "scheduling patch"
        );
        let component = self.store.create_or_get_component(&request.component_name)?;
        let notes = format!("Checksum {}", request.checksum());
        let id = self.store.insert_patch_status(
            component.id,
            &request.version,
            PatchState::Pending,
            &request.requested_by,
            &notes,
        )?;
        Ok(PatchTicket {
            id,
            component_id: component.id,
            version: request.version.clone(),
            state: PatchState::Pending,
            notes,
        })
    }

    /// Run every ticket to a terminal state. Tickets are independent: a
    /// persistence failure on one is reported but does not stop the rest.
    /// No retries; a failed patch needs a fresh request.
    pub async fn apply_patches(&mut self, tickets: &mut [PatchTicket]) -> Result<(), PatchError> {
        let mut first_err = None;
        for ticket in tickets.iter_mut() {
            if let Err(e) = self.apply_one(ticket).await {
                error!(id = ticket.id, version = %ticket.version, "patch apply failed to persist: {e}");
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn apply_one(&mut self, ticket: &mut PatchTicket) -> Result<(), PatchError> {
        ticket.state = PatchState::InProgress;
        self.store
            .update_patch_status(ticket.id, PatchState::InProgress, &ticket.notes)?;

        tokio::time::sleep(self.cfg.processing_delay()).await;

        let failed = self.rng.gen::<f64>() < self.cfg.failure_rate;
        let (state, note) = if failed {
            (PatchState::Failed, " Automated validation failed.")
        } else {
            (PatchState::Success, " Patch applied successfully.")
        };
        ticket.notes.push_str(note);
        ticket.state = state;
        self.store
            .update_patch_status(ticket.id, state, &ticket.notes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{open_pool, SqliteStore};

    fn test_store() -> (tempfile::TempDir, Arc<dyn Store>) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("patch.db");
        let pool = open_pool(path.to_str().unwrap()).unwrap();
        (dir, Arc::new(SqliteStore::new(pool)))
    }

    fn request(payload: &[u8]) -> PatchRequest {
        PatchRequest {
            component_name: "solar-inverter-a1".to_string(),
            version: "2.1.0".to_string(),
            payload: payload.to_vec(),
            requested_by: "operator".to_string(),
        }
    }

    fn fast_config(failure_rate: f64) -> PatchConfig {
        PatchConfig {
            failure_rate,
            processing_delay_ms: 1,
        }
    }

    #[test]
    fn checksum_is_deterministic_and_payload_sensitive() {
        let a = request(b"firmware image v2");
        let b = request(b"firmware image v2");
        let c = request(b"firmware image v3");
        assert_eq!(a.checksum(), b.checksum());
        assert_ne!(a.checksum(), c.checksum());
        assert_eq!(a.checksum().len(), 64);
        assert_eq!(a.checksum(), a.checksum().to_lowercase());
    }

    #[test]
    fn schedule_rejects_incomplete_requests() {
        let (_dir, store) = test_store();
        let manager = PatchManager::new(fast_config(0.0), store);

        let mut bad = request(b"x");
        bad.component_name = String::new();
        assert!(matches!(
            manager.schedule_patch(&bad),
            Err(PatchError::Invalid(_))
        ));

        let mut bad = request(b"x");
        bad.version = "  ".to_string();
        assert!(matches!(
            manager.schedule_patch(&bad),
            Err(PatchError::Invalid(_))
        ));
    }

    #[test]
    fn schedule_persists_pending_with_checksum() {
        let (_dir, store) = test_store();
        let manager = PatchManager::new(fast_config(0.0), store.clone());

        let req = request(b"firmware image");
        let ticket = manager.schedule_patch(&req).unwrap();
        assert_eq!(ticket.state, PatchState::Pending);
        assert!(ticket.notes.contains(&req.checksum()));

        let row = store.get_patch_status(ticket.id).unwrap();
        assert_eq!(row.state, PatchState::Pending);
        assert!(row.notes.starts_with("Checksum "));
    }

    #[test]
    fn apply_reaches_success_when_failure_rate_is_zero() {
        let (_dir, store) = test_store();
        let mut manager = PatchManager::new(fast_config(0.0), store.clone());

        let req = request(b"firmware image");
        let ticket = manager.schedule_patch(&req).unwrap();
        let mut tickets = [ticket];
        tokio_test::block_on(manager.apply_patches(&mut tickets)).unwrap();

        let ticket = &tickets[0];
        assert_eq!(ticket.state, PatchState::Success);
        assert!(ticket.state.is_terminal());
        assert!(ticket.notes.contains(&req.checksum()));
        assert!(ticket.notes.contains("Patch applied successfully."));

        let row = store.get_patch_status(ticket.id).unwrap();
        assert_eq!(row.state, PatchState::Success);
        assert!(row.notes.contains("Patch applied successfully."));
    }

    #[test]
    fn apply_reaches_failed_when_failure_rate_is_one() {
        let (_dir, store) = test_store();
        let mut manager = PatchManager::new(fast_config(1.0), store.clone());

        let ticket = manager.schedule_patch(&request(b"firmware image")).unwrap();
        let mut tickets = [ticket];
        tokio_test::block_on(manager.apply_patches(&mut tickets)).unwrap();

        assert_eq!(tickets[0].state, PatchState::Failed);
        assert!(tickets[0].notes.contains("Automated validation failed."));

        let row = store.get_patch_status(tickets[0].id).unwrap();
        assert_eq!(row.state, PatchState::Failed);
    }

    #[test]
    fn tickets_are_applied_independently() {
        let (_dir, store) = test_store();
        let mut manager = PatchManager::with_seed(fast_config(0.0), store.clone(), 7);

        let first = manager.schedule_patch(&request(b"a")).unwrap();
        let mut second_req = request(b"b");
        second_req.version = "2.2.0".to_string();
        let second = manager.schedule_patch(&second_req).unwrap();

        let mut tickets = [first, second];
        tokio_test::block_on(manager.apply_patches(&mut tickets)).unwrap();

        for ticket in &tickets {
            assert!(ticket.state.is_terminal());
            let row = store.get_patch_status(ticket.id).unwrap();
            assert_eq!(row.state, ticket.state);
        }
    }
}

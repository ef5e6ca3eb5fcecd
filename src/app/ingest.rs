use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::Mutex;

use crate::app::dispatcher::{DispatchOutcome, DispatcherService};
use crate::app::evaluator;
use crate::app::rules::RuleService;
use crate::domain::observation::{ObservationKey, PriceObservation};
use crate::infra::db::Db;
use crate::infra::queue::QueueClient;

/// Per-key previous-observation state. Edge triggering depends on this not
/// racing: the key's mutex is held across evaluate → dispatch → record, so
/// observations for one key process to completion in order while other keys
/// proceed in parallel.
pub struct ObservationLedger {
    keys: Mutex<HashMap<ObservationKey, Arc<Mutex<KeyState>>>>,
}

#[derive(Default)]
pub struct KeyState {
    pub last: Option<PriceObservation>,
}

impl ObservationLedger {
    pub fn new() -> Self {
        Self {
            keys: Mutex::new(HashMap::new()),
        }
    }

    async fn entry(&self, key: &ObservationKey) -> Arc<Mutex<KeyState>> {
        let mut keys = self.keys.lock().await;
        keys.entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(KeyState::default())))
            .clone()
    }
}

impl Default for ObservationLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Accepted { matched: usize, dispatched: usize },
    /// Timestamp went backwards for the key; observations must be
    /// monotonically non-decreasing per (material_type, region).
    OutOfOrder,
}

#[derive(Clone)]
pub struct IngestService {
    db: Db,
    queue: QueueClient,
    ledger: Arc<ObservationLedger>,
}

impl IngestService {
    pub fn new(db: Db, queue: QueueClient, ledger: Arc<ObservationLedger>) -> Self {
        Self { db, queue, ledger }
    }

    pub async fn ingest(&self, observation: PriceObservation) -> Result<IngestOutcome> {
        let key = ObservationKey::of(&observation);
        let entry = self.ledger.entry(&key).await;
        let mut state = entry.lock().await;

        if let Some(last) = &state.last {
            if observation.observed_at < last.observed_at {
                tracing::warn!(
                    material_type = %key.material_type,
                    region = %key.region,
                    "rejecting out-of-order observation"
                );
                return Ok(IngestOutcome::OutOfOrder);
            }
        }

        let rules = RuleService::new(self.db.clone())
            .list_active_for_scope(&key.material_type, &key.region)
            .await?;

        let now = OffsetDateTime::now_utc();
        let triggered = evaluator::evaluate(&observation, &rules, state.last.as_ref(), now);

        let dispatcher = DispatcherService::new(self.db.clone(), self.queue.clone());
        let mut dispatched = 0;
        for trigger in &triggered {
            // Each observation/rule pair is independent; a failing dispatch
            // never aborts the rest of the batch.
            match dispatcher.dispatch(trigger, now).await {
                Ok(DispatchOutcome::Skipped) => {}
                Ok(_) => dispatched += 1,
                Err(err) => {
                    tracing::error!(
                        error = ?err,
                        rule_id = %trigger.rule.id,
                        "dispatch failed for triggered rule"
                    );
                }
            }
        }

        state.last = Some(observation);

        Ok(IngestOutcome::Accepted {
            matched: triggered.len(),
            dispatched,
        })
    }
}

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// A timestamped price reading pushed by the external feed. Timestamps are
/// monotonically non-decreasing per (material_type, region) key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceObservation {
    pub material_type: String,
    pub region: String,
    pub price: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub observed_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObservationKey {
    pub material_type: String,
    pub region: String,
}

impl ObservationKey {
    pub fn of(observation: &PriceObservation) -> Self {
        Self {
            material_type: observation.material_type.clone(),
            region: observation.region.clone(),
        }
    }
}

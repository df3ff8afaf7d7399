use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::ids::{CheckpointId, StepId};

/// A completion gate within a step.
///
/// `test` names the code module that must pass before the gate opens; a
/// checkpoint without one is completed manually.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Checkpoint {
    pub id: CheckpointId,
    pub step_id: StepId,
    pub is_completed: bool,
    pub test: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Sort key for creation order; equal timestamps fall back to id.
    #[must_use]
    pub fn creation_key(&self) -> (DateTime<Utc>, CheckpointId) {
        (self.created_at, self.id)
    }
}

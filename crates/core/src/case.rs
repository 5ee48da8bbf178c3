//! Case row fields the job layer reads and writes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::Entity;
use crate::id::CaseId;

/// The slice of a forensic case owned by the recalculation job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseRecord {
    pub id: CaseId,
    /// Set by the app when case inputs change; cleared once PMI is recomputed.
    pub recalculation_needed: bool,
    pub updated_at: DateTime<Utc>,
}

impl CaseRecord {
    pub fn new(id: CaseId, recalculation_needed: bool, now: DateTime<Utc>) -> Self {
        Self {
            id,
            recalculation_needed,
            updated_at: now,
        }
    }

    /// Clear the recalculation flag. Returns whether anything changed.
    pub fn mark_recalculated(&mut self, now: DateTime<Utc>) -> bool {
        if !self.recalculation_needed {
            return false;
        }
        self.recalculation_needed = false;
        self.updated_at = now;
        true
    }
}

impl Entity for CaseRecord {
    type Id = CaseId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

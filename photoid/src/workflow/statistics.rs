//! Run statistics
//!
//! Aggregate counts derived from the final item list.

use crate::types::{IdentifiedItem, StageOutcome, StageTimings, Verdict};
use serde::{Deserialize, Serialize};

/// Run-level counts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStatistics {
    /// Regions processed
    pub total_detected: usize,
    /// Items whose identification succeeded
    pub total_identified: usize,
    pub total_verified: usize,
    pub total_mismatch: usize,
    pub total_uncertain: usize,
    /// Identified but without a conclusive verdict (uncertain or unvalidated)
    pub total_partial: usize,
    /// Items whose identification did not succeed
    pub total_failed: usize,
    pub stage_timings: StageTimings,
}

impl RunStatistics {
    /// Derive statistics from completed items
    pub fn from_items(items: &[IdentifiedItem], stage_timings: StageTimings) -> Self {
        let mut stats = Self {
            total_detected: items.len(),
            stage_timings,
            ..Default::default()
        };

        for item in items {
            if !item.stage_outcome.is_identified() {
                stats.total_failed += 1;
                continue;
            }
            stats.total_identified += 1;

            match item.verdict() {
                Some(Verdict::Verified) => stats.total_verified += 1,
                Some(Verdict::Mismatch) => stats.total_mismatch += 1,
                Some(Verdict::Uncertain) => {
                    stats.total_uncertain += 1;
                    stats.total_partial += 1;
                }
                None => stats.total_partial += 1,
            }
        }

        stats
    }

    /// Get display string for logging
    pub fn display_string(&self) -> String {
        format!(
            "{} regions: {} identified ({} verified, {} mismatch, {} uncertain), {} partial, {} failed",
            self.total_detected,
            self.total_identified,
            self.total_verified,
            self.total_mismatch,
            self.total_uncertain,
            self.total_partial,
            self.total_failed
        )
    }
}

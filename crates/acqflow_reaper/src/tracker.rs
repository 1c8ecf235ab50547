//! Stability tracking across polls.
//!
//! A file is stable once its size is unchanged between two consecutive
//! polls. The tracker only remembers the previous poll's snapshot; files
//! that disappear are dropped with it.

use crate::candidate::ReapCandidate;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::PathBuf;

/// What one poll should do with a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// First sighting; no action this poll.
    Discovered,
    /// Size changed since the previous poll.
    Monitoring,
    /// Size unchanged and not yet captured; capture now.
    Stable,
    /// Size unchanged and already captured.
    AlreadyCaptured,
}

#[derive(Debug, Clone, Copy)]
struct Tracked {
    size: u64,
    needs_capture: bool,
}

pub struct StabilityTracker {
    tracked: HashMap<PathBuf, Tracked>,
    /// Checkpoint loaded at start-up: the last capture of the previous run.
    startup_checkpoint: Option<DateTime<Utc>>,
}

impl StabilityTracker {
    pub fn new(startup_checkpoint: DateTime<Utc>) -> Self {
        Self {
            tracked: HashMap::new(),
            startup_checkpoint: (startup_checkpoint > DateTime::<Utc>::UNIX_EPOCH)
                .then_some(startup_checkpoint),
        }
    }

    /// Classify `candidate` against the previous snapshot and set its
    /// `needs_capture` flag accordingly.
    pub fn classify(&self, candidate: &mut ReapCandidate) -> Classification {
        let Some(prev) = self.tracked.get(&candidate.path) else {
            if self.startup_checkpoint == Some(candidate.mtime) {
                candidate.needs_capture = false;
                return Classification::AlreadyCaptured;
            }
            return Classification::Discovered;
        };

        match (candidate.size == prev.size, prev.needs_capture) {
            (true, true) => Classification::Stable,
            (true, false) => {
                candidate.needs_capture = false;
                Classification::AlreadyCaptured
            }
            // Grew after capture: capture again once it settles
            (false, _) => {
                candidate.needs_capture = true;
                Classification::Monitoring
            }
        }
    }

    /// Replace the snapshot with this poll's candidates.
    pub fn replace(&mut self, candidates: &[ReapCandidate]) {
        self.tracked = candidates
            .iter()
            .map(|c| {
                (
                    c.path.clone(),
                    Tracked {
                        size: c.size,
                        needs_capture: c.needs_capture,
                    },
                )
            })
            .collect();
    }
}

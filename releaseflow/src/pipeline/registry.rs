//! Run numbering and active-run tracking.
//!
//! Every push is its own trigger event and gets its own run. Pushes to the
//! same branch share one monotonic counter and may overlap; the only thing
//! refused is executing a run number that is already executing.

use crate::context::TriggerEvent;
use crate::errors::ReleaseflowError;
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Default)]
struct BranchRuns {
    last_issued: u64,
    active: BTreeSet<u64>,
}

/// Issues run numbers per branch and tracks which runs are executing.
///
/// Numbers are monotonic per branch and start at the configured first
/// number. Runs on different branches never interact.
#[derive(Debug, Clone)]
pub struct RunRegistry {
    branches: Arc<DashMap<String, BranchRuns>>,
    first_run_number: u64,
}

impl Default for RunRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RunRegistry {
    /// Creates a registry whose branches start counting at 1.
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Creates a registry whose branches start counting at `first`.
    ///
    /// Used when the numbering continues from an external counter.
    #[must_use]
    pub fn starting_at(first: u64) -> Self {
        Self {
            branches: Arc::new(DashMap::new()),
            first_run_number: first.max(1),
        }
    }

    /// Claims a run slot for a trigger event.
    ///
    /// With `rerun = None` a fresh run number is issued; this never fails,
    /// even while earlier runs of the branch are still executing. With
    /// `Some(n)` the already issued run `n` is executed again.
    ///
    /// # Errors
    ///
    /// Returns [`ReleaseflowError::UnknownRun`] if `n` was never issued and
    /// [`ReleaseflowError::RunAlreadyActive`] if run `n` is still executing.
    pub fn begin(&self, trigger: &TriggerEvent, rerun: Option<u64>) -> Result<RunTicket, ReleaseflowError> {
        let key = trigger.key().to_string();
        let first = self.first_run_number;
        let mut entry = self.branches.entry(key.clone()).or_insert_with(|| BranchRuns {
            last_issued: first - 1,
            active: BTreeSet::new(),
        });

        let run_number = match rerun {
            Some(n) if n < first || n > entry.last_issued => {
                return Err(ReleaseflowError::UnknownRun {
                    trigger: key,
                    run_number: n,
                });
            }
            Some(n) if entry.active.contains(&n) => {
                return Err(ReleaseflowError::RunAlreadyActive {
                    trigger: key,
                    run_number: n,
                });
            }
            Some(n) => n,
            None => {
                entry.last_issued += 1;
                entry.last_issued
            }
        };
        entry.active.insert(run_number);
        let concurrent = entry.active.len();
        drop(entry);

        debug!(trigger = %key, run_number, rerun = rerun.is_some(), concurrent, "Run slot claimed");
        Ok(RunTicket {
            branches: self.branches.clone(),
            key,
            run_number,
            rerun: rerun.is_some(),
        })
    }

    /// Returns the last run number issued for a branch.
    #[must_use]
    pub fn last_issued(&self, key: &str) -> Option<u64> {
        self.branches
            .get(key)
            .map(|runs| runs.last_issued)
            .filter(|&n| n >= self.first_run_number)
    }

    /// Returns the runs of a branch that are executing, lowest first.
    #[must_use]
    pub fn active_runs(&self, key: &str) -> Vec<u64> {
        self.branches
            .get(key)
            .map(|runs| runs.active.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Returns true if run `run_number` of a branch is executing.
    #[must_use]
    pub fn is_active(&self, key: &str, run_number: u64) -> bool {
        self.branches
            .get(key)
            .is_some_and(|runs| runs.active.contains(&run_number))
    }
}

/// Holds a run's slot; dropping it releases the slot.
#[derive(Debug)]
pub struct RunTicket {
    branches: Arc<DashMap<String, BranchRuns>>,
    key: String,
    run_number: u64,
    rerun: bool,
}

impl RunTicket {
    /// Returns the run number.
    #[must_use]
    pub fn run_number(&self) -> u64 {
        self.run_number
    }

    /// Returns the branch key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns true if this ticket re-runs an earlier number.
    #[must_use]
    pub fn is_rerun(&self) -> bool {
        self.rerun
    }
}

impl Drop for RunTicket {
    fn drop(&mut self) {
        if let Some(mut runs) = self.branches.get_mut(&self.key) {
            runs.active.remove(&self.run_number);
        }
    }
}

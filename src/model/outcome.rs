use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Items dropped because they could not be mapped
    pub skipped: usize,
}

/// Result of syncing one integration in one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Succeeded(SyncStats),
    Failed(String),
    Skipped(String),
}

impl SyncOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SyncOutcome::Succeeded(_))
    }
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncOutcome::Succeeded(stats) => write!(
                f,
                "succeeded ({} created, {} updated, {} unchanged, {} skipped)",
                stats.created, stats.updated, stats.unchanged, stats.skipped
            ),
            SyncOutcome::Failed(reason) => write!(f, "failed: {reason}"),
            SyncOutcome::Skipped(reason) => write!(f, "skipped: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutcomeSummary {
    pub integration_id: u64,
    pub provider: String,
    pub outcome: SyncOutcome,
}

/// Per-integration outcomes of one cycle, keyed by integration id.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub outcomes: BTreeMap<u64, OutcomeSummary>,
}

impl CycleReport {
    pub fn insert(&mut self, integration_id: u64, provider: &str, outcome: SyncOutcome) {
        self.outcomes.insert(
            integration_id,
            OutcomeSummary {
                integration_id,
                provider: provider.to_string(),
                outcome,
            },
        );
    }

    #[cfg(test)]
    pub fn get(&self, integration_id: u64) -> Option<&SyncOutcome> {
        self.outcomes.get(&integration_id).map(|s| &s.outcome)
    }

    pub fn succeeded(&self) -> usize {
        self.count(|o| matches!(o, SyncOutcome::Succeeded(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, SyncOutcome::Failed(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, SyncOutcome::Skipped(_)))
    }

    fn count(&self, pred: impl Fn(&SyncOutcome) -> bool) -> usize {
        self.outcomes.values().filter(|s| pred(&s.outcome)).count()
    }
}

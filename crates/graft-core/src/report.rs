//! Integration report
//!
//! Lists every value generated by a run and what happened at each step.
//! Values that already existed are never included.

use indexmap::IndexMap;
use serde::Serialize;

use crate::phase::Phase;

/// What a step found or did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The key, member, block or route was added
    Created,
    /// It was already there; nothing changed
    AlreadyPresent,
    /// Not there (status probes only)
    Missing,
}

/// One checked item
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRecord {
    /// Phase the step belongs to
    pub phase: Phase,
    /// Item description, e.g. `services/vault-n8n`
    pub target: String,
    /// Result
    pub outcome: Outcome,
}

/// Result of an integration run or status probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntegrationReport {
    /// Service name
    pub service: String,
    /// Effective host name
    pub hostname: String,
    /// Newly generated values by env key, in generation order
    pub generated: IndexMap<String, String>,
    /// Per-step outcomes in execution order
    pub steps: Vec<StepRecord>,
    /// Whether changes were written to disk
    pub committed: bool,
}

impl IntegrationReport {
    /// Empty report for `service`
    #[must_use]
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            hostname: String::new(),
            generated: IndexMap::new(),
            steps: Vec::new(),
            committed: false,
        }
    }

    /// Record a step outcome
    pub fn record(&mut self, phase: Phase, target: impl Into<String>, outcome: Outcome) {
        self.steps.push(StepRecord {
            phase,
            target: target.into(),
            outcome,
        });
    }

    /// Record a newly generated value
    pub fn add_generated(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.generated.insert(key.into(), value.into());
    }

    /// Number of steps that changed something
    #[must_use]
    pub fn created_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.outcome == Outcome::Created)
            .count()
    }

    /// Number of steps a status probe found missing
    #[must_use]
    pub fn missing_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.outcome == Outcome::Missing)
            .count()
    }

    /// True when the run found everything already in place
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.generated.is_empty()
            && self.steps.iter().all(|s| s.outcome == Outcome::AlreadyPresent)
    }
}

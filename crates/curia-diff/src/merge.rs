//! Merge strategies: turn configuration sets into curation decisions.
//!
//! A strategy is a pure function of (configuration sets, target owner) to
//! one [`MergeDecision`] per set. Strategies are total: whatever they cannot
//! decide is reported as contested (`chosen == None`), never as an error.
//!
//! The target owner never votes. Its configuration, if present, is removed
//! before a decision is taken so that re-deciding after a merge yields the
//! same result as the initial decision.

use serde::{Deserialize, Serialize};
use tracing::debug;

use curia_core::defaults::{MERGE_MIN_CONFIDENCE, MERGE_MIN_VOTES};
use curia_core::{Error, LayerId, Position, Result};

use crate::differ::{Configuration, ConfigurationSet};

/// Decision for one position.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeDecision {
    pub layer: LayerId,
    pub position: Position,
    /// `None` means the position remains contested.
    pub chosen: Option<Configuration>,
    pub rationale: String,
}

impl MergeDecision {
    fn chosen(set: &ConfigurationSet, configuration: &Configuration, rationale: String) -> Self {
        Self {
            layer: set.layer.clone(),
            position: set.position.clone(),
            chosen: Some(configuration.clone()),
            rationale,
        }
    }

    fn contested(set: &ConfigurationSet, rationale: impl Into<String>) -> Self {
        Self {
            layer: set.layer.clone(),
            position: set.position.clone(),
            chosen: None,
            rationale: rationale.into(),
        }
    }

    pub fn is_contested(&self) -> bool {
        self.chosen.is_none()
    }
}

/// Per-project merge policy.
///
/// Deserializes from e.g. `{"kind":"threshold","min_votes":2}` or
/// `{"kind":"passthrough","owner":"alice"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Choose the largest configuration if it has at least `min_votes`
    /// owners and at least `min_confidence` of all voting owners. A tie for
    /// the largest size is contested.
    Threshold {
        #[serde(default = "default_min_votes")]
        min_votes: usize,
        #[serde(default = "default_min_confidence")]
        min_confidence: f64,
    },
    /// Choose only if every voting owner agrees and at least `min_votes`
    /// owners voted.
    Unanimous {
        #[serde(default = "default_unanimous_votes")]
        min_votes: usize,
    },
    /// Always take the configuration of one preferred owner.
    Passthrough { owner: String },
    /// Never decide; a human curator resolves every position.
    Manual,
}

fn default_min_votes() -> usize {
    MERGE_MIN_VOTES
}

fn default_min_confidence() -> f64 {
    MERGE_MIN_CONFIDENCE
}

fn default_unanimous_votes() -> usize {
    1
}

impl Default for MergeStrategy {
    fn default() -> Self {
        Self::threshold(MERGE_MIN_VOTES)
    }
}

impl MergeStrategy {
    pub fn threshold(min_votes: usize) -> Self {
        MergeStrategy::Threshold {
            min_votes,
            min_confidence: MERGE_MIN_CONFIDENCE,
        }
    }

    pub fn passthrough(owner: impl Into<String>) -> Self {
        MergeStrategy::Passthrough {
            owner: owner.into(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            MergeStrategy::Threshold { .. } => "threshold",
            MergeStrategy::Unanimous { .. } => "unanimous",
            MergeStrategy::Passthrough { .. } => "passthrough",
            MergeStrategy::Manual => "manual",
        }
    }

    /// Reject parameter combinations that can never produce a decision.
    pub fn validate(&self) -> Result<()> {
        match self {
            MergeStrategy::Threshold {
                min_votes,
                min_confidence,
            } => {
                if *min_votes == 0 {
                    return Err(Error::InvalidConfig(
                        "threshold strategy requires min_votes >= 1".into(),
                    ));
                }
                if !(0.0..=1.0).contains(min_confidence) {
                    return Err(Error::InvalidConfig(format!(
                        "threshold min_confidence must be within [0, 1], got {min_confidence}"
                    )));
                }
            }
            MergeStrategy::Unanimous { min_votes } if *min_votes == 0 => {
                return Err(Error::InvalidConfig(
                    "unanimous strategy requires min_votes >= 1".into(),
                ));
            }
            MergeStrategy::Passthrough { owner } if owner.trim().is_empty() => {
                return Err(Error::InvalidConfig(
                    "passthrough strategy requires a preferred owner".into(),
                ));
            }
            _ => {}
        }
        Ok(())
    }

    /// One decision per input set, in input order.
    pub fn decide(&self, sets: &[ConfigurationSet], target_owner: &str) -> Vec<MergeDecision> {
        let decisions: Vec<MergeDecision> = sets
            .iter()
            .map(|set| self.decide_position(set, target_owner))
            .collect();
        debug!(
            subsystem = "merge",
            strategy = self.name(),
            position_count = decisions.len(),
            contested_count = decisions.iter().filter(|d| d.is_contested()).count(),
            "Merge decisions taken"
        );
        decisions
    }

    /// Decision for a single position.
    pub fn decide_position(&self, set: &ConfigurationSet, target_owner: &str) -> MergeDecision {
        let votes = set.without_owner(target_owner);
        let Some(top) = votes.largest() else {
            return MergeDecision::contested(set, "no votes besides the target owner");
        };

        match self {
            MergeStrategy::Threshold {
                min_votes,
                min_confidence,
            } => {
                if votes
                    .configurations
                    .get(1)
                    .is_some_and(|runner_up| runner_up.size() == top.size())
                {
                    return MergeDecision::contested(
                        set,
                        format!("tie between configurations of {} votes", top.size()),
                    );
                }
                if top.size() < *min_votes {
                    return MergeDecision::contested(
                        set,
                        format!("best configuration has {} of {min_votes} required votes", top.size()),
                    );
                }
                let total = votes.owners().len();
                let confidence = top.size() as f64 / total as f64;
                if confidence < *min_confidence {
                    return MergeDecision::contested(
                        set,
                        format!("agreement {confidence:.2} below {min_confidence:.2}"),
                    );
                }
                MergeDecision::chosen(set, top, format!("{} of {total} owners agree", top.size()))
            }
            MergeStrategy::Unanimous { min_votes } => {
                if !votes.is_agreed() {
                    return MergeDecision::contested(
                        set,
                        format!("{} competing configurations", votes.configurations.len()),
                    );
                }
                if top.size() < *min_votes {
                    return MergeDecision::contested(
                        set,
                        format!("{} of {min_votes} required owners contributed", top.size()),
                    );
                }
                MergeDecision::chosen(set, top, format!("all {} owners agree", top.size()))
            }
            MergeStrategy::Passthrough { owner } => match votes.configuration_of(owner) {
                Some(configuration) => {
                    MergeDecision::chosen(set, configuration, format!("preferred owner {owner}"))
                }
                None => MergeDecision::contested(
                    set,
                    format!("preferred owner {owner} has no annotation here"),
                ),
            },
            MergeStrategy::Manual => MergeDecision::contested(set, "manual curation"),
        }
    }
}

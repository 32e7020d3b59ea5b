//! Conflict strategies and the per-entity policy table.

use std::collections::HashMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::entity::EntityType;
use crate::error::DomainError;

/// How a detected conflict on an update is resolved before replay.
///
/// The set is closed: policy is decided per entity type at build time, never
/// by strings flowing in from data.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictStrategy {
    /// Discard the queued change; the fresher server copy stands.
    ServerWins,
    /// Replay the queued change regardless of the server copy.
    ClientWins,
    /// Replay only while the server copy is still a draft.
    ClientWinsDraft,
    /// Field-level merge of the queued change onto the server copy.
    Merge,
}

impl ConflictStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ServerWins => "server-wins",
            Self::ClientWins => "client-wins",
            Self::ClientWinsDraft => "client-wins-draft",
            Self::Merge => "merge",
        }
    }
}

impl core::fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictStrategy {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "server-wins" => Ok(Self::ServerWins),
            "client-wins" => Ok(Self::ClientWins),
            "client-wins-draft" => Ok(Self::ClientWinsDraft),
            "merge" => Ok(Self::Merge),
            other => Err(DomainError::parse(format!(
                "unknown conflict strategy: {other}"
            ))),
        }
    }
}

/// Per-entity conflict strategy table with a conservative default.
///
/// The strategy is stamped onto each mutation at enqueue time, so records
/// already in the queue keep the policy they were captured under even if the
/// table changes between releases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictPolicy {
    rules: HashMap<EntityType, ConflictStrategy>,
    default: ConflictStrategy,
}

impl ConflictPolicy {
    pub fn new(default: ConflictStrategy) -> Self {
        Self {
            rules: HashMap::new(),
            default,
        }
    }

    pub fn with_rule(mut self, entity: impl Into<EntityType>, strategy: ConflictStrategy) -> Self {
        self.rules.insert(entity.into(), strategy);
        self
    }

    pub fn strategy_for(&self, entity: &EntityType) -> ConflictStrategy {
        self.rules.get(entity).copied().unwrap_or(self.default)
    }

    pub fn default_strategy(&self) -> ConflictStrategy {
        self.default
    }
}

impl Default for ConflictPolicy {
    /// The shipped table for the SiteSafe entities.
    ///
    /// Incident reports and corrective actions are edited collaboratively,
    /// so offline edits merge field-by-field. Inspections and permits only
    /// accept offline edits while still drafts. Training records and OSHA
    /// logs are authored server-side. Comments are append-only from the
    /// author's point of view and always replay.
    fn default() -> Self {
        Self::new(ConflictStrategy::ServerWins)
            .with_rule("incidents", ConflictStrategy::Merge)
            .with_rule("actions", ConflictStrategy::Merge)
            .with_rule("inspections", ConflictStrategy::ClientWinsDraft)
            .with_rule("permits", ConflictStrategy::ClientWinsDraft)
            .with_rule("trainings", ConflictStrategy::ServerWins)
            .with_rule("osha-logs", ConflictStrategy::ServerWins)
            .with_rule("comments", ConflictStrategy::ClientWins)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_strings_round_trip() {
        for s in [
            ConflictStrategy::ServerWins,
            ConflictStrategy::ClientWins,
            ConflictStrategy::ClientWinsDraft,
            ConflictStrategy::Merge,
        ] {
            assert_eq!(s.as_str().parse::<ConflictStrategy>().unwrap(), s);
        }
    }

    #[test]
    fn unknown_strategy_string_is_rejected() {
        assert!("newest-wins".parse::<ConflictStrategy>().is_err());
    }

    #[test]
    fn unlisted_entity_falls_back_to_default() {
        let policy = ConflictPolicy::default();
        assert_eq!(
            policy.strategy_for(&EntityType::new("widgets")),
            ConflictStrategy::ServerWins
        );
        assert_eq!(
            policy.strategy_for(&EntityType::unknown()),
            ConflictStrategy::ServerWins
        );
    }

    #[test]
    fn shipped_table_marks_incident_edits_for_merge() {
        let policy = ConflictPolicy::default();
        assert_eq!(
            policy.strategy_for(&EntityType::new("incidents")),
            ConflictStrategy::Merge
        );
        assert_eq!(
            policy.strategy_for(&EntityType::new("inspections")),
            ConflictStrategy::ClientWinsDraft
        );
    }

    #[test]
    fn overrides_replace_shipped_rules() {
        let policy = ConflictPolicy::default().with_rule("incidents", ConflictStrategy::ClientWins);
        assert_eq!(
            policy.strategy_for(&EntityType::new("incidents")),
            ConflictStrategy::ClientWins
        );
    }
}

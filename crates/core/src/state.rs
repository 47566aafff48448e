//! File residency states, operations, and request lifecycle states.

use crate::error::Error;
use serde::{Deserialize, Serialize};

/// Data residency of a managed file.
///
/// The only allowed transitions are
/// `Resident -> Premigrated -> Migrated -> (recall) Premigrated | Resident`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileState {
    /// Full data on primary storage, no tape copy.
    Resident,
    /// Full data on primary storage and a tape copy exists.
    Premigrated,
    /// Data removed from primary storage; only the tape copy exists.
    Migrated,
}

impl FileState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileState::Resident => "resident",
            FileState::Premigrated => "premigrated",
            FileState::Migrated => "migrated",
        }
    }

    pub fn parse(s: &str) -> Result<Self, Error> {
        match s {
            "resident" => Ok(FileState::Resident),
            "premigrated" => Ok(FileState::Premigrated),
            "migrated" => Ok(FileState::Migrated),
            other => Err(Error::Protocol(format!("unknown file state: {other}"))),
        }
    }

    /// Whether moving from `self` to `to` follows an allowed edge.
    ///
    /// Migration direction: `Resident -> Premigrated -> Migrated`. Recall
    /// direction: `Migrated -> Premigrated`, and `Premigrated -> Resident`
    /// once the tape attribute is dropped. Staying in place is allowed
    /// (engines treat it as a no-op). The one forbidden shortcut is
    /// `Resident -> Migrated` without a tape copy.
    pub fn can_transition_to(&self, to: FileState) -> bool {
        use FileState::*;
        !matches!((*self, to), (Resident, Migrated))
    }
}

impl std::fmt::Display for FileState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of work a job or request performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Migrate,
    Premigrate,
    SelectiveRecall,
    TransparentRecall,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Migrate => "migrate",
            Operation::Premigrate => "premigrate",
            Operation::SelectiveRecall => "selective_recall",
            Operation::TransparentRecall => "transparent_recall",
        }
    }

    pub fn parse(s: &str) -> Result<Self, Error> {
        match s {
            "migrate" => Ok(Operation::Migrate),
            "premigrate" => Ok(Operation::Premigrate),
            "selective_recall" => Ok(Operation::SelectiveRecall),
            "transparent_recall" => Ok(Operation::TransparentRecall),
            other => Err(Error::Protocol(format!("unknown operation: {other}"))),
        }
    }

    /// Scheduling rank within equal submission times. Lower runs first; recalls
    /// beat migrations to keep user-visible latencies low.
    pub fn priority(&self) -> u8 {
        match self {
            Operation::SelectiveRecall => 0,
            Operation::TransparentRecall => 1,
            Operation::Premigrate => 2,
            Operation::Migrate => 3,
        }
    }

    pub fn is_recall(&self) -> bool {
        matches!(
            self,
            Operation::SelectiveRecall | Operation::TransparentRecall
        )
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a (request, tape) scheduling unit.
///
/// Transitions are monotone: `New -> InProgress -> Completed | Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    New,
    InProgress,
    Completed,
    Failed,
}

impl RequestState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestState::New => "new",
            RequestState::InProgress => "in_progress",
            RequestState::Completed => "completed",
            RequestState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self, Error> {
        match s {
            "new" => Ok(RequestState::New),
            "in_progress" => Ok(RequestState::InProgress),
            "completed" => Ok(RequestState::Completed),
            "failed" => Ok(RequestState::Failed),
            other => Err(Error::Protocol(format!("unknown request state: {other}"))),
        }
    }

    /// Completed and Failed are terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestState::Completed | RequestState::Failed)
    }
}

impl std::fmt::Display for RequestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn residency_edges_match_the_state_machine() {
        use FileState::*;
        assert!(Resident.can_transition_to(Premigrated));
        assert!(Premigrated.can_transition_to(Migrated));
        assert!(Migrated.can_transition_to(Premigrated));
        assert!(Migrated.can_transition_to(Resident));
        assert!(Premigrated.can_transition_to(Resident));

        assert!(!Resident.can_transition_to(Migrated));
    }

    #[test]
    fn recalls_outrank_migrations() {
        assert!(Operation::SelectiveRecall.priority() < Operation::TransparentRecall.priority());
        assert!(Operation::TransparentRecall.priority() < Operation::Premigrate.priority());
        assert!(Operation::Premigrate.priority() < Operation::Migrate.priority());
    }

    #[test]
    fn states_roundtrip_as_text() {
        for s in [
            FileState::Resident,
            FileState::Premigrated,
            FileState::Migrated,
        ] {
            assert_eq!(FileState::parse(s.as_str()).unwrap(), s);
        }
        for s in [
            RequestState::New,
            RequestState::InProgress,
            RequestState::Completed,
            RequestState::Failed,
        ] {
            assert_eq!(RequestState::parse(s.as_str()).unwrap(), s);
        }
        assert!(FileState::parse("frozen").is_err());
    }
}

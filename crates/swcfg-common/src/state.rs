//! Interpreter execution states.

use std::fmt;

/// Execution state handed to every command and update callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum InterpState {
    /// Validation only, against a throwaway copy of the configuration.
    DryRun,
    /// Single statement applied immediately.
    #[default]
    AutoCommit,
    /// Inside `atomic begin`; intent is recorded, nothing is applied.
    Atomic,
    /// First commit pass: side effects are applied.
    Committing,
    /// Second commit pass: staged attributes become current.
    Committed,
    /// Commit failed, rollback is about to run.
    CommitFailure,
    /// First rollback pass: previous attributes are re-applied.
    Rollbacking,
    /// Second rollback pass: finalization and deferred deletes.
    Rolledback,
    /// First abort pass: intent flags are cleared.
    Aborting,
    /// Second abort pass: staged attributes are dropped.
    Aborted,
}

impl InterpState {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterpState::DryRun => "dryrun",
            InterpState::AutoCommit => "auto_commit",
            InterpState::Atomic => "atomic",
            InterpState::Committing => "committing",
            InterpState::Committed => "committed",
            InterpState::CommitFailure => "commit_failure",
            InterpState::Rollbacking => "rollbacking",
            InterpState::Rolledback => "rolledback",
            InterpState::Aborting => "aborting",
            InterpState::Aborted => "aborted",
        }
    }

    /// Returns true for the first pass of a commit or rollback, where side
    /// effects run but `current` must stay untouched.
    pub fn is_applying(&self) -> bool {
        matches!(self, InterpState::Committing | InterpState::Rollbacking)
    }

    /// Returns true for the finalizing passes of a transaction.
    pub fn is_finalizing(&self) -> bool {
        matches!(self, InterpState::Committed | InterpState::Rolledback)
    }

    /// Returns true while an atomic transaction block is open.
    pub fn in_transaction(&self) -> bool {
        !matches!(self, InterpState::DryRun | InterpState::AutoCommit)
    }
}

impl fmt::Display for InterpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_classification() {
        assert!(InterpState::Committing.is_applying());
        assert!(InterpState::Rollbacking.is_applying());
        assert!(!InterpState::Committed.is_applying());

        assert!(InterpState::Rolledback.is_finalizing());
        assert!(!InterpState::Atomic.is_finalizing());

        assert!(InterpState::Atomic.in_transaction());
        assert!(!InterpState::AutoCommit.in_transaction());
        assert!(!InterpState::DryRun.in_transaction());
    }

    #[test]
    fn test_default_is_auto_commit() {
        assert_eq!(InterpState::default(), InterpState::AutoCommit);
    }
}

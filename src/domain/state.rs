//! Lifecycle states for scheduled result checks.

use crate::error::{Result, StewardError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// States a watched race moves through while its result is chased.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CheckState {
    /// Waiting for the check time to arrive
    Scheduled,
    /// A fetch attempt is in flight
    Checking,
    /// Results found and every outstanding outcome recorded
    Resolved,
    /// Last attempt failed, waiting out the retry interval
    Retrying,
    /// Retry budget exhausted, no further checks
    Abandoned,
}

impl CheckState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckState::Scheduled => "SCHEDULED",
            CheckState::Checking => "CHECKING",
            CheckState::Resolved => "RESOLVED",
            CheckState::Retrying => "RETRYING",
            CheckState::Abandoned => "ABANDONED",
        }
    }

    /// Check if this state can transition to another state
    pub fn can_transition_to(&self, target: CheckState) -> bool {
        use CheckState::*;

        match (self, target) {
            // From Scheduled
            (Scheduled, Checking) => true, // Check time reached

            // From Checking
            (Checking, Resolved) => true,  // Results found, outcomes saved
            (Checking, Retrying) => true,  // No result yet or fetch failed
            (Checking, Abandoned) => true, // Retry budget exhausted

            // From Retrying
            (Retrying, Checking) => true, // Retry interval elapsed

            // Resolved and Abandoned are terminal
            _ => false,
        }
    }

    pub fn valid_transitions(&self) -> Vec<CheckState> {
        match self {
            CheckState::Scheduled => vec![CheckState::Checking],
            CheckState::Checking => vec![
                CheckState::Resolved,
                CheckState::Retrying,
                CheckState::Abandoned,
            ],
            CheckState::Retrying => vec![CheckState::Checking],
            CheckState::Resolved | CheckState::Abandoned => vec![],
        }
    }

    /// Terminal states are never left and their races drop out of the
    /// watch set.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CheckState::Resolved | CheckState::Abandoned)
    }
}

impl fmt::Display for CheckState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for CheckState {
    type Error = StewardError;

    fn try_from(value: &str) -> Result<Self> {
        match value.to_uppercase().as_str() {
            "SCHEDULED" => Ok(CheckState::Scheduled),
            "CHECKING" => Ok(CheckState::Checking),
            "RESOLVED" => Ok(CheckState::Resolved),
            "RETRYING" => Ok(CheckState::Retrying),
            "ABANDONED" => Ok(CheckState::Abandoned),
            other => Err(StewardError::Validation(format!(
                "unknown check state: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        assert!(CheckState::Scheduled.can_transition_to(CheckState::Checking));
        assert!(CheckState::Checking.can_transition_to(CheckState::Resolved));
        assert!(CheckState::Checking.can_transition_to(CheckState::Retrying));
        assert!(CheckState::Checking.can_transition_to(CheckState::Abandoned));
        assert!(CheckState::Retrying.can_transition_to(CheckState::Checking));
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(!CheckState::Scheduled.can_transition_to(CheckState::Resolved));
        assert!(!CheckState::Scheduled.can_transition_to(CheckState::Retrying));
        assert!(!CheckState::Retrying.can_transition_to(CheckState::Resolved));
        assert!(!CheckState::Resolved.can_transition_to(CheckState::Checking));
        assert!(!CheckState::Abandoned.can_transition_to(CheckState::Checking));
    }

    #[test]
    fn test_terminal_states() {
        assert!(CheckState::Resolved.is_terminal());
        assert!(CheckState::Abandoned.is_terminal());
        assert!(!CheckState::Scheduled.is_terminal());
        assert!(!CheckState::Checking.is_terminal());
        assert!(!CheckState::Retrying.is_terminal());
        assert!(CheckState::Resolved.valid_transitions().is_empty());
    }

    #[test]
    fn test_state_from_str() {
        assert_eq!(
            CheckState::try_from("SCHEDULED").unwrap(),
            CheckState::Scheduled
        );
        assert_eq!(
            CheckState::try_from("retrying").unwrap(),
            CheckState::Retrying
        );
        assert!(CheckState::try_from("FINISHED").is_err());
    }

    #[test]
    fn test_display_matches_as_str() {
        assert_eq!(CheckState::Checking.to_string(), "CHECKING");
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle state of a scheduled session. There is no cancelled state;
/// sessions are only ever transitioned forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Scheduled,
    InProgress,
    Completed,
}

impl SessionStatus {
    /// The closed transition table: scheduled -> in_progress -> completed.
    /// Everything else (including repeats and reversals) is illegal.
    pub fn can_transition(self, next: SessionStatus) -> bool {
        matches!(
            (self, next),
            (SessionStatus::Scheduled, SessionStatus::InProgress)
                | (SessionStatus::InProgress, SessionStatus::Completed)
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionStatus::Scheduled => "scheduled",
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Completed => "completed",
        };
        write!(f, "{s}")
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(SessionStatus::Scheduled),
            "in_progress" => Ok(SessionStatus::InProgress),
            "completed" => Ok(SessionStatus::Completed),
            other => Err(format!("unknown session status: {other}")),
        }
    }
}

/// A booked tutoring session. Never deleted, only transitioned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledSession {
    pub id: String,
    pub student_id: String,
    pub tutor_id: i64,
    pub title: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: SessionStatus,
    pub meeting_link: Option<String>,
}

/// A student's rating of a teacher for one session. Unique per
/// (teacher, student, session) triple, enforced by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rating {
    pub id: String,
    pub teacher_id: String,
    pub student_id: String,
    pub session_id: String,
    pub rating: u8,
    pub feedback: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_transitions_allowed() {
        assert!(SessionStatus::Scheduled.can_transition(SessionStatus::InProgress));
        assert!(SessionStatus::InProgress.can_transition(SessionStatus::Completed));
    }

    #[test]
    fn illegal_transitions_rejected() {
        assert!(!SessionStatus::Completed.can_transition(SessionStatus::Scheduled));
        assert!(!SessionStatus::Scheduled.can_transition(SessionStatus::Completed));
        assert!(!SessionStatus::InProgress.can_transition(SessionStatus::Scheduled));
        assert!(!SessionStatus::Scheduled.can_transition(SessionStatus::Scheduled));
        assert!(!SessionStatus::Completed.can_transition(SessionStatus::Completed));
    }

    #[test]
    fn status_round_trip() {
        assert_eq!(
            "in_progress".parse::<SessionStatus>().unwrap(),
            SessionStatus::InProgress
        );
        assert_eq!(SessionStatus::Completed.to_string(), "completed");
        assert!("cancelled".parse::<SessionStatus>().is_err());
    }
}

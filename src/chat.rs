use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which side of a conversation authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderRole {
    Student,
    Teacher,
}

impl SenderRole {
    pub fn other(self) -> Self {
        match self {
            SenderRole::Student => SenderRole::Teacher,
            SenderRole::Teacher => SenderRole::Student,
        }
    }
}

impl fmt::Display for SenderRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SenderRole::Student => write!(f, "student"),
            SenderRole::Teacher => write!(f, "teacher"),
        }
    }
}

impl FromStr for SenderRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "student" => Ok(SenderRole::Student),
            "teacher" => Ok(SenderRole::Teacher),
            other => Err(format!("unknown sender role: {other}")),
        }
    }
}

/// A persisted chat message. Append-only: created by the sending party and
/// immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub student_id: String,
    pub tutor_id: i64,
    pub sender: SenderRole,
    pub content: String,
    pub file_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// The two-party identity of a chat screen. Derived from route parameters
/// and the viewer's profile, never persisted: exactly one student and one
/// teacher per conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub tutor_id: i64,
    pub student_id: String,
    /// Profile id of the teacher side, needed to key ratings.
    pub teacher_id: String,
    pub viewer_role: SenderRole,
}

impl Conversation {
    /// Whether a message belongs to this conversation's (tutor, student) pair.
    pub fn contains(&self, message: &Message) -> bool {
        message.tutor_id == self.tutor_id && message.student_id == self.student_id
    }
}

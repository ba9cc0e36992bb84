use crate::chat::SenderRole;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserType {
    Student,
    Teacher,
}

impl UserType {
    pub fn role(self) -> SenderRole {
        match self {
            UserType::Student => SenderRole::Student,
            UserType::Teacher => SenderRole::Teacher,
        }
    }
}

impl fmt::Display for UserType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserType::Student => write!(f, "student"),
            UserType::Teacher => write!(f, "teacher"),
        }
    }
}

impl FromStr for UserType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "student" => Ok(UserType::Student),
            "teacher" => Ok(UserType::Teacher),
            other => Err(format!("unknown user type: {other}")),
        }
    }
}

/// A teacher's demo-review state. Orthogonal to the chat core; carried on
/// the profile for dashboard gating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    WaitingDemo,
    PendingVerification,
    Approved,
    Rejected,
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VerificationStatus::WaitingDemo => "waiting_demo",
            VerificationStatus::PendingVerification => "pending_verification",
            VerificationStatus::Approved => "approved",
            VerificationStatus::Rejected => "rejected",
        };
        write!(f, "{s}")
    }
}

impl FromStr for VerificationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting_demo" => Ok(VerificationStatus::WaitingDemo),
            "pending_verification" => Ok(VerificationStatus::PendingVerification),
            "approved" => Ok(VerificationStatus::Approved),
            "rejected" => Ok(VerificationStatus::Rejected),
            other => Err(format!("unknown verification status: {other}")),
        }
    }
}

/// An authenticated user's profile. The authenticated profile is passed
/// explicitly to every component that needs it; there is no ambient
/// user-type global.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub user_type: UserType,
    /// Numeric tutor identifier used in chat routes. Teachers only.
    pub tutor_id: Option<i64>,
    pub subject: Option<String>,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
    pub verification_status: Option<VerificationStatus>,
}

impl Profile {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

pub const ASSIGNMENT_ACTIVE: &str = "active";

/// Entitlement record linking a student to a tutor, created by a completed
/// payment. Read-only from the chat coordinator's perspective.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub id: String,
    pub student_id: String,
    pub tutor_id: i64,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl Assignment {
    pub fn is_active(&self) -> bool {
        self.status == ASSIGNMENT_ACTIVE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_type_maps_to_role() {
        assert_eq!(UserType::Teacher.role(), SenderRole::Teacher);
        assert_eq!(UserType::Student.role(), SenderRole::Student);
    }

    #[test]
    fn verification_status_parse() {
        assert_eq!(
            "pending_verification".parse::<VerificationStatus>().unwrap(),
            VerificationStatus::PendingVerification
        );
        assert!("verified".parse::<VerificationStatus>().is_err());
    }
}

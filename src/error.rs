use crate::gate::Redirect;
use crate::session::SessionStatus;

/// Failure taxonomy for the coordinator.
///
/// Authorization denials carry the surface the viewer should be sent back to.
/// Validation failures are raised before any store or network call is made.
/// Backend failures are surfaced once and abandoned, never retried.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("authentication required")]
    Unauthenticated,

    #[error("access denied: {reason}")]
    AccessDenied { redirect: Redirect, reason: String },

    #[error("conversation not entered")]
    NotEntered,

    #[error("{0}")]
    Validation(String),

    #[error("invalid attachment: {0}")]
    Attachment(String),

    #[error("illegal session transition: {from} -> {to}")]
    InvalidTransition {
        from: SessionStatus,
        to: SessionStatus,
    },

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("profile not found: {0}")]
    ProfileNotFound(String),

    #[error("a session for this booking attempt already exists")]
    DuplicateBooking,

    #[error("this session has already been rated")]
    AlreadyRated,

    #[error("payment could not be verified")]
    PaymentRejected,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("payment gateway error: {0}")]
    Gateway(#[from] reqwest::Error),

    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CoordinatorError>;

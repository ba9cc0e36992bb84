use crate::{
    bus::{Event, EventBus, NotificationLevel},
    chat::{Conversation, SenderRole},
    error::{CoordinatorError, Result},
    schedule::meeting_room_url,
    session::{ScheduledSession, SessionStatus},
    store::Store,
};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{info, warn};

/// How far back a completed session still triggers the rating flow.
const RATING_WINDOW_HOURS: i64 = 24;

/// The other party should be shown the rating modal for this session.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct RatingPrompt {
    pub session_id: String,
    pub teacher_id: String,
    pub student_id: String,
    pub tutor_id: i64,
}

/// What one monitor pass observed for a conversation.
#[derive(Debug, Default)]
pub struct TickReport {
    /// A due session that was auto-started on this pass.
    pub started: Option<ScheduledSession>,
    /// A recently completed, still-unrated session. Deduplication per
    /// monitor activation is the caller's job; the persistent rating
    /// existence check has already been made here.
    pub rating_prompt: Option<RatingPrompt>,
}

/// Watches a conversation's scheduled sessions and drives the
/// scheduled -> in_progress -> completed lifecycle against wall-clock time.
///
/// Every transition persists first; local state only changes on confirmed
/// success. Persistence failures during a pass are reported as transient
/// notifications and the pass carries on.
#[derive(Clone)]
pub struct SessionMonitor {
    store: Store,
    bus: Arc<EventBus>,
}

impl SessionMonitor {
    pub fn new(store: Store, bus: Arc<EventBus>) -> Self {
        Self { store, bus }
    }

    pub async fn tick(&self, conversation: &Conversation, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::default();

        if conversation.viewer_role == SenderRole::Teacher {
            report.started = self.auto_start_due_session(conversation, now).await;
        }

        report.rating_prompt = match self.find_unrated_completed(conversation, now).await {
            Ok(prompt) => prompt,
            Err(e) => {
                warn!("monitor could not check completed sessions: {e}");
                self.bus.notify(
                    NotificationLevel::Warning,
                    "Could not check your recent sessions.",
                    Some(conversation.tutor_id),
                );
                None
            }
        };
        report
    }

    /// Start the oldest due session, if the teacher has not opened a room
    /// for it yet. The guarded store transition makes this happen at most
    /// once per session, however many monitor passes observe it.
    async fn auto_start_due_session(
        &self,
        conversation: &Conversation,
        now: DateTime<Utc>,
    ) -> Option<ScheduledSession> {
        let due = match self
            .store
            .due_scheduled_session(conversation.tutor_id, &conversation.student_id, now)
            .await
        {
            Ok(due) => due?,
            Err(e) => {
                warn!("monitor could not query due sessions: {e}");
                return None;
            }
        };

        if due.meeting_link.is_some() {
            return None;
        }

        let url = meeting_room_url(conversation.tutor_id, now);
        match self
            .store
            .transition_session(
                &due.id,
                SessionStatus::Scheduled,
                SessionStatus::InProgress,
                Some(&url),
            )
            .await
        {
            Ok(started) => {
                info!(session_id = %started.id, "auto-starting scheduled session");
                self.bus.notify(
                    NotificationLevel::Info,
                    "Your scheduled session is starting now.",
                    Some(conversation.tutor_id),
                );
                self.bus.publish(Event::SessionStarted(started.clone()));
                self.bus.publish(Event::CallLaunched {
                    tutor_id: conversation.tutor_id,
                    student_id: conversation.student_id.clone(),
                    url,
                });
                Some(started)
            }
            // Another writer got there first; nothing to do.
            Err(CoordinatorError::InvalidTransition { .. }) => None,
            Err(e) => {
                warn!("failed to auto-start session {}: {e}", due.id);
                self.bus.notify(
                    NotificationLevel::Error,
                    "Failed to start your scheduled session.",
                    Some(conversation.tutor_id),
                );
                None
            }
        }
    }

    /// The most recently completed session inside the rating window that has
    /// no rating row yet. Older unrated sessions never prompt.
    async fn find_unrated_completed(
        &self,
        conversation: &Conversation,
        now: DateTime<Utc>,
    ) -> Result<Option<RatingPrompt>> {
        let since = now - Duration::hours(RATING_WINDOW_HOURS);
        let completed = match self
            .store
            .latest_completed_since(conversation.tutor_id, &conversation.student_id, since)
            .await?
        {
            Some(session) => session,
            None => return Ok(None),
        };

        let already_rated = self
            .store
            .rating_exists(
                &conversation.teacher_id,
                &conversation.student_id,
                &completed.id,
            )
            .await?;
        if already_rated {
            return Ok(None);
        }

        Ok(Some(RatingPrompt {
            session_id: completed.id,
            teacher_id: conversation.teacher_id.clone(),
            student_id: conversation.student_id.clone(),
            tutor_id: conversation.tutor_id,
        }))
    }

    /// Explicitly end an in-progress session, then hand back the rating
    /// prompt for the other party.
    pub async fn end_session(
        &self,
        conversation: &Conversation,
        session_id: &str,
    ) -> Result<(ScheduledSession, RatingPrompt)> {
        let completed = self
            .store
            .transition_session(
                session_id,
                SessionStatus::InProgress,
                SessionStatus::Completed,
                None,
            )
            .await?;

        self.bus.publish(Event::SessionCompleted(completed.clone()));
        self.bus.notify(
            NotificationLevel::Info,
            "Session ended. Please rate your experience.",
            Some(conversation.tutor_id),
        );

        let prompt = RatingPrompt {
            session_id: completed.id.clone(),
            teacher_id: conversation.teacher_id.clone(),
            student_id: conversation.student_id.clone(),
            tutor_id: conversation.tutor_id,
        };
        Ok((completed, prompt))
    }
}

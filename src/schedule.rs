use crate::{
    bus::{Event, EventBus, NotificationLevel},
    chat::Conversation,
    entity::Profile,
    error::{CoordinatorError, Result},
    session::{ScheduledSession, SessionStatus},
    store::Store,
};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

pub const ALLOWED_DURATIONS_MIN: [i64; 4] = [30, 60, 90, 120];

const VIDEO_DOMAIN: &str = "meet.jit.si";

/// Delay between persisting a call link and telling the client to open it.
const CALL_OPEN_DELAY: std::time::Duration = std::time::Duration::from_millis(1500);

/// A session booking as submitted. The idempotency key is generated client
/// side once per submission attempt, so a double-submit carries the same key
/// and is rejected by the store.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct BookingRequest {
    pub title: String,
    /// `YYYY-MM-DD`
    pub date: String,
    /// `HH:MM`
    pub time: String,
    pub duration_minutes: i64,
    pub idempotency_key: String,
}

impl BookingRequest {
    /// Validate all fields and compute the (start, end) window. Runs before
    /// any store call; a failed validation never reaches the network.
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
        if self.title.trim().is_empty()
            || self.date.trim().is_empty()
            || self.time.trim().is_empty()
            || self.idempotency_key.trim().is_empty()
        {
            return Err(CoordinatorError::Validation(
                "Please fill in all fields to schedule a session.".into(),
            ));
        }

        if !ALLOWED_DURATIONS_MIN.contains(&self.duration_minutes) {
            return Err(CoordinatorError::Validation(
                "Session duration must be 30, 60, 90 or 120 minutes.".into(),
            ));
        }

        let date = NaiveDate::parse_from_str(&self.date, "%Y-%m-%d")
            .map_err(|_| CoordinatorError::Validation("Invalid session date.".into()))?;
        let time = NaiveTime::parse_from_str(&self.time, "%H:%M")
            .map_err(|_| CoordinatorError::Validation("Invalid session time.".into()))?;

        let start = date.and_time(time).and_utc();
        if start <= now {
            return Err(CoordinatorError::Validation(
                "Please schedule the session for a future date and time.".into(),
            ));
        }

        Ok((start, start + Duration::minutes(self.duration_minutes)))
    }
}

/// A bare video-room URL for a tutor, unique per launch.
pub fn meeting_room_url(tutor_id: i64, now: DateTime<Utc>) -> String {
    format!(
        "https://{VIDEO_DOMAIN}/tutor-{tutor_id}-{}",
        now.timestamp_millis()
    )
}

/// A video-room URL carrying the launching user's identity and call
/// defaults, used for ad hoc calls.
pub fn personal_meeting_url(tutor_id: i64, viewer: &Profile, now: DateTime<Utc>) -> String {
    let base = meeting_room_url(tutor_id, now);
    let url = reqwest::Url::parse_with_params(
        &base,
        &[
            ("userInfo.name", viewer.first_name.as_str()),
            (
                "userInfo.email",
                viewer.email.as_deref().unwrap_or("tutor@example.com"),
            ),
            ("config.startWithVideoMuted", "false"),
            ("config.startWithAudioMuted", "false"),
        ],
    );
    match url {
        Ok(u) => u.to_string(),
        // The base is always parseable; fall back to it regardless.
        Err(_) => base,
    }
}

/// Creates bookings and launches ad hoc video calls inside an already-gated
/// conversation.
#[derive(Clone)]
pub struct SessionScheduler {
    store: Store,
    bus: Arc<EventBus>,
}

impl SessionScheduler {
    pub fn new(store: Store, bus: Arc<EventBus>) -> Self {
        Self { store, bus }
    }

    /// Validate and persist a new booking, then announce it in the chat.
    pub async fn book(
        &self,
        conversation: &Conversation,
        request: &BookingRequest,
        now: DateTime<Utc>,
    ) -> Result<ScheduledSession> {
        let (start_time, end_time) = request.validate(now)?;

        let session = ScheduledSession {
            id: Uuid::new_v4().to_string(),
            student_id: conversation.student_id.clone(),
            tutor_id: conversation.tutor_id,
            title: request.title.trim().to_string(),
            start_time,
            end_time,
            status: SessionStatus::Scheduled,
            meeting_link: None,
        };

        self.store
            .insert_session(&session, &request.idempotency_key)
            .await?;

        // Notify the other party via a chat message. The booking itself has
        // already succeeded; a failed announcement is only a notice.
        let announcement = format!(
            "New session scheduled: \"{}\" on {}",
            session.title,
            start_time.format("%Y-%m-%d %H:%M UTC")
        );
        match self
            .store
            .insert_message(conversation, conversation.viewer_role, &announcement, None)
            .await
        {
            Ok(message) => self.bus.publish(Event::MessageInserted(message)),
            Err(e) => {
                warn!("failed to announce scheduled session: {e}");
                self.bus.notify(
                    NotificationLevel::Warning,
                    "Session scheduled, but the chat announcement failed.",
                    Some(conversation.tutor_id),
                );
            }
        }

        self.bus.publish(Event::SessionScheduled(session.clone()));
        Ok(session)
    }

    /// Launch an ad hoc video call: build a room URL, attach it to the
    /// nearest upcoming booking if one exists, and tell the client to open
    /// the URL after a short fixed delay.
    pub async fn launch_call(
        &self,
        conversation: &Conversation,
        viewer: &Profile,
        now: DateTime<Utc>,
    ) -> Result<String> {
        let url = personal_meeting_url(conversation.tutor_id, viewer, now);

        if let Some(next) = self
            .store
            .next_upcoming_session(conversation.tutor_id, &conversation.student_id, now)
            .await?
        {
            match self
                .store
                .transition_session(
                    &next.id,
                    SessionStatus::Scheduled,
                    SessionStatus::InProgress,
                    Some(&url),
                )
                .await
            {
                Ok(started) => self.bus.publish(Event::SessionStarted(started)),
                Err(e) => {
                    // The call still goes ahead; the booking just keeps its state.
                    warn!("failed to attach meeting link to session {}: {e}", next.id);
                    self.bus.notify(
                        NotificationLevel::Error,
                        "Could not attach the call to your upcoming session.",
                        Some(conversation.tutor_id),
                    );
                }
            }
        }

        let bus = self.bus.clone();
        let event = Event::CallLaunched {
            tutor_id: conversation.tutor_id,
            student_id: conversation.student_id.clone(),
            url: url.clone(),
        };
        tokio::spawn(async move {
            tokio::time::sleep(CALL_OPEN_DELAY).await;
            bus.publish(event);
        });

        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::SenderRole;
    use crate::entity::UserType;
    use chrono::TimeZone;

    fn conversation() -> Conversation {
        Conversation {
            tutor_id: 7,
            student_id: "s1".into(),
            teacher_id: "t1".into(),
            viewer_role: SenderRole::Student,
        }
    }

    fn booking(date: &str, time: &str, duration: i64) -> BookingRequest {
        BookingRequest {
            title: "Calculus Tutorial".into(),
            date: date.into(),
            time: time.into(),
            duration_minutes: duration,
            idempotency_key: Uuid::new_v4().to_string(),
        }
    }

    fn viewer() -> Profile {
        Profile {
            id: "t1".into(),
            first_name: "Tess".into(),
            last_name: "Teacher".into(),
            user_type: UserType::Teacher,
            tutor_id: Some(7),
            subject: None,
            email: Some("tess@example.com".into()),
            avatar_url: None,
            verification_status: None,
        }
    }

    #[test]
    fn past_start_time_is_rejected_before_any_insert() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap();
        let err = booking("2026-03-10", "11:00", 60).validate(now).unwrap_err();
        assert!(matches!(err, CoordinatorError::Validation(_)));

        // Start exactly at "now" is not strictly in the future either.
        let err = booking("2026-03-10", "12:00", 60).validate(now).unwrap_err();
        assert!(matches!(err, CoordinatorError::Validation(_)));
    }

    #[test]
    fn end_time_is_start_plus_duration() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap();
        let (start, end) = booking("2026-03-11", "09:30", 90).validate(now).unwrap();
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 3, 11, 9, 30, 0).unwrap());
        assert_eq!(end - start, Duration::minutes(90));
    }

    #[test]
    fn missing_fields_and_odd_durations_are_rejected() {
        let now = Utc::now();
        let mut req = booking("2026-03-11", "09:30", 60);
        req.title = "  ".into();
        assert!(req.validate(now).is_err());

        assert!(booking("2026-03-11", "09:30", 45).validate(now).is_err());
        assert!(booking("not-a-date", "09:30", 60).validate(now).is_err());
        assert!(booking("2026-03-11", "9 o'clock", 60).validate(now).is_err());
    }

    #[test]
    fn meeting_urls_carry_room_and_identity() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap();
        let bare = meeting_room_url(7, now);
        assert!(bare.starts_with("https://meet.jit.si/tutor-7-"));

        let personal = personal_meeting_url(7, &viewer(), now);
        assert!(personal.starts_with("https://meet.jit.si/tutor-7-"));
        assert!(personal.contains("userInfo.name=Tess"));
        assert!(personal.contains("startWithVideoMuted=false"));
    }

    #[tokio::test]
    async fn booking_persists_session_and_announces_it() {
        let store = Store::in_memory().await.unwrap();
        let bus = Arc::new(EventBus::new());
        let scheduler = SessionScheduler::new(store.clone(), bus.clone());
        let conv = conversation();
        let now = Utc::now();

        let session = scheduler
            .book(&conv, &booking("2030-01-01", "10:00", 60), now)
            .await
            .unwrap();

        let stored = store.fetch_session(&session.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Scheduled);
        assert_eq!(stored.title, "Calculus Tutorial");

        let messages = store.fetch_messages(7, "s1").await.unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].content.contains("Calculus Tutorial"));
    }

    #[tokio::test]
    async fn double_submit_with_same_key_creates_one_session() {
        let store = Store::in_memory().await.unwrap();
        let bus = Arc::new(EventBus::new());
        let scheduler = SessionScheduler::new(store.clone(), bus);
        let conv = conversation();
        let now = Utc::now();

        let req = booking("2030-01-01", "10:00", 60);
        scheduler.book(&conv, &req, now).await.unwrap();
        let err = scheduler.book(&conv, &req, now).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::DuplicateBooking));
    }

    #[tokio::test]
    async fn ad_hoc_call_attaches_to_the_nearest_upcoming_session() {
        let store = Store::in_memory().await.unwrap();
        let bus = Arc::new(EventBus::new());
        let scheduler = SessionScheduler::new(store.clone(), bus);
        let conv = conversation();
        let now = Utc::now();

        let session = scheduler
            .book(&conv, &booking("2030-01-01", "10:00", 60), now)
            .await
            .unwrap();

        let url = scheduler.launch_call(&conv, &viewer(), now).await.unwrap();

        let stored = store.fetch_session(&session.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::InProgress);
        assert_eq!(stored.meeting_link.as_deref(), Some(url.as_str()));
    }

    #[tokio::test]
    async fn ad_hoc_call_without_upcoming_session_still_returns_a_url() {
        let store = Store::in_memory().await.unwrap();
        let bus = Arc::new(EventBus::new());
        let scheduler = SessionScheduler::new(store, bus);

        let url = scheduler
            .launch_call(&conversation(), &viewer(), Utc::now())
            .await
            .unwrap();
        assert!(url.contains("meet.jit.si"));
    }
}

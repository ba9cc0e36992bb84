use crate::{
    attachments::{validate_attachment, LocalBucket, CHAT_FILES_BUCKET},
    bus::{Event, EventBus, NotificationLevel},
    chat::{Conversation, Message},
    entity::Profile,
    error::{CoordinatorError, Result},
    gate::{AccessGate, RouteParams},
    monitor::{RatingPrompt, SessionMonitor, TickReport},
    reconciler::{Timeline, TimelineEntry},
    schedule::{BookingRequest, SessionScheduler},
    session::{Rating, ScheduledSession},
    store::Store,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;

/// How often active rooms are re-checked for due and completed sessions.
const MONITOR_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);

/// One viewer's open chat screen.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomKey {
    pub viewer_id: String,
    pub tutor_id: i64,
    pub student_id: String,
}

struct ChatRoom {
    viewer: Profile,
    timeline: Timeline,
    /// Sessions already prompted for a rating during this room's lifetime.
    prompted: HashSet<String>,
}

/// An outgoing file, validated before it is allowed anywhere near storage.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// What a viewer gets back when entering a conversation.
#[derive(Debug, Serialize)]
pub struct RoomSnapshot {
    pub tutor_id: i64,
    pub student_id: String,
    pub teacher_id: String,
    pub messages: Vec<TimelineEntry>,
    pub rating_prompt: Option<RatingPrompt>,
    pub started_session: Option<ScheduledSession>,
}

#[derive(Debug, Deserialize)]
pub struct RatingSubmission {
    pub teacher_id: String,
    pub student_id: String,
    pub session_id: String,
    pub rating: u8,
    pub feedback: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RatingOutcome {
    pub already_rated: bool,
}

/// Owns the active chat rooms and wires the gate, reconciler, monitor and
/// scheduler together. All persistent writes go through the store first;
/// room state is only touched after the store confirms.
pub struct Manager {
    store: Store,
    bus: Arc<EventBus>,
    files: Arc<LocalBucket>,
    gate: AccessGate,
    scheduler: SessionScheduler,
    monitor: SessionMonitor,
    rooms: Arc<Mutex<HashMap<RoomKey, ChatRoom>>>,
}

impl Manager {
    pub fn new(store: Store, bus: Arc<EventBus>, files: Arc<LocalBucket>) -> Self {
        Self {
            gate: AccessGate::new(store.clone()),
            scheduler: SessionScheduler::new(store.clone(), bus.clone()),
            monitor: SessionMonitor::new(store.clone(), bus.clone()),
            store,
            bus,
            files,
            rooms: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Enter a conversation: a single gate check, a wholesale history load,
    /// and an initial monitor pass. The gate is not re-checked per message.
    pub async fn enter(&self, viewer_id: &str, route: RouteParams) -> Result<RoomSnapshot> {
        let viewer = self
            .store
            .fetch_profile(viewer_id)
            .await?
            .ok_or(CoordinatorError::Unauthenticated)?;

        let conversation = self.gate.authorize(Some(&viewer), &route).await?;
        let history = self
            .store
            .fetch_messages(conversation.tutor_id, &conversation.student_id)
            .await?;
        let report = self.monitor.tick(&conversation, Utc::now()).await;

        let key = RoomKey {
            viewer_id: viewer_id.to_string(),
            tutor_id: conversation.tutor_id,
            student_id: conversation.student_id.clone(),
        };
        info!(?key, "viewer entered chat room");

        let mut timeline = Timeline::new(conversation.clone());
        timeline.replace_history(history);

        // Re-entering replaces the room wholesale: a fresh history and a
        // fresh prompted set, this being a new monitor activation.
        let mut room = ChatRoom {
            viewer,
            timeline,
            prompted: HashSet::new(),
        };
        let rating_prompt = Self::deliver_prompt(&mut room, &self.bus, report.rating_prompt);
        let messages = room.timeline.entries().to_vec();
        self.rooms.lock().unwrap().insert(key, room);

        Ok(RoomSnapshot {
            tutor_id: conversation.tutor_id,
            student_id: conversation.student_id,
            teacher_id: conversation.teacher_id,
            messages,
            rating_prompt,
            started_session: report.started,
        })
    }

    /// Drop a room. The navigating-away analog: the feed subscription dies
    /// with the SSE connection; any in-flight send simply completes against
    /// the store with its room-state update discarded.
    pub fn leave(&self, key: &RoomKey) {
        self.rooms.lock().unwrap().remove(key);
    }

    fn room_context(&self, key: &RoomKey) -> Result<(Conversation, Profile)> {
        let rooms = self.rooms.lock().unwrap();
        let room = rooms.get(key).ok_or(CoordinatorError::NotEntered)?;
        Ok((room.timeline.conversation().clone(), room.viewer.clone()))
    }

    /// Send a message with an immediate optimistic echo. An attachment is
    /// validated before upload; a rejected file causes zero store or storage
    /// calls. On store failure the echo is rolled back and a transient
    /// notice published; there is no automatic retry.
    pub async fn send_message(
        &self,
        key: &RoomKey,
        content: &str,
        attachment: Option<Attachment>,
    ) -> Result<Message> {
        let (conversation, viewer) = self.room_context(key)?;

        if content.trim().is_empty() && attachment.is_none() {
            return Err(CoordinatorError::Validation("Message is empty.".into()));
        }

        let file_url = match attachment {
            Some(a) => {
                validate_attachment(&a.content_type, a.bytes.len() as u64)?;
                Some(
                    self.files
                        .upload(CHAT_FILES_BUCKET, &viewer.id, &a.file_name, &a.bytes)
                        .await?,
                )
            }
            None => None,
        };

        let temp_id = {
            let mut rooms = self.rooms.lock().unwrap();
            let room = rooms.get_mut(key).ok_or(CoordinatorError::NotEntered)?;
            room.timeline.begin_send(content, file_url.clone(), Utc::now())
        };

        let inserted = self
            .store
            .insert_message(
                &conversation,
                conversation.viewer_role,
                content,
                file_url.as_deref(),
            )
            .await;

        match inserted {
            Ok(message) => {
                if let Some(room) = self.rooms.lock().unwrap().get_mut(key) {
                    room.timeline.confirm_send(&temp_id, &message);
                }
                self.bus.publish(Event::MessageInserted(message.clone()));
                Ok(message)
            }
            Err(e) => {
                if let Some(room) = self.rooms.lock().unwrap().get_mut(key) {
                    room.timeline.rollback_send(&temp_id);
                }
                self.bus.notify(
                    NotificationLevel::Error,
                    "Failed to send message.",
                    Some(conversation.tutor_id),
                );
                Err(e)
            }
        }
    }

    /// Whether the viewer currently has this room open.
    pub fn has_room(&self, key: &RoomKey) -> bool {
        self.rooms.lock().unwrap().contains_key(key)
    }

    /// Feed a live insert event into every open room it belongs to. Rooms
    /// for other conversations ignore it, and the sender's own room drops it
    /// too: the optimistic echo already covers it.
    fn fan_out_message(&self, message: &Message) {
        let mut rooms = self.rooms.lock().unwrap();
        for room in rooms.values_mut() {
            room.timeline.apply_live(message);
        }
    }

    /// Keep open-room timelines live: apply every committed message from the
    /// bus, for as long as the daemon runs.
    pub async fn run_live_feed(self: Arc<Self>) {
        let mut rx = self.bus.subscribe();
        loop {
            match rx.recv().await {
                Ok(Event::MessageInserted(message)) => self.fan_out_message(&message),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("live feed lagged by {n} events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    pub fn timeline_entries(&self, key: &RoomKey) -> Result<Vec<TimelineEntry>> {
        let rooms = self.rooms.lock().unwrap();
        let room = rooms.get(key).ok_or(CoordinatorError::NotEntered)?;
        Ok(room.timeline.entries().to_vec())
    }

    /// Book a new session inside an entered conversation.
    pub async fn schedule_session(
        &self,
        key: &RoomKey,
        request: &BookingRequest,
    ) -> Result<ScheduledSession> {
        let (conversation, _) = self.room_context(key)?;
        let result = self.scheduler.book(&conversation, request, Utc::now()).await;
        if let Err(CoordinatorError::Database(_)) = &result {
            self.bus.notify(
                NotificationLevel::Error,
                "Failed to schedule session.",
                Some(conversation.tutor_id),
            );
        }
        result
    }

    /// Launch an ad hoc video call and return the room URL.
    pub async fn launch_call(&self, key: &RoomKey) -> Result<String> {
        let (conversation, viewer) = self.room_context(key)?;
        self.scheduler
            .launch_call(&conversation, &viewer, Utc::now())
            .await
    }

    /// Explicitly end an in-progress session, prompting the rating flow.
    pub async fn end_session(
        &self,
        key: &RoomKey,
        session_id: &str,
    ) -> Result<Option<RatingPrompt>> {
        let (conversation, _) = self.room_context(key)?;
        let result = self.monitor.end_session(&conversation, session_id).await;

        match result {
            Ok((_completed, prompt)) => {
                let delivered = {
                    let mut rooms = self.rooms.lock().unwrap();
                    match rooms.get_mut(key) {
                        Some(room) => Self::deliver_prompt(room, &self.bus, Some(prompt)),
                        None => None,
                    }
                };
                Ok(delivered)
            }
            Err(e) => {
                self.bus.notify(
                    NotificationLevel::Error,
                    "Failed to end session.",
                    Some(conversation.tutor_id),
                );
                Err(e)
            }
        }
    }

    /// Persist a rating. A duplicate is a benign "already rated" outcome,
    /// not a hard failure.
    pub async fn submit_rating(&self, submission: &RatingSubmission) -> Result<RatingOutcome> {
        if !(1..=5).contains(&submission.rating) {
            return Err(CoordinatorError::Validation(
                "Please select a rating before submitting".into(),
            ));
        }

        let rating = Rating {
            id: Uuid::new_v4().to_string(),
            teacher_id: submission.teacher_id.clone(),
            student_id: submission.student_id.clone(),
            session_id: submission.session_id.clone(),
            rating: submission.rating,
            feedback: submission
                .feedback
                .as_deref()
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .map(str::to_string),
            created_at: Utc::now(),
        };

        match self.store.insert_rating(&rating).await {
            Ok(()) => {
                self.bus
                    .notify(NotificationLevel::Success, "Thank you for your feedback!", None);
                Ok(RatingOutcome { already_rated: false })
            }
            Err(CoordinatorError::AlreadyRated) => {
                self.bus.notify(
                    NotificationLevel::Info,
                    "You have already submitted a rating for this session",
                    None,
                );
                Ok(RatingOutcome { already_rated: true })
            }
            Err(e) => Err(e),
        }
    }

    /// One monitor pass over every active room.
    pub async fn tick_rooms(&self) {
        let contexts: Vec<(RoomKey, Conversation)> = {
            let rooms = self.rooms.lock().unwrap();
            rooms
                .iter()
                .map(|(k, room)| (k.clone(), room.timeline.conversation().clone()))
                .collect()
        };

        for (key, conversation) in contexts {
            let TickReport { rating_prompt, .. } =
                self.monitor.tick(&conversation, Utc::now()).await;
            let mut rooms = self.rooms.lock().unwrap();
            if let Some(room) = rooms.get_mut(&key) {
                Self::deliver_prompt(room, &self.bus, rating_prompt);
            }
        }
    }

    /// Periodic lifecycle checks for all open rooms, for as long as the
    /// daemon runs.
    pub async fn run_monitor(self: Arc<Self>) {
        let mut interval = tokio::time::interval(MONITOR_INTERVAL);
        loop {
            interval.tick().await;
            self.tick_rooms().await;
        }
    }

    /// Show a rating prompt at most once per room activation. The
    /// persistent dedup is the rating existence check; this set only stops
    /// repeats within one activation.
    fn deliver_prompt(
        room: &mut ChatRoom,
        bus: &EventBus,
        prompt: Option<RatingPrompt>,
    ) -> Option<RatingPrompt> {
        let prompt = prompt?;
        if !room.prompted.insert(prompt.session_id.clone()) {
            return None;
        }
        bus.publish(Event::RatingRequested {
            tutor_id: prompt.tutor_id,
            teacher_id: prompt.teacher_id.clone(),
            student_id: prompt.student_id.clone(),
            session_id: prompt.session_id.clone(),
        });
        Some(prompt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Assignment, UserType, ASSIGNMENT_ACTIVE};
    use crate::session::SessionStatus;
    use chrono::Duration;

    async fn fixture() -> (Arc<Manager>, Store, Arc<EventBus>) {
        let store = Store::in_memory().await.unwrap();
        let bus = Arc::new(EventBus::new());
        let dir = std::env::temp_dir().join(format!("tutorhub-mgr-{}", Uuid::new_v4()));
        let files = Arc::new(LocalBucket::new(dir, "http://localhost:3000"));
        let manager = Arc::new(Manager::new(store.clone(), bus.clone(), files));

        store
            .upsert_profile(&Profile {
                id: "t1".into(),
                first_name: "Tess".into(),
                last_name: "Teacher".into(),
                user_type: UserType::Teacher,
                tutor_id: Some(7),
                subject: Some("Math".into()),
                email: None,
                avatar_url: None,
                verification_status: None,
            })
            .await
            .unwrap();
        store
            .upsert_profile(&Profile {
                id: "s1".into(),
                first_name: "Sam".into(),
                last_name: "Student".into(),
                user_type: UserType::Student,
                tutor_id: None,
                subject: None,
                email: None,
                avatar_url: None,
                verification_status: None,
            })
            .await
            .unwrap();
        store
            .insert_assignment(&Assignment {
                id: "a1".into(),
                student_id: "s1".into(),
                tutor_id: 7,
                status: ASSIGNMENT_ACTIVE.into(),
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        (manager, store, bus)
    }

    fn teacher_key() -> RoomKey {
        RoomKey {
            viewer_id: "t1".into(),
            tutor_id: 7,
            student_id: "s1".into(),
        }
    }

    #[tokio::test]
    async fn entering_without_assignment_denies_and_loads_nothing() {
        let (manager, store, _) = fixture().await;
        store
            .upsert_profile(&Profile {
                id: "s2".into(),
                first_name: "No".into(),
                last_name: "Deal".into(),
                user_type: UserType::Student,
                tutor_id: None,
                subject: None,
                email: None,
                avatar_url: None,
                verification_status: None,
            })
            .await
            .unwrap();

        let err = manager
            .enter("s2", RouteParams { tutor_id: 7, student_id: None })
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::AccessDenied { .. }));

        // No room was created for the denied viewer.
        let key = RoomKey { viewer_id: "s2".into(), tutor_id: 7, student_id: "s2".into() };
        assert!(matches!(
            manager.timeline_entries(&key),
            Err(CoordinatorError::NotEntered)
        ));
    }

    #[tokio::test]
    async fn teacher_send_shows_echo_then_server_id() {
        let (manager, _, _) = fixture().await;
        manager
            .enter("t1", RouteParams { tutor_id: 7, student_id: Some("s1".into()) })
            .await
            .unwrap();

        let key = teacher_key();
        let message = manager.send_message(&key, "Hello", None).await.unwrap();

        let entries = manager.timeline_entries(&key).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message.id, message.id);
        assert_eq!(entries[0].message.content, "Hello");
        assert!(entries[0].is_mine);
        assert!(!entries[0].pending);
        assert!(!message.id.starts_with("temp-"));
    }

    #[tokio::test]
    async fn rejected_attachment_sends_nothing() {
        let (manager, store, _) = fixture().await;
        manager
            .enter("t1", RouteParams { tutor_id: 7, student_id: Some("s1".into()) })
            .await
            .unwrap();

        let err = manager
            .send_message(
                &teacher_key(),
                "see attached",
                Some(Attachment {
                    file_name: "malware.exe".into(),
                    content_type: "application/octet-stream".into(),
                    bytes: vec![0; 16],
                }),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::Attachment(_)));

        // Nothing was persisted and no echo lingers.
        assert!(store.fetch_messages(7, "s1").await.unwrap().is_empty());
        assert!(manager.timeline_entries(&teacher_key()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn other_partys_send_reaches_an_open_timeline() {
        let (manager, _, _) = fixture().await;
        tokio::spawn(manager.clone().run_live_feed());

        manager
            .enter("t1", RouteParams { tutor_id: 7, student_id: Some("s1".into()) })
            .await
            .unwrap();
        manager
            .enter("s1", RouteParams { tutor_id: 7, student_id: None })
            .await
            .unwrap();

        let student_key = RoomKey {
            viewer_id: "s1".into(),
            tutor_id: 7,
            student_id: "s1".into(),
        };
        manager
            .send_message(&student_key, "hi teacher", None)
            .await
            .unwrap();

        // The teacher never refetches; the bus subscriber keeps the open
        // timeline current.
        let key = teacher_key();
        let mut entries = Vec::new();
        for _ in 0..100 {
            entries = manager.timeline_entries(&key).unwrap();
            if !entries.is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(entries.len(), 1);
        assert!(!entries[0].is_mine);
        assert_eq!(entries[0].message.content, "hi teacher");

        // The sender's room keeps only the confirmed echo, no duplicate.
        let own = manager.timeline_entries(&student_key).unwrap();
        assert_eq!(own.len(), 1);
        assert!(own[0].is_mine);
    }

    #[tokio::test]
    async fn rating_prompt_fires_once_per_activation() {
        let (manager, store, _) = fixture().await;
        let now = Utc::now();
        store
            .insert_session(
                &ScheduledSession {
                    id: "done".into(),
                    student_id: "s1".into(),
                    tutor_id: 7,
                    title: "Algebra".into(),
                    start_time: now - Duration::hours(3),
                    end_time: now - Duration::hours(2),
                    status: SessionStatus::Completed,
                    meeting_link: None,
                },
                "k1",
            )
            .await
            .unwrap();

        let snapshot = manager
            .enter("s1", RouteParams { tutor_id: 7, student_id: None })
            .await
            .unwrap();
        let prompt = snapshot.rating_prompt.unwrap();
        assert_eq!(prompt.session_id, "done");

        // Later monitor passes in the same activation stay quiet.
        manager.tick_rooms().await;
        let key = RoomKey { viewer_id: "s1".into(), tutor_id: 7, student_id: "s1".into() };
        {
            let rooms = manager.rooms.lock().unwrap();
            assert!(rooms.get(&key).unwrap().prompted.contains("done"));
        }
    }

    #[tokio::test]
    async fn end_session_prompts_and_cannot_repeat() {
        let (manager, store, _) = fixture().await;
        let now = Utc::now();
        store
            .insert_session(
                &ScheduledSession {
                    id: "live".into(),
                    student_id: "s1".into(),
                    tutor_id: 7,
                    title: "Algebra".into(),
                    start_time: now - Duration::minutes(30),
                    end_time: now + Duration::minutes(30),
                    status: SessionStatus::InProgress,
                    meeting_link: Some("https://meet.jit.si/room".into()),
                },
                "k1",
            )
            .await
            .unwrap();

        manager
            .enter("t1", RouteParams { tutor_id: 7, student_id: Some("s1".into()) })
            .await
            .unwrap();
        let key = teacher_key();

        let prompt = manager.end_session(&key, "live").await.unwrap();
        assert!(prompt.is_some());

        let err = manager.end_session(&key, "live").await.unwrap_err();
        assert!(matches!(err, CoordinatorError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn duplicate_rating_is_a_benign_outcome() {
        let (manager, _, _) = fixture().await;
        let submission = RatingSubmission {
            teacher_id: "t1".into(),
            student_id: "s1".into(),
            session_id: "done".into(),
            rating: 5,
            feedback: Some("  great  ".into()),
        };

        let first = manager.submit_rating(&submission).await.unwrap();
        assert!(!first.already_rated);

        let second = manager.submit_rating(&submission).await.unwrap();
        assert!(second.already_rated);

        let invalid = RatingSubmission { rating: 0, ..submission };
        assert!(matches!(
            manager.submit_rating(&invalid).await,
            Err(CoordinatorError::Validation(_))
        ));
    }
}

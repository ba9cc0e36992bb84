use crate::chat::Message;
use crate::session::ScheduledSession;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Event {
    /// A message row was committed to the store
    MessageInserted(Message),

    /// A new session booking was persisted
    SessionScheduled(ScheduledSession),

    /// A session moved to in_progress and has a meeting link
    SessionStarted(ScheduledSession),

    /// A session was explicitly ended
    SessionCompleted(ScheduledSession),

    /// A video-call URL is ready to open in a new browser context
    CallLaunched {
        tutor_id: i64,
        student_id: String,
        url: String,
    },

    /// The other party should be shown the rating modal
    RatingRequested {
        tutor_id: i64,
        teacher_id: String,
        student_id: String,
        session_id: String,
    },

    /// A transient, dismissible notice (the daemon analog of a toast)
    Notification {
        level: NotificationLevel,
        message: String,
        tutor_id: Option<i64>,
    },
}

impl Event {
    /// Tutor the event concerns, used for server-side feed filtering.
    pub fn tutor_id(&self) -> Option<i64> {
        match self {
            Event::MessageInserted(m) => Some(m.tutor_id),
            Event::SessionScheduled(s)
            | Event::SessionStarted(s)
            | Event::SessionCompleted(s) => Some(s.tutor_id),
            Event::CallLaunched { tutor_id, .. } => Some(*tutor_id),
            Event::RatingRequested { tutor_id, .. } => Some(*tutor_id),
            Event::Notification { tutor_id, .. } => *tutor_id,
        }
    }

    /// Student the event concerns, where one applies.
    pub fn student_id(&self) -> Option<&str> {
        match self {
            Event::MessageInserted(m) => Some(&m.student_id),
            Event::SessionScheduled(s)
            | Event::SessionStarted(s)
            | Event::SessionCompleted(s) => Some(&s.student_id),
            Event::CallLaunched { student_id, .. } => Some(student_id),
            Event::RatingRequested { student_id, .. } => Some(student_id),
            Event::Notification { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
    Success,
}

pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(100);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: Event) {
        // We ignore the error if there are no receivers
        let _ = self.tx.send(event);
    }

    pub fn notify(&self, level: NotificationLevel, message: impl Into<String>, tutor_id: Option<i64>) {
        self.publish(Event::Notification {
            level,
            message: message.into(),
            tutor_id,
        });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

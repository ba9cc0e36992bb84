use crate::chat::{Conversation, Message};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// One displayed message. `pending` marks an optimistic echo that has not
/// been confirmed by the store yet.
#[derive(Debug, Clone, Serialize)]
pub struct TimelineEntry {
    pub message: Message,
    pub is_mine: bool,
    pub pending: bool,
}

/// The single ordered, deduplicated message list of an open conversation.
///
/// History loads replace the list wholesale; live feed events append; the
/// viewer's own sends appear immediately as optimistic echoes and are
/// reconciled in place once the store confirms them. Displayed order is
/// creation-time ascending, with the caveat that an unconfirmed echo carries
/// a client-side timestamp until reconciled.
#[derive(Debug, Clone)]
pub struct Timeline {
    conversation: Conversation,
    entries: Vec<TimelineEntry>,
}

impl Timeline {
    pub fn new(conversation: Conversation) -> Self {
        Self {
            conversation,
            entries: Vec::new(),
        }
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn entries(&self) -> &[TimelineEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Replace local state with a freshly fetched history (already ordered
    /// ascending by creation time).
    pub fn replace_history(&mut self, history: Vec<Message>) {
        let viewer = self.conversation.viewer_role;
        self.entries = history
            .into_iter()
            .map(|message| TimelineEntry {
                is_mine: message.sender == viewer,
                pending: false,
                message,
            })
            .collect();
    }

    /// Apply one realtime insert event. Returns whether the list changed.
    ///
    /// Events for another conversation are dropped. Events whose sender role
    /// equals the viewer's own are dropped too: they are presumed already
    /// represented by the optimistic echo.
    pub fn apply_live(&mut self, message: &Message) -> bool {
        if !self.conversation.contains(message) {
            return false;
        }
        if message.sender == self.conversation.viewer_role {
            return false;
        }
        if self.entries.iter().any(|e| e.message.id == message.id) {
            return false;
        }

        self.entries.push(TimelineEntry {
            message: message.clone(),
            is_mine: false,
            pending: false,
        });
        true
    }

    /// Append an optimistic echo for an outgoing message, before the store
    /// call resolves. Returns the temporary identifier used to reconcile or
    /// roll back the entry.
    pub fn begin_send(
        &mut self,
        content: &str,
        file_url: Option<String>,
        now: DateTime<Utc>,
    ) -> String {
        let temp_id = format!("temp-{}", Uuid::new_v4());
        self.entries.push(TimelineEntry {
            message: Message {
                id: temp_id.clone(),
                student_id: self.conversation.student_id.clone(),
                tutor_id: self.conversation.tutor_id,
                sender: self.conversation.viewer_role,
                content: content.to_string(),
                file_url,
                created_at: now,
            },
            is_mine: true,
            pending: true,
        });
        temp_id
    }

    /// Reconcile an optimistic echo with the persisted row. The entry keeps
    /// its visible position; only the identifier and timestamp change.
    pub fn confirm_send(&mut self, temp_id: &str, persisted: &Message) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.message.id == temp_id) {
            entry.message.id = persisted.id.clone();
            entry.message.created_at = persisted.created_at;
            entry.pending = false;
        }
    }

    /// Drop an optimistic echo after a failed send.
    pub fn rollback_send(&mut self, temp_id: &str) {
        self.entries.retain(|e| e.message.id != temp_id);
    }
}

/// The unified auto-scroll policy: scroll only when the list grew and the
/// newest entry is an incoming message, never for the viewer's own echo.
pub fn should_autoscroll(previous: &[TimelineEntry], next: &[TimelineEntry]) -> bool {
    next.len() > previous.len() && next.last().is_some_and(|e| !e.is_mine)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::SenderRole;

    fn conversation(viewer: SenderRole) -> Conversation {
        Conversation {
            tutor_id: 7,
            student_id: "s1".into(),
            teacher_id: "t1".into(),
            viewer_role: viewer,
        }
    }

    fn message(id: &str, sender: SenderRole) -> Message {
        Message {
            id: id.into(),
            student_id: "s1".into(),
            tutor_id: 7,
            sender,
            content: "hello".into(),
            file_url: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn history_load_replaces_wholesale_and_tags_ownership() {
        let mut timeline = Timeline::new(conversation(SenderRole::Teacher));
        timeline.replace_history(vec![
            message("a", SenderRole::Student),
            message("b", SenderRole::Teacher),
        ]);

        assert_eq!(timeline.len(), 2);
        assert!(!timeline.entries()[0].is_mine);
        assert!(timeline.entries()[1].is_mine);

        // A later reload replaces everything, it does not append.
        timeline.replace_history(vec![message("c", SenderRole::Student)]);
        assert_eq!(timeline.len(), 1);
    }

    #[test]
    fn own_role_live_events_are_ignored() {
        let mut timeline = Timeline::new(conversation(SenderRole::Teacher));
        assert!(!timeline.apply_live(&message("a", SenderRole::Teacher)));
        assert!(timeline.is_empty());
    }

    #[test]
    fn foreign_conversation_events_are_ignored() {
        let mut timeline = Timeline::new(conversation(SenderRole::Teacher));
        let mut other = message("a", SenderRole::Student);
        other.student_id = "someone-else".into();
        assert!(!timeline.apply_live(&other));
    }

    #[test]
    fn incoming_events_append_untagged() {
        let mut timeline = Timeline::new(conversation(SenderRole::Teacher));
        assert!(timeline.apply_live(&message("a", SenderRole::Student)));
        assert!(!timeline.entries()[0].is_mine);

        // Redelivery of the same row is deduplicated.
        assert!(!timeline.apply_live(&message("a", SenderRole::Student)));
        assert_eq!(timeline.len(), 1);
    }

    #[test]
    fn optimistic_echo_appears_immediately_and_confirms_in_place() {
        let mut timeline = Timeline::new(conversation(SenderRole::Teacher));
        timeline.apply_live(&message("a", SenderRole::Student));

        let temp_id = timeline.begin_send("Hello", None, Utc::now());
        assert_eq!(timeline.len(), 2);
        assert!(timeline.entries()[1].is_mine);
        assert!(timeline.entries()[1].pending);
        assert!(temp_id.starts_with("temp-"));

        let persisted = message("server-1", SenderRole::Teacher);
        timeline.confirm_send(&temp_id, &persisted);

        // Same position, server id, no longer pending.
        let entry = &timeline.entries()[1];
        assert_eq!(entry.message.id, "server-1");
        assert_eq!(entry.message.content, "Hello");
        assert!(entry.is_mine);
        assert!(!entry.pending);
    }

    #[test]
    fn failed_send_rolls_the_echo_back() {
        let mut timeline = Timeline::new(conversation(SenderRole::Student));
        let temp_id = timeline.begin_send("oops", None, Utc::now());
        assert_eq!(timeline.len(), 1);

        timeline.rollback_send(&temp_id);
        assert!(timeline.is_empty());
    }

    #[test]
    fn autoscroll_only_on_incoming_messages() {
        let mut timeline = Timeline::new(conversation(SenderRole::Teacher));
        let before = timeline.entries().to_vec();

        timeline.begin_send("mine", None, Utc::now());
        assert!(!should_autoscroll(&before, timeline.entries()));

        let before = timeline.entries().to_vec();
        timeline.apply_live(&message("a", SenderRole::Student));
        assert!(should_autoscroll(&before, timeline.entries()));

        // Unchanged list never scrolls.
        assert!(!should_autoscroll(timeline.entries(), timeline.entries()));
    }
}

use crate::{
    chat::{Conversation, Message, SenderRole},
    entity::{Assignment, Profile, ASSIGNMENT_ACTIVE},
    error::{CoordinatorError, Result},
    session::{Rating, ScheduledSession, SessionStatus},
};
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteConnectOptions, sqlite::SqliteRow, ConnectOptions, Row, SqlitePool};
use std::{path::Path, str::FromStr};
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct Store {
    pool: SqlitePool,
}

fn decode_err(e: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> sqlx::Error {
    sqlx::Error::Decode(e.into())
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

impl Store {
    /// Create a new Store instance.
    /// This will automatically create the database file if it doesn't exist.
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();

        // Ensure the parent directory exists
        if let Some(parent) = db_path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db_url = format!("sqlite://{}", db_path.to_string_lossy());

        let options = SqliteConnectOptions::from_str(&db_url)
            .map_err(CoordinatorError::Database)?
            .create_if_missing(true)
            .log_statements(tracing::log::LevelFilter::Trace);

        let pool = SqlitePool::connect_with(options).await?;

        Ok(Self { pool })
    }

    /// An in-memory store, used by tests.
    pub async fn in_memory() -> Result<Self> {
        let options =
            SqliteConnectOptions::from_str("sqlite::memory:").map_err(CoordinatorError::Database)?;
        // A single connection, or each pooled connection would get its own
        // private in-memory database.
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    /// Close the underlying pool. Every query after this fails.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Initialize the database schema.
    pub async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS profiles (
                id TEXT PRIMARY KEY,
                first_name TEXT NOT NULL,
                last_name TEXT NOT NULL,
                user_type TEXT NOT NULL,
                tutor_id INTEGER,
                subject TEXT,
                email TEXT,
                avatar_url TEXT,
                verification_status TEXT
            );

            CREATE TABLE IF NOT EXISTS student_tutor_assignments (
                id TEXT PRIMARY KEY,
                student_id TEXT NOT NULL,
                tutor_id INTEGER NOT NULL,
                status TEXT NOT NULL,
                created_at DATETIME NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_assignments_student
                ON student_tutor_assignments(student_id, status);

            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                student_id TEXT NOT NULL,
                tutor_id INTEGER NOT NULL,
                sender_role TEXT NOT NULL,
                content TEXT NOT NULL,
                file_url TEXT,
                created_at DATETIME NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_pair_created
                ON messages(tutor_id, student_id, created_at);

            CREATE TABLE IF NOT EXISTS scheduled_sessions (
                id TEXT PRIMARY KEY,
                student_id TEXT NOT NULL,
                tutor_id INTEGER NOT NULL,
                title TEXT NOT NULL,
                start_time DATETIME NOT NULL,
                end_time DATETIME NOT NULL,
                status TEXT NOT NULL,
                meeting_link TEXT,
                idempotency_key TEXT UNIQUE
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_pair_status
                ON scheduled_sessions(tutor_id, student_id, status, start_time);

            CREATE TABLE IF NOT EXISTS teacher_ratings (
                id TEXT PRIMARY KEY,
                teacher_id TEXT NOT NULL,
                student_id TEXT NOT NULL,
                session_id TEXT NOT NULL,
                rating INTEGER NOT NULL,
                feedback TEXT,
                created_at DATETIME NOT NULL,
                UNIQUE(teacher_id, student_id, session_id)
            );

            CREATE TABLE IF NOT EXISTS payments (
                id TEXT PRIMARY KEY,
                student_id TEXT NOT NULL,
                tutor_id INTEGER NOT NULL,
                amount REAL NOT NULL,
                currency TEXT NOT NULL,
                order_id TEXT NOT NULL,
                payment_id TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at DATETIME NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // -------------------------------------------------------------------------
    // Profiles
    // -------------------------------------------------------------------------

    pub async fn upsert_profile(&self, profile: &Profile) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO profiles
                (id, first_name, last_name, user_type, tutor_id, subject, email, avatar_url, verification_status)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                first_name = excluded.first_name,
                last_name = excluded.last_name,
                user_type = excluded.user_type,
                tutor_id = excluded.tutor_id,
                subject = excluded.subject,
                email = excluded.email,
                avatar_url = excluded.avatar_url,
                verification_status = excluded.verification_status
            "#,
        )
        .bind(&profile.id)
        .bind(&profile.first_name)
        .bind(&profile.last_name)
        .bind(profile.user_type.to_string())
        .bind(profile.tutor_id)
        .bind(&profile.subject)
        .bind(&profile.email)
        .bind(&profile.avatar_url)
        .bind(profile.verification_status.map(|s| s.to_string()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn fetch_profile(&self, id: &str) -> Result<Option<Profile>> {
        let row = sqlx::query("SELECT * FROM profiles WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| profile_from_row(&r)).transpose().map_err(Into::into)
    }

    /// The teacher profile behind a route's numeric tutor id.
    pub async fn fetch_teacher_by_tutor_id(&self, tutor_id: i64) -> Result<Option<Profile>> {
        let row = sqlx::query("SELECT * FROM profiles WHERE tutor_id = ? AND user_type = 'teacher'")
            .bind(tutor_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| profile_from_row(&r)).transpose().map_err(Into::into)
    }

    // -------------------------------------------------------------------------
    // Assignments
    // -------------------------------------------------------------------------

    pub async fn insert_assignment(&self, assignment: &Assignment) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO student_tutor_assignments (id, student_id, tutor_id, status, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&assignment.id)
        .bind(&assignment.student_id)
        .bind(assignment.tutor_id)
        .bind(&assignment.status)
        .bind(assignment.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// The active assignment linking a tutor to a specific student, if any.
    pub async fn active_assignment(
        &self,
        tutor_id: i64,
        student_id: &str,
    ) -> Result<Option<Assignment>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM student_tutor_assignments
            WHERE tutor_id = ? AND student_id = ? AND status = ?
            "#,
        )
        .bind(tutor_id)
        .bind(student_id)
        .bind(ASSIGNMENT_ACTIVE)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| assignment_from_row(&r)).transpose().map_err(Into::into)
    }

    /// All active assignments held by a student.
    pub async fn active_assignments_for_student(&self, student_id: &str) -> Result<Vec<Assignment>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM student_tutor_assignments
            WHERE student_id = ? AND status = ?
            ORDER BY created_at
            "#,
        )
        .bind(student_id)
        .bind(ASSIGNMENT_ACTIVE)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| assignment_from_row(r).map_err(Into::into))
            .collect()
    }

    // -------------------------------------------------------------------------
    // Messages
    // -------------------------------------------------------------------------

    /// All messages for a (tutor, student) pair, ordered ascending by
    /// creation time.
    pub async fn fetch_messages(&self, tutor_id: i64, student_id: &str) -> Result<Vec<Message>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM messages
            WHERE tutor_id = ? AND student_id = ?
            ORDER BY created_at ASC
            "#,
        )
        .bind(tutor_id)
        .bind(student_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| message_from_row(r).map_err(Into::into))
            .collect()
    }

    /// Persist a new message. The id and creation timestamp are issued here,
    /// not by the caller; the returned row is what the optimistic echo gets
    /// reconciled against.
    pub async fn insert_message(
        &self,
        conversation: &Conversation,
        sender: SenderRole,
        content: &str,
        file_url: Option<&str>,
    ) -> Result<Message> {
        let message = Message {
            id: Uuid::new_v4().to_string(),
            student_id: conversation.student_id.clone(),
            tutor_id: conversation.tutor_id,
            sender,
            content: content.to_string(),
            file_url: file_url.map(str::to_string),
            created_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO messages (id, student_id, tutor_id, sender_role, content, file_url, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&message.id)
        .bind(&message.student_id)
        .bind(message.tutor_id)
        .bind(message.sender.to_string())
        .bind(&message.content)
        .bind(&message.file_url)
        .bind(message.created_at)
        .execute(&self.pool)
        .await?;

        Ok(message)
    }

    // -------------------------------------------------------------------------
    // Scheduled sessions
    // -------------------------------------------------------------------------

    /// Persist a new booking. The idempotency key is unique per submission
    /// attempt; a duplicate key means a double-submit and is rejected.
    pub async fn insert_session(
        &self,
        session: &ScheduledSession,
        idempotency_key: &str,
    ) -> Result<()> {
        let res = sqlx::query(
            r#"
            INSERT INTO scheduled_sessions
                (id, student_id, tutor_id, title, start_time, end_time, status, meeting_link, idempotency_key)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&session.id)
        .bind(&session.student_id)
        .bind(session.tutor_id)
        .bind(&session.title)
        .bind(session.start_time)
        .bind(session.end_time)
        .bind(session.status.to_string())
        .bind(&session.meeting_link)
        .bind(idempotency_key)
        .execute(&self.pool)
        .await;

        match res {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(CoordinatorError::DuplicateBooking),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn fetch_session(&self, id: &str) -> Result<Option<ScheduledSession>> {
        let row = sqlx::query("SELECT * FROM scheduled_sessions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| session_from_row(&r)).transpose().map_err(Into::into)
    }

    /// The oldest scheduled session for the pair whose start time has already
    /// passed, if any.
    pub async fn due_scheduled_session(
        &self,
        tutor_id: i64,
        student_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ScheduledSession>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM scheduled_sessions
            WHERE tutor_id = ? AND student_id = ? AND status = 'scheduled' AND start_time <= ?
            ORDER BY start_time ASC
            LIMIT 1
            "#,
        )
        .bind(tutor_id)
        .bind(student_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| session_from_row(&r)).transpose().map_err(Into::into)
    }

    /// The nearest scheduled session for the pair that has not started yet.
    pub async fn next_upcoming_session(
        &self,
        tutor_id: i64,
        student_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ScheduledSession>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM scheduled_sessions
            WHERE tutor_id = ? AND student_id = ? AND status = 'scheduled' AND start_time >= ?
            ORDER BY start_time ASC
            LIMIT 1
            "#,
        )
        .bind(tutor_id)
        .bind(student_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| session_from_row(&r)).transpose().map_err(Into::into)
    }

    /// The most recently completed session for the pair whose end time is at
    /// or after the given cutoff.
    pub async fn latest_completed_since(
        &self,
        tutor_id: i64,
        student_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<ScheduledSession>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM scheduled_sessions
            WHERE tutor_id = ? AND student_id = ? AND status = 'completed' AND end_time >= ?
            ORDER BY end_time DESC
            LIMIT 1
            "#,
        )
        .bind(tutor_id)
        .bind(student_id)
        .bind(since)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| session_from_row(&r)).transpose().map_err(Into::into)
    }

    /// Transition a session through the status state machine.
    ///
    /// The update is guarded by `WHERE status = <from>`, so a repeated or
    /// concurrent transition affects zero rows and is reported as an illegal
    /// transition rather than silently winning. The meeting link, when given,
    /// is persisted atomically with the status change.
    pub async fn transition_session(
        &self,
        id: &str,
        from: SessionStatus,
        to: SessionStatus,
        meeting_link: Option<&str>,
    ) -> Result<ScheduledSession> {
        if !from.can_transition(to) {
            return Err(CoordinatorError::InvalidTransition { from, to });
        }

        let res = sqlx::query(
            r#"
            UPDATE scheduled_sessions
            SET status = ?, meeting_link = COALESCE(?, meeting_link)
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(to.to_string())
        .bind(meeting_link)
        .bind(id)
        .bind(from.to_string())
        .execute(&self.pool)
        .await?;

        if res.rows_affected() == 0 {
            // Either the row is gone or it is no longer in `from`.
            return match self.fetch_session(id).await? {
                Some(current) => Err(CoordinatorError::InvalidTransition {
                    from: current.status,
                    to,
                }),
                None => Err(CoordinatorError::SessionNotFound(id.to_string())),
            };
        }

        self.fetch_session(id)
            .await?
            .ok_or_else(|| CoordinatorError::SessionNotFound(id.to_string()))
    }

    // -------------------------------------------------------------------------
    // Ratings
    // -------------------------------------------------------------------------

    pub async fn rating_exists(
        &self,
        teacher_id: &str,
        student_id: &str,
        session_id: &str,
    ) -> Result<bool> {
        let row = sqlx::query(
            r#"
            SELECT id FROM teacher_ratings
            WHERE teacher_id = ? AND student_id = ? AND session_id = ?
            "#,
        )
        .bind(teacher_id)
        .bind(student_id)
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.is_some())
    }

    /// Insert a rating. The (teacher, student, session) unique constraint
    /// turns a duplicate submission into `AlreadyRated`.
    pub async fn insert_rating(&self, rating: &Rating) -> Result<()> {
        let res = sqlx::query(
            r#"
            INSERT INTO teacher_ratings
                (id, teacher_id, student_id, session_id, rating, feedback, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&rating.id)
        .bind(&rating.teacher_id)
        .bind(&rating.student_id)
        .bind(&rating.session_id)
        .bind(rating.rating as i64)
        .bind(&rating.feedback)
        .bind(rating.created_at)
        .execute(&self.pool)
        .await;

        match res {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(CoordinatorError::AlreadyRated),
            Err(e) => Err(e.into()),
        }
    }

    // -------------------------------------------------------------------------
    // Payments
    // -------------------------------------------------------------------------

    pub async fn record_payment(
        &self,
        id: &str,
        student_id: &str,
        tutor_id: i64,
        amount: f64,
        currency: &str,
        order_id: &str,
        payment_id: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO payments
                (id, student_id, tutor_id, amount, currency, order_id, payment_id, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, 'completed', ?)
            "#,
        )
        .bind(id)
        .bind(student_id)
        .bind(tutor_id)
        .bind(amount)
        .bind(currency)
        .bind(order_id)
        .bind(payment_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Remove a payment row again after a failed follow-up write.
    pub async fn delete_payment(&self, payment_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM payments WHERE payment_id = ?")
            .bind(payment_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

// -----------------------------------------------------------------------------
// Row mapping
// -----------------------------------------------------------------------------

fn profile_from_row(row: &SqliteRow) -> std::result::Result<Profile, sqlx::Error> {
    let user_type: String = row.try_get("user_type")?;
    let verification_status: Option<String> = row.try_get("verification_status")?;

    Ok(Profile {
        id: row.try_get("id")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        user_type: user_type.parse().map_err(decode_err)?,
        tutor_id: row.try_get("tutor_id")?,
        subject: row.try_get("subject")?,
        email: row.try_get("email")?,
        avatar_url: row.try_get("avatar_url")?,
        verification_status: verification_status
            .map(|s| s.parse().map_err(decode_err))
            .transpose()?,
    })
}

fn assignment_from_row(row: &SqliteRow) -> std::result::Result<Assignment, sqlx::Error> {
    Ok(Assignment {
        id: row.try_get("id")?,
        student_id: row.try_get("student_id")?,
        tutor_id: row.try_get("tutor_id")?,
        status: row.try_get("status")?,
        created_at: row.try_get("created_at")?,
    })
}

fn message_from_row(row: &SqliteRow) -> std::result::Result<Message, sqlx::Error> {
    let sender: String = row.try_get("sender_role")?;

    Ok(Message {
        id: row.try_get("id")?,
        student_id: row.try_get("student_id")?,
        tutor_id: row.try_get("tutor_id")?,
        sender: sender.parse().map_err(decode_err)?,
        content: row.try_get("content")?,
        file_url: row.try_get("file_url")?,
        created_at: row.try_get("created_at")?,
    })
}

fn session_from_row(row: &SqliteRow) -> std::result::Result<ScheduledSession, sqlx::Error> {
    let status: String = row.try_get("status")?;

    Ok(ScheduledSession {
        id: row.try_get("id")?,
        student_id: row.try_get("student_id")?,
        tutor_id: row.try_get("tutor_id")?,
        title: row.try_get("title")?,
        start_time: row.try_get("start_time")?,
        end_time: row.try_get("end_time")?,
        status: status.parse().map_err(decode_err)?,
        meeting_link: row.try_get("meeting_link")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn conversation() -> Conversation {
        Conversation {
            tutor_id: 7,
            student_id: "s1".into(),
            teacher_id: "t1".into(),
            viewer_role: SenderRole::Teacher,
        }
    }

    fn session(id: &str, status: SessionStatus, start: DateTime<Utc>) -> ScheduledSession {
        ScheduledSession {
            id: id.into(),
            student_id: "s1".into(),
            tutor_id: 7,
            title: "Calculus".into(),
            start_time: start,
            end_time: start + Duration::minutes(60),
            status,
            meeting_link: None,
        }
    }

    #[tokio::test]
    async fn messages_come_back_in_creation_order() {
        let store = Store::in_memory().await.unwrap();
        let conv = conversation();

        let a = store
            .insert_message(&conv, SenderRole::Teacher, "first", None)
            .await
            .unwrap();
        let b = store
            .insert_message(&conv, SenderRole::Student, "second", None)
            .await
            .unwrap();

        let messages = store.fetch_messages(7, "s1").await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id, a.id);
        assert_eq!(messages[1].id, b.id);
        assert_eq!(messages[1].sender, SenderRole::Student);
    }

    #[tokio::test]
    async fn messages_are_filtered_by_pair() {
        let store = Store::in_memory().await.unwrap();
        let conv = conversation();
        store
            .insert_message(&conv, SenderRole::Teacher, "hello", None)
            .await
            .unwrap();

        assert!(store.fetch_messages(7, "someone-else").await.unwrap().is_empty());
        assert!(store.fetch_messages(8, "s1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_idempotency_key_is_rejected() {
        let store = Store::in_memory().await.unwrap();
        let start = Utc::now() + Duration::hours(1);

        store
            .insert_session(&session("a", SessionStatus::Scheduled, start), "key-1")
            .await
            .unwrap();

        let err = store
            .insert_session(&session("b", SessionStatus::Scheduled, start), "key-1")
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::DuplicateBooking));
    }

    #[tokio::test]
    async fn guarded_transition_runs_at_most_once() {
        let store = Store::in_memory().await.unwrap();
        let start = Utc::now() - Duration::minutes(5);
        store
            .insert_session(&session("a", SessionStatus::Scheduled, start), "key-1")
            .await
            .unwrap();

        let started = store
            .transition_session("a", SessionStatus::Scheduled, SessionStatus::InProgress, Some("https://meet.example/room"))
            .await
            .unwrap();
        assert_eq!(started.status, SessionStatus::InProgress);
        assert_eq!(started.meeting_link.as_deref(), Some("https://meet.example/room"));

        // A second writer attempting the same transition loses.
        let err = store
            .transition_session("a", SessionStatus::Scheduled, SessionStatus::InProgress, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn illegal_transition_is_rejected_without_touching_the_row() {
        let store = Store::in_memory().await.unwrap();
        let start = Utc::now() - Duration::hours(2);
        let mut s = session("a", SessionStatus::Completed, start);
        s.meeting_link = Some("https://meet.example/room".into());
        store.insert_session(&s, "key-1").await.unwrap();

        let err = store
            .transition_session("a", SessionStatus::Completed, SessionStatus::Scheduled, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::InvalidTransition { .. }));

        let current = store.fetch_session("a").await.unwrap().unwrap();
        assert_eq!(current.status, SessionStatus::Completed);
    }

    #[tokio::test]
    async fn duplicate_rating_maps_to_already_rated() {
        let store = Store::in_memory().await.unwrap();
        let rating = Rating {
            id: "r1".into(),
            teacher_id: "t1".into(),
            student_id: "s1".into(),
            session_id: "a".into(),
            rating: 5,
            feedback: None,
            created_at: Utc::now(),
        };
        store.insert_rating(&rating).await.unwrap();

        let dup = Rating {
            id: "r2".into(),
            feedback: Some("great".into()),
            ..rating
        };
        let err = store.insert_rating(&dup).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::AlreadyRated));
        assert!(store.rating_exists("t1", "s1", "a").await.unwrap());
    }

    #[tokio::test]
    async fn due_and_upcoming_queries_split_on_now() {
        let store = Store::in_memory().await.unwrap();
        let now = Utc::now();
        store
            .insert_session(&session("past", SessionStatus::Scheduled, now - Duration::minutes(5)), "k1")
            .await
            .unwrap();
        store
            .insert_session(&session("future", SessionStatus::Scheduled, now + Duration::hours(1)), "k2")
            .await
            .unwrap();

        let due = store.due_scheduled_session(7, "s1", now).await.unwrap().unwrap();
        assert_eq!(due.id, "past");

        let upcoming = store.next_upcoming_session(7, "s1", now).await.unwrap().unwrap();
        assert_eq!(upcoming.id, "future");
    }
}

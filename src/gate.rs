use crate::{
    chat::Conversation,
    entity::{Profile, UserType},
    error::{CoordinatorError, Result},
    store::Store,
};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Where a denied viewer is sent back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Redirect {
    Login,
    TeacherDashboard,
    TutorSearch,
}

impl Redirect {
    pub fn path(self) -> &'static str {
        match self {
            Redirect::Login => "/login",
            Redirect::TeacherDashboard => "/teacher-dashboard",
            Redirect::TutorSearch => "/search",
        }
    }
}

/// Route parameters of a chat screen: the tutor id is in the path, the
/// student id (teacher mode only) in the query string.
#[derive(Debug, Clone, Deserialize)]
pub struct RouteParams {
    pub tutor_id: i64,
    pub student_id: Option<String>,
}

/// Decides whether the viewer may enter a conversation. A single check gates
/// the whole screen lifetime; it is not re-run per message.
#[derive(Clone)]
pub struct AccessGate {
    store: Store,
}

impl AccessGate {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Resolve the conversation the viewer is entitled to, or deny with a
    /// redirect target and a user-visible reason.
    pub async fn authorize(
        &self,
        viewer: Option<&Profile>,
        route: &RouteParams,
    ) -> Result<Conversation> {
        let viewer = viewer.ok_or(CoordinatorError::Unauthenticated)?;

        match viewer.user_type {
            UserType::Teacher => self.authorize_teacher(viewer, route).await,
            UserType::Student => self.authorize_student(viewer, route).await,
        }
    }

    /// Teacher mode: the viewer's own tutor id must match the route, and an
    /// active assignment must link that tutor to the given student.
    async fn authorize_teacher(&self, viewer: &Profile, route: &RouteParams) -> Result<Conversation> {
        let own_tutor_id = viewer.tutor_id.filter(|id| *id == route.tutor_id);
        if own_tutor_id.is_none() {
            return Err(denied(
                Redirect::TeacherDashboard,
                "You can only chat with students assigned to you.",
            ));
        }

        let student_id = match &route.student_id {
            Some(id) => id.clone(),
            None => {
                return Err(denied(
                    Redirect::TeacherDashboard,
                    "Student ID is required to chat.",
                ))
            }
        };

        let assignment = self.store.active_assignment(route.tutor_id, &student_id).await?;
        if assignment.is_none() {
            info!(tutor_id = route.tutor_id, %student_id, "chat entry denied: no active assignment");
            return Err(denied(
                Redirect::TeacherDashboard,
                "This student is not assigned to you.",
            ));
        }

        Ok(Conversation {
            tutor_id: route.tutor_id,
            student_id,
            teacher_id: viewer.id.clone(),
            viewer_role: viewer.user_type.role(),
        })
    }

    /// Student mode: the viewer must hold at least one active assignment
    /// whose tutor id matches the route.
    async fn authorize_student(&self, viewer: &Profile, route: &RouteParams) -> Result<Conversation> {
        let assignments = self.store.active_assignments_for_student(&viewer.id).await?;
        let assigned = assignments.iter().any(|a| a.tutor_id == route.tutor_id);
        if !assigned {
            info!(tutor_id = route.tutor_id, student_id = %viewer.id, "chat entry denied: tutor not booked");
            return Err(denied(
                Redirect::TutorSearch,
                "You need to book this tutor first",
            ));
        }

        let teacher = self
            .store
            .fetch_teacher_by_tutor_id(route.tutor_id)
            .await?
            .ok_or_else(|| denied(Redirect::TutorSearch, "Tutor not found."))?;

        Ok(Conversation {
            tutor_id: route.tutor_id,
            student_id: viewer.id.clone(),
            teacher_id: teacher.id,
            viewer_role: viewer.user_type.role(),
        })
    }
}

fn denied(redirect: Redirect, reason: &str) -> CoordinatorError {
    CoordinatorError::AccessDenied {
        redirect,
        reason: reason.to_string(),
    }
}

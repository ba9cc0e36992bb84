use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{
        sse::{Event as SseEvent, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream::Stream;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::broadcast;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use tracing::info;

use crate::{
    attachments::{validate_demo, LocalBucket, TEACHING_DEMOS_BUCKET},
    bus::EventBus,
    entity::VerificationStatus,
    error::CoordinatorError,
    gate::RouteParams,
    manager::{Attachment, Manager, RatingSubmission, RoomKey},
    payments::{CheckoutRequest, PaymentsClient},
    schedule::BookingRequest,
    store::Store,
};

// -----------------------------------------------------------------------------
// Server state & error mapping
// -----------------------------------------------------------------------------

pub struct ApiState {
    pub manager: Arc<Manager>,
    pub store: Store,
    pub bus: Arc<EventBus>,
    pub files: Arc<LocalBucket>,
    pub payments: Option<PaymentsClient>,
}

pub enum ApiError {
    Coordinator(CoordinatorError),
    PaymentsDisabled,
}

impl From<CoordinatorError> for ApiError {
    fn from(e: CoordinatorError) -> Self {
        ApiError::Coordinator(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, redirect, message) = match &self {
            ApiError::PaymentsDisabled => (
                StatusCode::SERVICE_UNAVAILABLE,
                None,
                "Payments are not configured on this server.".to_string(),
            ),
            ApiError::Coordinator(e) => {
                let status = match e {
                    CoordinatorError::Unauthenticated => StatusCode::UNAUTHORIZED,
                    CoordinatorError::AccessDenied { .. } => StatusCode::FORBIDDEN,
                    CoordinatorError::NotEntered
                    | CoordinatorError::InvalidTransition { .. }
                    | CoordinatorError::DuplicateBooking
                    | CoordinatorError::AlreadyRated => StatusCode::CONFLICT,
                    CoordinatorError::Validation(_) | CoordinatorError::Attachment(_) => {
                        StatusCode::UNPROCESSABLE_ENTITY
                    }
                    CoordinatorError::SessionNotFound(_) | CoordinatorError::ProfileNotFound(_) => {
                        StatusCode::NOT_FOUND
                    }
                    CoordinatorError::PaymentRejected => StatusCode::PAYMENT_REQUIRED,
                    CoordinatorError::Gateway(_) => StatusCode::BAD_GATEWAY,
                    CoordinatorError::Database(_) | CoordinatorError::Storage(_) => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                let redirect = match e {
                    CoordinatorError::Unauthenticated => Some("/login"),
                    CoordinatorError::AccessDenied { redirect, .. } => Some(redirect.path()),
                    _ => None,
                };
                (status, redirect, e.to_string())
            }
        };

        let body = Json(json!({
            "error": message,
            "redirect": redirect,
        }));
        (status, body).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// The viewer's profile id, carried in a header by the front end once the
/// identity provider has authenticated them.
fn viewer_id(headers: &HeaderMap) -> ApiResult<String> {
    headers
        .get("x-profile-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or(ApiError::Coordinator(CoordinatorError::Unauthenticated))
}

#[derive(Debug, Deserialize)]
struct ChatQuery {
    /// Student id, required when the viewer is the teacher.
    student: Option<String>,
}

/// Students chat under their own id; teachers name the student in the query.
fn room_key(viewer: &str, tutor_id: i64, query: &ChatQuery) -> RoomKey {
    RoomKey {
        viewer_id: viewer.to_string(),
        tutor_id,
        student_id: query.student.clone().unwrap_or_else(|| viewer.to_string()),
    }
}

// -----------------------------------------------------------------------------
// Router
// -----------------------------------------------------------------------------

pub struct ApiServer {
    state: Arc<ApiState>,
}

impl ApiServer {
    pub fn new(
        manager: Arc<Manager>,
        store: Store,
        bus: Arc<EventBus>,
        files: Arc<LocalBucket>,
        payments: Option<PaymentsClient>,
    ) -> Self {
        Self {
            state: Arc::new(ApiState {
                manager,
                store,
                bus,
                files,
                payments,
            }),
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/chat/:tutor_id/enter", post(enter_chat))
            .route("/chat/:tutor_id/leave", post(leave_chat))
            .route("/chat/:tutor_id/messages", get(list_messages).post(send_message))
            .route("/chat/:tutor_id/attachments", post(send_attachment))
            .route("/chat/:tutor_id/feed", get(feed))
            .route("/chat/:tutor_id/sessions", post(schedule_session))
            .route("/chat/:tutor_id/sessions/:session_id/end", post(end_session))
            .route("/chat/:tutor_id/call", post(launch_call))
            .route("/ratings", post(submit_rating))
            .route("/checkout/order", post(create_order))
            .route("/checkout/complete", post(complete_checkout))
            .route("/teachers/demo", post(upload_demo))
            .nest_service("/files", ServeDir::new(self.state.files.root()))
            .with_state(self.state.clone())
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
    }
}

// -----------------------------------------------------------------------------
// Chat room
// -----------------------------------------------------------------------------

async fn enter_chat(
    State(state): State<Arc<ApiState>>,
    Path(tutor_id): Path<i64>,
    Query(query): Query<ChatQuery>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    let viewer = viewer_id(&headers)?;
    let snapshot = state
        .manager
        .enter(
            &viewer,
            RouteParams {
                tutor_id,
                student_id: query.student.clone(),
            },
        )
        .await?;
    Ok(Json(snapshot))
}

async fn leave_chat(
    State(state): State<Arc<ApiState>>,
    Path(tutor_id): Path<i64>,
    Query(query): Query<ChatQuery>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    let viewer = viewer_id(&headers)?;
    state.manager.leave(&room_key(&viewer, tutor_id, &query));
    Ok(StatusCode::NO_CONTENT)
}

async fn list_messages(
    State(state): State<Arc<ApiState>>,
    Path(tutor_id): Path<i64>,
    Query(query): Query<ChatQuery>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    let viewer = viewer_id(&headers)?;
    let entries = state
        .manager
        .timeline_entries(&room_key(&viewer, tutor_id, &query))?;
    Ok(Json(entries))
}

#[derive(Debug, Deserialize)]
struct SendMessageBody {
    content: String,
}

async fn send_message(
    State(state): State<Arc<ApiState>>,
    Path(tutor_id): Path<i64>,
    Query(query): Query<ChatQuery>,
    headers: HeaderMap,
    Json(body): Json<SendMessageBody>,
) -> ApiResult<impl IntoResponse> {
    let viewer = viewer_id(&headers)?;
    let message = state
        .manager
        .send_message(&room_key(&viewer, tutor_id, &query), &body.content, None)
        .await?;
    Ok(Json(message))
}

#[derive(Debug, Deserialize)]
struct AttachmentQuery {
    student: Option<String>,
    file_name: String,
    content_type: String,
    /// Optional text accompanying the attachment.
    content: Option<String>,
}

async fn send_attachment(
    State(state): State<Arc<ApiState>>,
    Path(tutor_id): Path<i64>,
    Query(query): Query<AttachmentQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let viewer = viewer_id(&headers)?;
    let key = room_key(
        &viewer,
        tutor_id,
        &ChatQuery {
            student: query.student.clone(),
        },
    );
    let message = state
        .manager
        .send_message(
            &key,
            query.content.as_deref().unwrap_or_default(),
            Some(Attachment {
                file_name: query.file_name,
                content_type: query.content_type,
                bytes: body.to_vec(),
            }),
        )
        .await?;
    Ok(Json(message))
}

/// The realtime feed for one entered room, filtered server-side to that
/// room's (tutor, student) pair. Subscribing requires the same entry the
/// message endpoints do; the gate check made at entry covers the stream.
async fn feed(
    State(state): State<Arc<ApiState>>,
    Path(tutor_id): Path<i64>,
    Query(query): Query<ChatQuery>,
    headers: HeaderMap,
) -> ApiResult<Sse<impl Stream<Item = Result<SseEvent, axum::BoxError>>>> {
    let viewer = viewer_id(&headers)?;
    let key = room_key(&viewer, tutor_id, &query);
    if !state.manager.has_room(&key) {
        return Err(CoordinatorError::NotEntered.into());
    }

    info!(tutor_id, "new feed subscription");
    let student = key.student_id;
    let mut rx = state.bus.subscribe();

    let stream = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if event.tutor_id() != Some(tutor_id) {
                        continue;
                    }
                    if event.student_id().is_some_and(|s| s != student) {
                        continue;
                    }
                    if let Ok(data) = serde_json::to_string(&event) {
                        yield Ok(SseEvent::default().data(data));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    // A slow consumer missed events; keep going.
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

// -----------------------------------------------------------------------------
// Sessions & ratings
// -----------------------------------------------------------------------------

async fn schedule_session(
    State(state): State<Arc<ApiState>>,
    Path(tutor_id): Path<i64>,
    Query(query): Query<ChatQuery>,
    headers: HeaderMap,
    Json(body): Json<BookingRequest>,
) -> ApiResult<impl IntoResponse> {
    let viewer = viewer_id(&headers)?;
    let session = state
        .manager
        .schedule_session(&room_key(&viewer, tutor_id, &query), &body)
        .await?;
    Ok((StatusCode::CREATED, Json(session)))
}

async fn end_session(
    State(state): State<Arc<ApiState>>,
    Path((tutor_id, session_id)): Path<(i64, String)>,
    Query(query): Query<ChatQuery>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    let viewer = viewer_id(&headers)?;
    let prompt = state
        .manager
        .end_session(&room_key(&viewer, tutor_id, &query), &session_id)
        .await?;
    Ok(Json(json!({ "rating_prompt": prompt })))
}

async fn launch_call(
    State(state): State<Arc<ApiState>>,
    Path(tutor_id): Path<i64>,
    Query(query): Query<ChatQuery>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    let viewer = viewer_id(&headers)?;
    let url = state
        .manager
        .launch_call(&room_key(&viewer, tutor_id, &query))
        .await?;
    Ok(Json(json!({ "url": url })))
}

async fn submit_rating(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<RatingSubmission>,
) -> ApiResult<impl IntoResponse> {
    let outcome = state.manager.submit_rating(&body).await?;
    Ok(Json(outcome))
}

// -----------------------------------------------------------------------------
// Payments
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CreateOrderBody {
    amount: i64,
    currency: String,
    receipt: String,
}

async fn create_order(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<CreateOrderBody>,
) -> ApiResult<impl IntoResponse> {
    let payments = state.payments.as_ref().ok_or(ApiError::PaymentsDisabled)?;
    let order = payments
        .create_order(body.amount, &body.currency, &body.receipt)
        .await?;
    Ok(Json(order))
}

async fn complete_checkout(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<CheckoutRequest>,
) -> ApiResult<impl IntoResponse> {
    let payments = state.payments.as_ref().ok_or(ApiError::PaymentsDisabled)?;
    let assignment = payments.complete_checkout(&body).await?;
    Ok((StatusCode::CREATED, Json(assignment)))
}

// -----------------------------------------------------------------------------
// Teacher verification demo
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct DemoQuery {
    file_name: String,
    content_type: String,
}

/// Upload a teaching-demo video and move the teacher into the
/// pending-verification state.
async fn upload_demo(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<DemoQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let viewer = viewer_id(&headers)?;
    validate_demo(&query.content_type, body.len() as u64)?;

    let mut profile = state
        .store
        .fetch_profile(&viewer)
        .await?
        .ok_or(CoordinatorError::ProfileNotFound(viewer.clone()))?;

    let video_url = state
        .files
        .upload(TEACHING_DEMOS_BUCKET, &viewer, &query.file_name, &body)
        .await?;

    profile.verification_status = Some(VerificationStatus::PendingVerification);
    state.store.upsert_profile(&profile).await?;

    Ok(Json(json!({ "video_url": video_url })))
}

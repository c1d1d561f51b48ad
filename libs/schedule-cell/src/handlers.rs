use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use axum_extra::TypedHeader;
use headers::{authorization::Bearer, Authorization};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::{Session, User};
use shared_models::error::AppError;
use shared_models::response::{created, ok};

use crate::models::{
    CancellationRequest, ConflictCheckRequest, CreateModificationRequest, CreateScheduleRequest,
    DecisionRequest, ScheduleRangeQuery, StatusFilter, UpdateModificationRequest,
    UpdateScheduleRequest,
};
use crate::services::{
    lifecycle::{ModificationAction, ScheduleAction},
    modification::ModificationService,
    schedule::ScheduleService,
    schedule_request::ScheduleRequestService,
};

type Envelope = (StatusCode, Json<Value>);

// ==============================================================================
// SCHEDULE REQUEST HANDLERS (DOCTOR)
// ==============================================================================

#[axum::debug_handler]
pub async fn create_schedule_request(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateScheduleRequest>,
) -> Result<Envelope, AppError> {
    let session = Session::new(&user, auth.token());
    let service = ScheduleRequestService::new(&state);

    let schedule_request = service.create_request(request, &session).await?;

    Ok(created("Schedule request submitted for approval", schedule_request))
}

#[axum::debug_handler]
pub async fn update_schedule_request(
    State(state): State<Arc<AppConfig>>,
    Path(request_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(update): Json<UpdateScheduleRequest>,
) -> Result<Envelope, AppError> {
    let session = Session::new(&user, auth.token());
    let service = ScheduleRequestService::new(&state);

    let schedule_request = service.update_request(request_id, update, &session).await?;

    Ok(ok("Schedule request updated", schedule_request))
}

#[axum::debug_handler]
pub async fn cancel_schedule_request(
    State(state): State<Arc<AppConfig>>,
    Path((doctor_id, request_id)): Path<(Uuid, Uuid)>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Envelope, AppError> {
    let session = Session::new(&user, auth.token());
    let service = ScheduleRequestService::new(&state);

    let deleted = service.delete_request(doctor_id, request_id, &session).await?;

    Ok(ok("Schedule request cancelled", deleted))
}

#[axum::debug_handler]
pub async fn get_doctor_schedule_requests(
    State(state): State<Arc<AppConfig>>,
    Path(doctor_id): Path<Uuid>,
    Query(filter): Query<StatusFilter>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Envelope, AppError> {
    let session = Session::new(&user, auth.token());
    let service = ScheduleRequestService::new(&state);

    let requests = service.list_doctor_requests(doctor_id, filter.status, &session).await?;

    Ok(ok("Schedule requests retrieved", requests))
}

#[axum::debug_handler]
pub async fn request_schedule_cancellation(
    State(state): State<Arc<AppConfig>>,
    Path(request_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(cancellation): Json<CancellationRequest>,
) -> Result<Envelope, AppError> {
    let session = Session::new(&user, auth.token());
    let service = ScheduleRequestService::new(&state);

    let schedule_request = service.request_cancellation(request_id, cancellation, &session).await?;

    Ok(ok("Cancellation requested", schedule_request))
}

#[axum::debug_handler]
pub async fn check_schedule_conflicts(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<ConflictCheckRequest>,
) -> Result<Envelope, AppError> {
    let session = Session::new(&user, auth.token());
    let service = ScheduleRequestService::new(&state);

    let conflicts = service.check_conflicts(request, &session).await?;
    let message = if conflicts.is_empty() {
        "No conflicts found"
    } else {
        "Proposed schedule conflicts with existing schedules"
    };

    Ok(ok(message, json!({
        "has_conflicts": !conflicts.is_empty(),
        "buffer_minutes": state.conflict_buffer_minutes,
        "conflicts": conflicts
    })))
}

// ==============================================================================
// SCHEDULE REQUEST HANDLERS (BRANCH ADMIN)
// ==============================================================================

#[axum::debug_handler]
pub async fn get_branch_schedule_requests(
    State(state): State<Arc<AppConfig>>,
    Path(branch_id): Path<Uuid>,
    Query(filter): Query<StatusFilter>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Envelope, AppError> {
    let session = Session::new(&user, auth.token());
    let service = ScheduleRequestService::new(&state);

    let requests = service.list_branch_requests(branch_id, filter.status, &session).await?;

    Ok(ok("Branch schedule requests retrieved", requests))
}

#[axum::debug_handler]
pub async fn get_branch_request_summary(
    State(state): State<Arc<AppConfig>>,
    Path(branch_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Envelope, AppError> {
    let session = Session::new(&user, auth.token());
    let service = ScheduleRequestService::new(&state);

    let summary = service.summarize_branch(branch_id, &session).await?;

    Ok(ok("Branch schedule request summary retrieved", summary))
}

/// Decision bodies are optional; notes are only required to reject or send back.
fn approval_notes(decision: Option<Json<DecisionRequest>>) -> Option<String> {
    decision.and_then(|Json(decision)| decision.approval_notes)
}

async fn decide_schedule_request(
    state: &AppConfig,
    request_id: Uuid,
    session: &Session,
    decision: Option<Json<DecisionRequest>>,
    action: ScheduleAction,
    message: &str,
) -> Result<Envelope, AppError> {
    let service = ScheduleRequestService::new(state);
    let schedule_request = service.decide(request_id, action, approval_notes(decision), session).await?;
    Ok(ok(message, schedule_request))
}

#[axum::debug_handler]
pub async fn approve_schedule_request(
    State(state): State<Arc<AppConfig>>,
    Path(request_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    decision: Option<Json<DecisionRequest>>,
) -> Result<Envelope, AppError> {
    let session = Session::new(&user, auth.token());
    decide_schedule_request(&state, request_id, &session, decision, ScheduleAction::Approve, "Schedule request approved").await
}

#[axum::debug_handler]
pub async fn reject_schedule_request(
    State(state): State<Arc<AppConfig>>,
    Path(request_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    decision: Option<Json<DecisionRequest>>,
) -> Result<Envelope, AppError> {
    let session = Session::new(&user, auth.token());
    decide_schedule_request(&state, request_id, &session, decision, ScheduleAction::Reject, "Schedule request rejected").await
}

#[axum::debug_handler]
pub async fn request_schedule_revision(
    State(state): State<Arc<AppConfig>>,
    Path(request_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    decision: Option<Json<DecisionRequest>>,
) -> Result<Envelope, AppError> {
    let session = Session::new(&user, auth.token());
    decide_schedule_request(&state, request_id, &session, decision, ScheduleAction::RequestRevision, "Revision requested").await
}

#[axum::debug_handler]
pub async fn approve_schedule_cancellation(
    State(state): State<Arc<AppConfig>>,
    Path(request_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    decision: Option<Json<DecisionRequest>>,
) -> Result<Envelope, AppError> {
    let session = Session::new(&user, auth.token());
    decide_schedule_request(&state, request_id, &session, decision, ScheduleAction::ApproveCancellation, "Schedule cancelled").await
}

#[axum::debug_handler]
pub async fn reject_schedule_cancellation(
    State(state): State<Arc<AppConfig>>,
    Path(request_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    decision: Option<Json<DecisionRequest>>,
) -> Result<Envelope, AppError> {
    let session = Session::new(&user, auth.token());
    decide_schedule_request(&state, request_id, &session, decision, ScheduleAction::RejectCancellation, "Cancellation rejected, schedule remains approved").await
}

// ==============================================================================
// MODIFICATION REQUEST HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn create_modification_request(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateModificationRequest>,
) -> Result<Envelope, AppError> {
    let session = Session::new(&user, auth.token());
    let service = ModificationService::new(&state);

    let modification = service.create_modification(request, &session).await?;

    Ok(created("Modification request submitted for approval", modification))
}

#[axum::debug_handler]
pub async fn update_modification_request(
    State(state): State<Arc<AppConfig>>,
    Path(modification_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(update): Json<UpdateModificationRequest>,
) -> Result<Envelope, AppError> {
    let session = Session::new(&user, auth.token());
    let service = ModificationService::new(&state);

    let modification = service.update_modification(modification_id, update, &session).await?;

    Ok(ok("Modification request updated", modification))
}

#[axum::debug_handler]
pub async fn delete_modification_request(
    State(state): State<Arc<AppConfig>>,
    Path(modification_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Envelope, AppError> {
    let session = Session::new(&user, auth.token());
    let service = ModificationService::new(&state);

    let modification = service.delete_modification(modification_id, &session).await?;

    Ok(ok("Modification request withdrawn", modification))
}

#[axum::debug_handler]
pub async fn get_doctor_modification_requests(
    State(state): State<Arc<AppConfig>>,
    Path(doctor_id): Path<Uuid>,
    Query(filter): Query<StatusFilter>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Envelope, AppError> {
    let session = Session::new(&user, auth.token());
    let service = ModificationService::new(&state);

    let modifications = service.list_doctor_modifications(doctor_id, filter.status, &session).await?;

    Ok(ok("Modification requests retrieved", modifications))
}

#[axum::debug_handler]
pub async fn get_branch_modification_requests(
    State(state): State<Arc<AppConfig>>,
    Path(branch_id): Path<Uuid>,
    Query(filter): Query<StatusFilter>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Envelope, AppError> {
    let session = Session::new(&user, auth.token());
    let service = ModificationService::new(&state);

    let modifications = service.list_branch_modifications(branch_id, filter.status, &session).await?;

    Ok(ok("Branch modification requests retrieved", modifications))
}

#[axum::debug_handler]
pub async fn approve_modification_request(
    State(state): State<Arc<AppConfig>>,
    Path(modification_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    decision: Option<Json<DecisionRequest>>,
) -> Result<Envelope, AppError> {
    let session = Session::new(&user, auth.token());
    let service = ModificationService::new(&state);

    let modification = service
        .decide(modification_id, ModificationAction::Approve, approval_notes(decision), &session)
        .await?;

    Ok(ok("Modification request approved", modification))
}

#[axum::debug_handler]
pub async fn reject_modification_request(
    State(state): State<Arc<AppConfig>>,
    Path(modification_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    decision: Option<Json<DecisionRequest>>,
) -> Result<Envelope, AppError> {
    let session = Session::new(&user, auth.token());
    let service = ModificationService::new(&state);

    let modification = service
        .decide(modification_id, ModificationAction::Reject, approval_notes(decision), &session)
        .await?;

    Ok(ok("Modification request rejected", modification))
}

// ==============================================================================
// DATED SCHEDULE HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn get_doctor_schedules(
    State(state): State<Arc<AppConfig>>,
    Path(doctor_id): Path<Uuid>,
    Query(range): Query<ScheduleRangeQuery>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Envelope, AppError> {
    let session = Session::new(&user, auth.token());
    let service = ScheduleService::new(&state);

    let schedules = service.list_for_doctor(doctor_id, range, &session).await?;

    Ok(ok("Schedules retrieved", schedules))
}

#[axum::debug_handler]
pub async fn get_branch_schedules(
    State(state): State<Arc<AppConfig>>,
    Path(branch_id): Path<Uuid>,
    Query(range): Query<ScheduleRangeQuery>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Envelope, AppError> {
    let session = Session::new(&user, auth.token());
    let service = ScheduleService::new(&state);

    let schedules = service.list_for_branch(branch_id, range, &session).await?;

    Ok(ok("Branch schedules retrieved", schedules))
}

use std::sync::Arc;

use axum::{
    Router,
    routing::{delete, get, post, put},
    middleware,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;

pub fn schedule_routes(state: Arc<AppConfig>) -> Router {
    // Every schedule route acts on behalf of an authenticated doctor or admin
    let request_routes = Router::new()
        // Doctor side of the weekly schedule request workflow
        .route("/doctor-create-schedule", post(handlers::create_schedule_request))
        .route("/update-doctor-schedule-request/{request_id}", put(handlers::update_schedule_request))
        .route("/cancel-doctor-schedule-request/{doctor_id}/{request_id}", delete(handlers::cancel_schedule_request))
        .route("/get-doctor-schedule-requests/{doctor_id}", get(handlers::get_doctor_schedule_requests))
        .route(
            "/doctor-schedule-requests/{request_id}/request-cancellation",
            post(handlers::request_schedule_cancellation),
        )
        .route("/schedule-requests/check-conflicts", post(handlers::check_schedule_conflicts))

        // Branch admin decisions
        .route("/branch-schedule-requests/{branch_id}", get(handlers::get_branch_schedule_requests))
        .route("/branch-schedule-requests/{branch_id}/summary", get(handlers::get_branch_request_summary))
        .route("/schedule-requests/{request_id}/approve", post(handlers::approve_schedule_request))
        .route("/schedule-requests/{request_id}/reject", post(handlers::reject_schedule_request))
        .route("/schedule-requests/{request_id}/request-revision", post(handlers::request_schedule_revision))
        .route(
            "/schedule-requests/{request_id}/approve-cancellation",
            post(handlers::approve_schedule_cancellation),
        )
        .route(
            "/schedule-requests/{request_id}/reject-cancellation",
            post(handlers::reject_schedule_cancellation),
        );

    let modification_routes = Router::new()
        .route("/schedule-modifications", post(handlers::create_modification_request))
        .route(
            "/schedule-modifications/{modification_id}",
            put(handlers::update_modification_request).delete(handlers::delete_modification_request),
        )
        .route("/doctor-schedule-modifications/{doctor_id}", get(handlers::get_doctor_modification_requests))
        .route("/branch-schedule-modifications/{branch_id}", get(handlers::get_branch_modification_requests))
        .route("/schedule-modifications/{modification_id}/approve", post(handlers::approve_modification_request))
        .route("/schedule-modifications/{modification_id}/reject", post(handlers::reject_modification_request));

    let schedule_routes = Router::new()
        .route("/doctor-schedules/{doctor_id}", get(handlers::get_doctor_schedules))
        .route("/branch-schedules/{branch_id}", get(handlers::get_branch_schedules));

    Router::new()
        .merge(request_routes)
        .merge(modification_routes)
        .merge(schedule_routes)
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .with_state(state)
}

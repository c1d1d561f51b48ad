use assert_matches::assert_matches;
use chrono::{Datelike, Duration, NaiveDate, NaiveTime, Utc};
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use schedule_cell::models::{
    CancellationRequest, ConflictType, CreateScheduleRequest, RequestStatus, ScheduleDay,
    ScheduleError, UpdateScheduleRequest,
};
use schedule_cell::services::{ScheduleAction, ScheduleRequestService};
use shared_utils::test_utils::{MockSupabaseResponses, TestConfig, TestUser};

const REQUESTS: &str = "/rest/v1/doctor_schedule_requests";
const SCHEDULES: &str = "/rest/v1/doctor_schedules";
const MODIFICATIONS: &str = "/rest/v1/schedule_modification_requests";

fn monday_slot(doctor: &TestUser, branch_id: Uuid, start: NaiveTime, max: i32, per: i32) -> CreateScheduleRequest {
    CreateScheduleRequest {
        doctor_id: doctor.uuid(),
        branch_id,
        schedule_day: ScheduleDay::Monday,
        start_time: start,
        max_patients: max,
        time_per_patient: per,
        reason: Some("Morning clinic".to_string()),
    }
}

fn time(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

fn next_monday() -> NaiveDate {
    let today = Utc::now().date_naive();
    today + Duration::days((7 - today.weekday().num_days_from_monday() as i64) % 7)
}

async fn mount_pending_approval(mock_server: &MockServer, request_id: Uuid, doctor_id: Uuid, branch_id: Uuid) {
    Mock::given(method("GET"))
        .and(path(REQUESTS))
        .and(query_param("id", format!("eq.{}", request_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::schedule_request_row(
                request_id, doctor_id, branch_id, "monday", "09:00:00", "14:00:00", "pending"
            )
        ])))
        .mount(mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path(REQUESTS))
        .and(query_param("doctor_id", format!("eq.{}", doctor_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path(REQUESTS))
        .and(query_param("status", "eq.pending"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::schedule_request_row(
                request_id, doctor_id, branch_id, "monday", "09:00:00", "14:00:00", "approved"
            )
        ])))
        .expect(1)
        .mount(mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path(SCHEDULES))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(mock_server)
        .await;
}

#[tokio::test]
async fn test_create_request_derives_end_time() {
    let mock_server = MockServer::start().await;
    let doctor = TestUser::doctor("doctor@example.com");
    let branch_id = Uuid::new_v4();
    let request_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path(REQUESTS))
        .and(query_param("doctor_id", format!("eq.{}", doctor.id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path(REQUESTS))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            MockSupabaseResponses::schedule_request_row(
                request_id, doctor.uuid(), branch_id, "monday", "09:00:00", "14:00:00", "pending"
            )
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let service = ScheduleRequestService::new(&TestConfig::with_url(&mock_server.uri()).to_app_config());
    let created = service
        .create_request(monday_slot(&doctor, branch_id, time(9, 0), 20, 15), &doctor.session("token"))
        .await
        .unwrap();

    assert_eq!(created.id, request_id);
    assert_eq!(created.status, RequestStatus::Pending);
    assert_eq!(created.end_time, time(14, 0));

    let posted = &mock_server.received_requests().await.unwrap()[1];
    let body: serde_json::Value = serde_json::from_slice(&posted.body).unwrap();
    assert_eq!(body["end_time"], "14:00:00");
    assert_eq!(body["status"], "pending");
}

#[tokio::test]
async fn test_create_request_blocked_by_buffer_conflict() {
    let mock_server = MockServer::start().await;
    let doctor = TestUser::doctor("doctor@example.com");
    let existing_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path(REQUESTS))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::schedule_request_row(
                existing_id, doctor.uuid(), Uuid::new_v4(), "monday", "09:00:00", "14:00:00", "approved"
            )
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path(REQUESTS))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .expect(0)
        .mount(&mock_server)
        .await;

    let service = ScheduleRequestService::new(&TestConfig::with_url(&mock_server.uri()).to_app_config());
    // 14:10 - 18:00 at another branch leaves only 10 minutes after the approved slot.
    let result = service
        .create_request(monday_slot(&doctor, Uuid::new_v4(), time(14, 10), 23, 10), &doctor.session("token"))
        .await;

    let conflicts = assert_matches!(result, Err(ScheduleError::Conflicts(c)) => c);
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].request_id, existing_id);
    assert_eq!(conflicts[0].conflict_type, ConflictType::InsufficientBuffer);
    assert_eq!(conflicts[0].gap_minutes, 10);
}

#[tokio::test]
async fn test_doctor_cannot_submit_for_someone_else() {
    let doctor = TestUser::doctor("doctor@example.com");
    let other = TestUser::doctor("other@example.com");
    let service = ScheduleRequestService::new(&TestConfig::default().to_app_config());

    let result = service
        .create_request(monday_slot(&other, Uuid::new_v4(), time(9, 0), 20, 15), &doctor.session("token"))
        .await;

    assert_matches!(result, Err(ScheduleError::Unauthorized(_)));
}

#[tokio::test]
async fn test_invalid_slot_rejected_before_any_query() {
    let doctor = TestUser::doctor("doctor@example.com");
    let service = ScheduleRequestService::new(&TestConfig::default().to_app_config());

    let result = service
        .create_request(monday_slot(&doctor, Uuid::new_v4(), time(9, 0), 0, 15), &doctor.session("token"))
        .await;

    assert_matches!(result, Err(ScheduleError::ValidationError(_)));
}

#[tokio::test]
async fn test_edit_of_revision_request_resubmits() {
    let mock_server = MockServer::start().await;
    let doctor = TestUser::doctor("doctor@example.com");
    let branch_id = Uuid::new_v4();
    let request_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path(REQUESTS))
        .and(query_param("id", format!("eq.{}", request_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::schedule_request_row(
                request_id, doctor.uuid(), branch_id, "monday", "09:00:00", "14:00:00", "revision_requested"
            )
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path(REQUESTS))
        .and(query_param("doctor_id", format!("eq.{}", doctor.id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path(REQUESTS))
        .and(query_param("id", format!("eq.{}", request_id)))
        .and(query_param("status", "eq.revision_requested"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::schedule_request_row(
                request_id, doctor.uuid(), branch_id, "monday", "10:00:00", "15:00:00", "pending"
            )
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let service = ScheduleRequestService::new(&TestConfig::with_url(&mock_server.uri()).to_app_config());
    let update = UpdateScheduleRequest {
        start_time: Some(time(10, 0)),
        ..UpdateScheduleRequest::default()
    };

    let updated = service.update_request(request_id, update, &doctor.session("token")).await.unwrap();
    assert_eq!(updated.status, RequestStatus::Pending);

    let patch = mock_server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .find(|r| r.method.as_str() == "PATCH")
        .unwrap();
    let body: serde_json::Value = serde_json::from_slice(&patch.body).unwrap();
    assert_eq!(body["status"], "pending");
    assert_eq!(body["start_time"], "10:00:00");
    assert_eq!(body["end_time"], "15:00:00");
}

#[tokio::test]
async fn test_approved_request_cannot_be_deleted() {
    let mock_server = MockServer::start().await;
    let doctor = TestUser::doctor("doctor@example.com");
    let request_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path(REQUESTS))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::schedule_request_row(
                request_id, doctor.uuid(), Uuid::new_v4(), "monday", "09:00:00", "14:00:00", "approved"
            )
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("DELETE"))
        .and(path(REQUESTS))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&mock_server)
        .await;

    let service = ScheduleRequestService::new(&TestConfig::with_url(&mock_server.uri()).to_app_config());
    let result = service.delete_request(doctor.uuid(), request_id, &doctor.session("token")).await;

    assert_matches!(result, Err(ScheduleError::NotEditable(RequestStatus::Approved)));
}

#[tokio::test]
async fn test_cancellation_requires_reason() {
    let doctor = TestUser::doctor("doctor@example.com");
    let service = ScheduleRequestService::new(&TestConfig::default().to_app_config());

    let result = service
        .request_cancellation(
            Uuid::new_v4(),
            CancellationRequest { reason: "  ".to_string() },
            &doctor.session("token"),
        )
        .await;

    assert_matches!(result, Err(ScheduleError::ValidationError(_)));
}

#[tokio::test]
async fn test_approval_materializes_schedules() {
    let mock_server = MockServer::start().await;
    let branch_id = Uuid::new_v4();
    let admin = TestUser::branch_admin("admin@example.com", branch_id);
    let doctor_id = Uuid::new_v4();
    let request_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path(REQUESTS))
        .and(query_param("id", format!("eq.{}", request_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::schedule_request_row(
                request_id, doctor_id, branch_id, "monday", "09:00:00", "14:00:00", "pending"
            )
        ])))
        .mount(&mock_server)
        .await;

    // Conflict re-check only looks at what is already approved.
    Mock::given(method("GET"))
        .and(path(REQUESTS))
        .and(query_param("doctor_id", format!("eq.{}", doctor_id)))
        .and(query_param("status", "in.(approved,pending_cancellation)"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut approved = MockSupabaseResponses::schedule_request_row(
        request_id, doctor_id, branch_id, "monday", "09:00:00", "14:00:00", "approved",
    );
    approved["approval_notes"] = json!("Welcome aboard");

    Mock::given(method("PATCH"))
        .and(path(REQUESTS))
        .and(query_param("status", "eq.pending"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([approved])))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path(SCHEDULES))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path(MODIFICATIONS))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path(SCHEDULES))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            MockSupabaseResponses::schedule_row(Uuid::new_v4(), request_id, doctor_id, branch_id, "2026-10-26")
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let service = ScheduleRequestService::new(&TestConfig::with_url(&mock_server.uri()).to_app_config());
    let decided = service
        .decide(request_id, ScheduleAction::Approve, Some("Welcome aboard".to_string()), &admin.session("token"))
        .await
        .unwrap();

    assert_eq!(decided.status, RequestStatus::Approved);

    let post = mock_server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .find(|r| r.method.as_str() == "POST")
        .unwrap();
    let rows: Vec<serde_json::Value> = serde_json::from_slice(&post.body).unwrap();
    // Four weeks ahead, one Monday each.
    assert_eq!(rows.len(), 4);
    assert!(rows.iter().all(|row| row["available_slots"] == 20 && row["is_cancelled"] == false));
}

#[tokio::test]
async fn test_approval_creates_blocked_dates_cancelled() {
    let mock_server = MockServer::start().await;
    let branch_id = Uuid::new_v4();
    let admin = TestUser::branch_admin("admin@example.com", branch_id);
    let doctor_id = Uuid::new_v4();
    let request_id = Uuid::new_v4();
    let blocked = next_monday();

    mount_pending_approval(&mock_server, request_id, doctor_id, branch_id).await;

    Mock::given(method("GET"))
        .and(path(MODIFICATIONS))
        .and(query_param("doctor_id", format!("eq.{}", doctor_id)))
        .and(query_param("request_type", "in.(block_date,block_schedule)"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::modification_row(
                Uuid::new_v4(), doctor_id, branch_id, "block_date", &blocked.to_string(), "approved"
            )
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path(SCHEDULES))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let service = ScheduleRequestService::new(&TestConfig::with_url(&mock_server.uri()).to_app_config());
    service
        .decide(request_id, ScheduleAction::Approve, None, &admin.session("token"))
        .await
        .unwrap();

    let post = mock_server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .find(|r| r.method.as_str() == "POST")
        .unwrap();
    let rows: Vec<serde_json::Value> = serde_json::from_slice(&post.body).unwrap();

    assert_eq!(rows.len(), 4);
    for row in &rows {
        let on_blocked_day = row["date"] == json!(blocked.to_string());
        assert_eq!(row["is_cancelled"], json!(on_blocked_day), "row {}", row["date"]);
    }
}

#[tokio::test]
async fn test_failed_materialization_reverts_approval() {
    let mock_server = MockServer::start().await;
    let branch_id = Uuid::new_v4();
    let admin = TestUser::branch_admin("admin@example.com", branch_id);
    let doctor_id = Uuid::new_v4();
    let request_id = Uuid::new_v4();

    mount_pending_approval(&mock_server, request_id, doctor_id, branch_id).await;

    Mock::given(method("GET"))
        .and(path(MODIFICATIONS))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path(SCHEDULES))
        .respond_with(ResponseTemplate::new(503).set_body_json(
            MockSupabaseResponses::error_response("Service unavailable", "PGRST000"),
        ))
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path(REQUESTS))
        .and(query_param("status", "eq.approved"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::schedule_request_row(
                request_id, doctor_id, branch_id, "monday", "09:00:00", "14:00:00", "pending"
            )
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let service = ScheduleRequestService::new(&TestConfig::with_url(&mock_server.uri()).to_app_config());
    let result = service
        .decide(request_id, ScheduleAction::Approve, None, &admin.session("token"))
        .await;

    assert_matches!(result, Err(ScheduleError::Upstream(_)));

    let revert = mock_server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.method.as_str() == "PATCH")
        .last()
        .unwrap();
    let body: serde_json::Value = serde_json::from_slice(&revert.body).unwrap();
    assert_eq!(body["status"], "pending");
    assert_eq!(body["approved_at"], serde_json::Value::Null);
}

#[tokio::test]
async fn test_approved_cancellation_cancels_future_schedules() {
    let mock_server = MockServer::start().await;
    let branch_id = Uuid::new_v4();
    let admin = TestUser::branch_admin("admin@example.com", branch_id);
    let doctor_id = Uuid::new_v4();
    let request_id = Uuid::new_v4();
    let today = Utc::now().date_naive().to_string();

    Mock::given(method("GET"))
        .and(path(REQUESTS))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::schedule_request_row(
                request_id, doctor_id, branch_id, "monday", "09:00:00", "14:00:00", "pending_cancellation"
            )
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path(REQUESTS))
        .and(query_param("status", "eq.pending_cancellation"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::schedule_request_row(
                request_id, doctor_id, branch_id, "monday", "09:00:00", "14:00:00", "cancelled"
            )
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path(SCHEDULES))
        .and(query_param("schedule_request_id", format!("eq.{}", request_id)))
        .and(query_param("date", format!("gte.{}", today)))
        .and(query_param("is_cancelled", "eq.false"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::schedule_row(Uuid::new_v4(), request_id, doctor_id, branch_id, &today),
            MockSupabaseResponses::schedule_row(Uuid::new_v4(), request_id, doctor_id, branch_id, &today)
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let service = ScheduleRequestService::new(&TestConfig::with_url(&mock_server.uri()).to_app_config());
    let decided = service
        .decide(request_id, ScheduleAction::ApproveCancellation, None, &admin.session("token"))
        .await
        .unwrap();

    assert_eq!(decided.status, RequestStatus::Cancelled);

    let cancel = mock_server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .find(|r| r.method.as_str() == "PATCH" && r.url.path() == SCHEDULES)
        .unwrap();
    let body: serde_json::Value = serde_json::from_slice(&cancel.body).unwrap();
    assert_eq!(body, json!({ "is_cancelled": true }));
}

#[tokio::test]
async fn test_rejection_requires_notes() {
    let mock_server = MockServer::start().await;
    let branch_id = Uuid::new_v4();
    let admin = TestUser::branch_admin("admin@example.com", branch_id);
    let request_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path(REQUESTS))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::schedule_request_row(
                request_id, Uuid::new_v4(), branch_id, "monday", "09:00:00", "14:00:00", "pending"
            )
        ])))
        .mount(&mock_server)
        .await;

    let service = ScheduleRequestService::new(&TestConfig::with_url(&mock_server.uri()).to_app_config());
    let result = service.decide(request_id, ScheduleAction::Reject, None, &admin.session("token")).await;

    assert_matches!(result, Err(ScheduleError::ValidationError(_)));
}

#[tokio::test]
async fn test_admin_of_other_branch_cannot_decide() {
    let mock_server = MockServer::start().await;
    let admin = TestUser::branch_admin("admin@example.com", Uuid::new_v4());
    let request_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path(REQUESTS))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::schedule_request_row(
                request_id, Uuid::new_v4(), Uuid::new_v4(), "monday", "09:00:00", "14:00:00", "pending"
            )
        ])))
        .mount(&mock_server)
        .await;

    let service = ScheduleRequestService::new(&TestConfig::with_url(&mock_server.uri()).to_app_config());
    let result = service.decide(request_id, ScheduleAction::Approve, None, &admin.session("token")).await;

    assert_matches!(result, Err(ScheduleError::Unauthorized(_)));
}

#[tokio::test]
async fn test_concurrent_change_surfaces_as_stale_state() {
    let mock_server = MockServer::start().await;
    let branch_id = Uuid::new_v4();
    let admin = TestUser::branch_admin("admin@example.com", branch_id);
    let request_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path(REQUESTS))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::schedule_request_row(
                request_id, Uuid::new_v4(), branch_id, "monday", "09:00:00", "14:00:00", "pending"
            )
        ])))
        .mount(&mock_server)
        .await;

    // The row left `pending` between read and write.
    Mock::given(method("PATCH"))
        .and(path(REQUESTS))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    let service = ScheduleRequestService::new(&TestConfig::with_url(&mock_server.uri()).to_app_config());
    let result = service
        .decide(request_id, ScheduleAction::RequestRevision, Some("Shorter slot please".to_string()), &admin.session("token"))
        .await;

    assert_matches!(result, Err(ScheduleError::StaleState));
}

#[tokio::test]
async fn test_terminal_request_cannot_be_approved() {
    let mock_server = MockServer::start().await;
    let branch_id = Uuid::new_v4();
    let admin = TestUser::branch_admin("admin@example.com", branch_id);
    let request_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path(REQUESTS))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::schedule_request_row(
                request_id, Uuid::new_v4(), branch_id, "monday", "09:00:00", "14:00:00", "rejected"
            )
        ])))
        .mount(&mock_server)
        .await;

    let service = ScheduleRequestService::new(&TestConfig::with_url(&mock_server.uri()).to_app_config());
    let result = service.decide(request_id, ScheduleAction::Approve, None, &admin.session("token")).await;

    assert_matches!(
        result,
        Err(ScheduleError::InvalidTransition { from: RequestStatus::Rejected, .. })
    );
}

#[tokio::test]
async fn test_branch_summary_counts_statuses() {
    let mock_server = MockServer::start().await;
    let branch_id = Uuid::new_v4();
    let admin = TestUser::branch_admin("admin@example.com", branch_id);

    Mock::given(method("GET"))
        .and(path(REQUESTS))
        .and(query_param("branch_id", format!("eq.{}", branch_id)))
        .and(query_param("select", "status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "status": "pending" },
            { "status": "pending" },
            { "status": "approved" },
            { "status": "revision_requested" }
        ])))
        .mount(&mock_server)
        .await;

    let service = ScheduleRequestService::new(&TestConfig::with_url(&mock_server.uri()).to_app_config());
    let summary = service.summarize_branch(branch_id, &admin.session("token")).await.unwrap();

    assert_eq!(summary.pending, 2);
    assert_eq!(summary.approved, 1);
    assert_eq!(summary.revision_requested, 1);
    assert_eq!(summary.total, 4);
}

#[tokio::test]
async fn test_branch_summary_fails_on_unknown_status() {
    let mock_server = MockServer::start().await;
    let branch_id = Uuid::new_v4();
    let admin = TestUser::branch_admin("admin@example.com", branch_id);

    Mock::given(method("GET"))
        .and(path(REQUESTS))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "status": "pending" },
            { "status": "archived" }
        ])))
        .mount(&mock_server)
        .await;

    let service = ScheduleRequestService::new(&TestConfig::with_url(&mock_server.uri()).to_app_config());
    let result = service.summarize_branch(branch_id, &admin.session("token")).await;

    assert_matches!(result, Err(ScheduleError::DatabaseError(_)));
}

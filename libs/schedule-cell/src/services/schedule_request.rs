use std::collections::HashSet;

use chrono::Utc;
use reqwest::Method;
use serde_json::{json, Map, Value};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_models::auth::{Role, Session};

use crate::models::{
    derive_end_time, format_time, CancellationRequest, ConflictCheckRequest,
    CreateScheduleRequest, RequestStatus, RequestSummary, ScheduleConflict, ScheduleDay,
    ScheduleError, ScheduleRequest, TimeWindow, UpdateScheduleRequest, MINUTES_PER_DAY,
};
use crate::services::conflict::{ConflictChecker, ConflictScope, ProposedSlot};
use crate::services::lifecycle::{ScheduleAction, ScheduleLifecycleService};
use crate::services::schedule::ScheduleService;

const REQUESTS_PATH: &str = "/rest/v1/doctor_schedule_requests";

pub struct ScheduleRequestService {
    supabase: SupabaseClient,
    checker: ConflictChecker,
    lifecycle: ScheduleLifecycleService,
    schedules: ScheduleService,
}

impl ScheduleRequestService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
            checker: ConflictChecker::new(config.conflict_buffer_minutes),
            lifecycle: ScheduleLifecycleService::new(),
            schedules: ScheduleService::new(config),
        }
    }

    // ==============================================================================
    // DOCTOR OPERATIONS
    // ==============================================================================

    pub async fn create_request(
        &self,
        request: CreateScheduleRequest,
        session: &Session,
    ) -> Result<ScheduleRequest, ScheduleError> {
        debug!("Creating {} schedule request for doctor {}", request.schedule_day, request.doctor_id);

        if !session.can_act_for_doctor(&request.doctor_id) {
            return Err(ScheduleError::Unauthorized(
                "Doctors can only submit their own schedule requests".to_string(),
            ));
        }

        validate_slot(request.max_patients, request.time_per_patient)?;

        let proposed = ProposedSlot {
            branch_id: request.branch_id,
            schedule_day: request.schedule_day,
            window: TimeWindow::from_slot(request.start_time, request.max_patients, request.time_per_patient),
            exclude_request_id: None,
        };
        self.ensure_no_conflicts(request.doctor_id, &proposed, ConflictScope::Active, &session.token).await?;

        let end_time = derive_end_time(request.start_time, request.max_patients, request.time_per_patient);
        let row = json!({
            "doctor_id": request.doctor_id,
            "branch_id": request.branch_id,
            "schedule_day": request.schedule_day,
            "start_time": format_time(request.start_time),
            "end_time": format_time(end_time),
            "max_patients": request.max_patients,
            "time_per_patient": request.time_per_patient,
            "status": RequestStatus::Pending,
            "reason": request.reason,
            "requested_at": Utc::now().to_rfc3339(),
        });

        let created: Vec<ScheduleRequest> = self.supabase.request_with_headers(
            Method::POST,
            REQUESTS_PATH,
            Some(&session.token),
            Some(row),
            Some(SupabaseClient::representation_headers()),
        ).await.map_err(ScheduleError::from)?;

        let created = created.into_iter().next().ok_or_else(|| {
            ScheduleError::DatabaseError("Failed to create schedule request".to_string())
        })?;

        info!("Schedule request {} created for doctor {}", created.id, created.doctor_id);
        Ok(created)
    }

    /// Edits a pending request, or resubmits one sent back for revision.
    pub async fn update_request(
        &self,
        request_id: Uuid,
        update: UpdateScheduleRequest,
        session: &Session,
    ) -> Result<ScheduleRequest, ScheduleError> {
        debug!("Updating schedule request {}", request_id);

        let current = self.get_request(request_id, &session.token).await?;
        if !session.can_act_for_doctor(&current.doctor_id) {
            return Err(ScheduleError::Unauthorized(
                "Doctors can only edit their own schedule requests".to_string(),
            ));
        }

        let next_status = self.lifecycle.status_after_edit(current.status)?;

        let branch_id = update.branch_id.unwrap_or(current.branch_id);
        let schedule_day = update.schedule_day.unwrap_or(current.schedule_day);
        let start_time = update.start_time.unwrap_or(current.start_time);
        let max_patients = update.max_patients.unwrap_or(current.max_patients);
        let time_per_patient = update.time_per_patient.unwrap_or(current.time_per_patient);

        validate_slot(max_patients, time_per_patient)?;

        let proposed = ProposedSlot {
            branch_id,
            schedule_day,
            window: TimeWindow::from_slot(start_time, max_patients, time_per_patient),
            exclude_request_id: Some(current.id),
        };
        self.ensure_no_conflicts(current.doctor_id, &proposed, ConflictScope::Active, &session.token).await?;

        let mut changes = Map::new();
        changes.insert("branch_id".to_string(), json!(branch_id));
        changes.insert("schedule_day".to_string(), json!(schedule_day));
        changes.insert("start_time".to_string(), json!(format_time(start_time)));
        changes.insert(
            "end_time".to_string(),
            json!(format_time(derive_end_time(start_time, max_patients, time_per_patient))),
        );
        changes.insert("max_patients".to_string(), json!(max_patients));
        changes.insert("time_per_patient".to_string(), json!(time_per_patient));
        if let Some(reason) = update.reason {
            changes.insert("reason".to_string(), json!(reason));
        }

        self.transition(&current, next_status, changes, &session.token).await
    }

    /// Withdraws a request that has not been decided yet.
    pub async fn delete_request(
        &self,
        doctor_id: Uuid,
        request_id: Uuid,
        session: &Session,
    ) -> Result<ScheduleRequest, ScheduleError> {
        debug!("Deleting schedule request {} of doctor {}", request_id, doctor_id);

        if !session.can_act_for_doctor(&doctor_id) {
            return Err(ScheduleError::Unauthorized(
                "Doctors can only cancel their own schedule requests".to_string(),
            ));
        }

        let current = self.get_request(request_id, &session.token).await?;
        if current.doctor_id != doctor_id {
            return Err(ScheduleError::NotFound("Schedule request".to_string()));
        }
        if !self.lifecycle.is_editable(current.status) {
            warn!("Refusing to delete schedule request {} in status {}", request_id, current.status);
            return Err(ScheduleError::NotEditable(current.status));
        }

        let path = format!(
            "{}?id=eq.{}&doctor_id=eq.{}&status=eq.{}",
            REQUESTS_PATH, request_id, doctor_id, current.status
        );
        let deleted: Vec<ScheduleRequest> = self.supabase.request_with_headers(
            Method::DELETE,
            &path,
            Some(&session.token),
            None,
            Some(SupabaseClient::representation_headers()),
        ).await.map_err(ScheduleError::from)?;

        let deleted = deleted.into_iter().next().ok_or(ScheduleError::StaleState)?;
        info!("Schedule request {} deleted", deleted.id);
        Ok(deleted)
    }

    pub async fn request_cancellation(
        &self,
        request_id: Uuid,
        cancellation: CancellationRequest,
        session: &Session,
    ) -> Result<ScheduleRequest, ScheduleError> {
        if cancellation.reason.trim().is_empty() {
            return Err(ScheduleError::ValidationError(
                "reason is required to request cancellation".to_string(),
            ));
        }

        let current = self.get_request(request_id, &session.token).await?;
        if !session.can_act_for_doctor(&current.doctor_id) {
            return Err(ScheduleError::Unauthorized(
                "Doctors can only cancel their own schedules".to_string(),
            ));
        }

        let next = self.lifecycle.next_status(current.status, ScheduleAction::RequestCancellation)?;

        let mut changes = Map::new();
        changes.insert("reason".to_string(), json!(cancellation.reason));
        self.transition(&current, next, changes, &session.token).await
    }

    /// Runs the conflict check without writing anything.
    pub async fn check_conflicts(
        &self,
        request: ConflictCheckRequest,
        session: &Session,
    ) -> Result<Vec<ScheduleConflict>, ScheduleError> {
        if !session.can_act_for_doctor(&request.doctor_id) && !session.can_manage_branch(&request.branch_id) {
            return Err(ScheduleError::Unauthorized(
                "Not authorized to check this doctor's schedule".to_string(),
            ));
        }

        validate_slot(request.max_patients, request.time_per_patient)?;

        let proposed = ProposedSlot {
            branch_id: request.branch_id,
            schedule_day: request.schedule_day,
            window: TimeWindow::from_slot(request.start_time, request.max_patients, request.time_per_patient),
            exclude_request_id: request.exclude_request_id,
        };
        let existing = self.doctor_requests_on_day(
            request.doctor_id,
            request.schedule_day,
            ConflictScope::Active,
            &session.token,
        ).await?;

        Ok(self.checker.find_conflicts(&proposed, &existing, ConflictScope::Active))
    }

    // ==============================================================================
    // LISTINGS
    // ==============================================================================

    pub async fn list_doctor_requests(
        &self,
        doctor_id: Uuid,
        status: Option<RequestStatus>,
        session: &Session,
    ) -> Result<Vec<ScheduleRequest>, ScheduleError> {
        if !session.can_view_doctor(&doctor_id) {
            return Err(ScheduleError::Unauthorized(
                "Not authorized to view this doctor's schedule requests".to_string(),
            ));
        }

        let mut path = format!("{}?doctor_id=eq.{}", REQUESTS_PATH, doctor_id);
        if session.role == Some(Role::BranchAdmin) {
            let branch_id = session.branch_id.ok_or_else(|| {
                ScheduleError::Unauthorized("Branch admin has no branch assigned".to_string())
            })?;
            path.push_str(&format!("&branch_id=eq.{}", branch_id));
        }
        if let Some(status) = status {
            path.push_str(&format!("&status=eq.{}", status));
        }
        path.push_str("&order=requested_at.desc");

        self.fetch(&path, &session.token).await
    }

    pub async fn list_branch_requests(
        &self,
        branch_id: Uuid,
        status: Option<RequestStatus>,
        session: &Session,
    ) -> Result<Vec<ScheduleRequest>, ScheduleError> {
        self.ensure_branch_admin(&branch_id, session)?;

        let mut path = format!("{}?branch_id=eq.{}", REQUESTS_PATH, branch_id);
        if let Some(status) = status {
            path.push_str(&format!("&status=eq.{}", status));
        }
        path.push_str("&order=requested_at.desc");

        self.fetch(&path, &session.token).await
    }

    pub async fn summarize_branch(
        &self,
        branch_id: Uuid,
        session: &Session,
    ) -> Result<RequestSummary, ScheduleError> {
        self.ensure_branch_admin(&branch_id, session)?;

        let path = format!("{}?branch_id=eq.{}&select=status", REQUESTS_PATH, branch_id);
        let rows: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(&session.token),
            None,
        ).await.map_err(ScheduleError::from)?;

        let statuses = rows
            .into_iter()
            .map(|row| serde_json::from_value::<RequestStatus>(row["status"].clone()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ScheduleError::DatabaseError(format!("Unknown schedule request status: {}", e)))?;

        Ok(RequestSummary::from_statuses(statuses))
    }

    // ==============================================================================
    // BRANCH ADMIN DECISIONS
    // ==============================================================================

    /// Applies an admin decision. Approval re-checks conflicts against the
    /// doctor's approved slots and materializes dated schedules; an approved
    /// cancellation cancels future schedules.
    pub async fn decide(
        &self,
        request_id: Uuid,
        action: ScheduleAction,
        approval_notes: Option<String>,
        session: &Session,
    ) -> Result<ScheduleRequest, ScheduleError> {
        debug!("Deciding schedule request {} via {:?}", request_id, action);

        let current = self.get_request(request_id, &session.token).await?;
        self.ensure_branch_admin(&current.branch_id, session)?;

        if matches!(action, ScheduleAction::Resubmit | ScheduleAction::RequestCancellation) {
            return Err(ScheduleError::Unauthorized(format!(
                "Branch admins cannot {} a schedule request",
                action
            )));
        }

        self.lifecycle.validate_notes(action, approval_notes.as_deref())?;
        let next = self.lifecycle.next_status(current.status, action)?;

        if action == ScheduleAction::Approve {
            let proposed = ProposedSlot {
                branch_id: current.branch_id,
                schedule_day: current.schedule_day,
                window: current.window(),
                exclude_request_id: Some(current.id),
            };
            self.ensure_no_conflicts(current.doctor_id, &proposed, ConflictScope::Approved, &session.token).await?;
        }

        let mut changes = Map::new();
        if let Some(notes) = approval_notes {
            changes.insert("approval_notes".to_string(), json!(notes));
        }
        if action == ScheduleAction::Approve {
            changes.insert("approved_at".to_string(), json!(Utc::now().to_rfc3339()));
        }

        let updated = self.transition(&current, next, changes, &session.token).await?;

        let today = Utc::now().date_naive();
        let applied = match action {
            ScheduleAction::Approve => {
                self.schedules.materialize(&updated, today, &session.token).await.map(|_| ())
            }
            ScheduleAction::ApproveCancellation => {
                self.schedules.cancel_future(updated.id, today, &session.token).await.map(|_| ())
            }
            _ => Ok(()),
        };

        if let Err(e) = applied {
            error!("Schedule request {} moved to {} but its schedules were not written: {}", updated.id, updated.status, e);
            self.revert_decision(&updated, &current, &session.token).await;
            return Err(e);
        }

        Ok(updated)
    }

    /// Puts a request back in the status it was decided from. Materializing
    /// skips existing dates and cancelling skips cancelled rows, so the
    /// decision can simply be retried.
    async fn revert_decision(&self, decided: &ScheduleRequest, previous: &ScheduleRequest, auth_token: &str) {
        let mut changes = Map::new();
        changes.insert("approval_notes".to_string(), json!(previous.approval_notes));
        changes.insert("approved_at".to_string(), json!(previous.approved_at));

        match self.transition(decided, previous.status, changes, auth_token).await {
            Ok(_) => warn!("Schedule request {} reverted to {}", previous.id, previous.status),
            Err(e) => error!("Failed to revert schedule request {} to {}: {}", previous.id, previous.status, e),
        }
    }

    // ==============================================================================
    // HELPERS
    // ==============================================================================

    pub async fn get_request(&self, request_id: Uuid, auth_token: &str) -> Result<ScheduleRequest, ScheduleError> {
        let path = format!("{}?id=eq.{}", REQUESTS_PATH, request_id);
        self.fetch(&path, auth_token)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ScheduleError::NotFound("Schedule request".to_string()))
    }

    /// Which of `request_ids` are still on the calendar.
    pub async fn scheduled_request_ids(
        &self,
        request_ids: &HashSet<Uuid>,
        auth_token: &str,
    ) -> Result<HashSet<Uuid>, ScheduleError> {
        if request_ids.is_empty() {
            return Ok(HashSet::new());
        }

        let ids: Vec<String> = request_ids.iter().map(Uuid::to_string).collect();
        let statuses: Vec<&str> = ConflictScope::Approved.statuses().iter().map(|s| s.as_str()).collect();
        let path = format!(
            "{}?id=in.({})&status=in.({})&select=id",
            REQUESTS_PATH,
            ids.join(","),
            statuses.join(",")
        );

        let rows: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await.map_err(ScheduleError::from)?;

        Ok(rows
            .iter()
            .filter_map(|row| row["id"].as_str())
            .filter_map(|raw| Uuid::parse_str(raw).ok())
            .collect())
    }

    /// Conditional write: matches only while the row is still in the status it
    /// was read in.
    async fn transition(
        &self,
        current: &ScheduleRequest,
        next: RequestStatus,
        mut changes: Map<String, Value>,
        auth_token: &str,
    ) -> Result<ScheduleRequest, ScheduleError> {
        changes.insert("status".to_string(), json!(next));
        changes.insert("updated_at".to_string(), json!(Utc::now().to_rfc3339()));

        let path = format!("{}?id=eq.{}&status=eq.{}", REQUESTS_PATH, current.id, current.status);
        let updated: Vec<ScheduleRequest> = self.supabase.request_with_headers(
            Method::PATCH,
            &path,
            Some(auth_token),
            Some(Value::Object(changes)),
            Some(SupabaseClient::representation_headers()),
        ).await.map_err(ScheduleError::from)?;

        let updated = updated.into_iter().next().ok_or_else(|| {
            warn!("Schedule request {} left status {} before the write landed", current.id, current.status);
            ScheduleError::StaleState
        })?;

        info!("Schedule request {} moved {} -> {}", updated.id, current.status, updated.status);
        Ok(updated)
    }

    async fn ensure_no_conflicts(
        &self,
        doctor_id: Uuid,
        proposed: &ProposedSlot,
        scope: ConflictScope,
        auth_token: &str,
    ) -> Result<(), ScheduleError> {
        let existing = self.doctor_requests_on_day(doctor_id, proposed.schedule_day, scope, auth_token).await?;
        let conflicts = self.checker.find_conflicts(proposed, &existing, scope);

        if conflicts.is_empty() {
            Ok(())
        } else {
            Err(ScheduleError::Conflicts(conflicts))
        }
    }

    async fn doctor_requests_on_day(
        &self,
        doctor_id: Uuid,
        schedule_day: ScheduleDay,
        scope: ConflictScope,
        auth_token: &str,
    ) -> Result<Vec<ScheduleRequest>, ScheduleError> {
        let statuses: Vec<&str> = scope.statuses().iter().map(|s| s.as_str()).collect();
        let path = format!(
            "{}?doctor_id=eq.{}&schedule_day=eq.{}&status=in.({})",
            REQUESTS_PATH,
            doctor_id,
            schedule_day,
            statuses.join(",")
        );
        self.fetch(&path, auth_token).await
    }

    fn ensure_branch_admin(&self, branch_id: &Uuid, session: &Session) -> Result<(), ScheduleError> {
        if session.can_manage_branch(branch_id) {
            Ok(())
        } else {
            Err(ScheduleError::Unauthorized(
                "Only admins of this branch can manage its schedule requests".to_string(),
            ))
        }
    }

    async fn fetch(&self, path: &str, auth_token: &str) -> Result<Vec<ScheduleRequest>, ScheduleError> {
        let rows: Vec<Value> = self.supabase.request(
            Method::GET,
            path,
            Some(auth_token),
            None,
        ).await.map_err(ScheduleError::from)?;

        rows.into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<ScheduleRequest>, _>>()
            .map_err(|e| ScheduleError::DatabaseError(format!("Failed to parse schedule requests: {}", e)))
    }
}

/// A slot must hold at least one patient and fit inside a day.
pub fn validate_slot(max_patients: i32, time_per_patient: i32) -> Result<(), ScheduleError> {
    if max_patients < 1 {
        return Err(ScheduleError::ValidationError("max_patients must be at least 1".to_string()));
    }
    if time_per_patient < 1 {
        return Err(ScheduleError::ValidationError("time_per_patient must be at least 1 minute".to_string()));
    }
    if max_patients as i64 * time_per_patient as i64 >= MINUTES_PER_DAY {
        return Err(ScheduleError::ValidationError(
            "max_patients * time_per_patient must be shorter than a day".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_slot_validation() {
        assert!(validate_slot(20, 15).is_ok());
        assert_matches!(validate_slot(0, 15), Err(ScheduleError::ValidationError(_)));
        assert_matches!(validate_slot(10, 0), Err(ScheduleError::ValidationError(_)));
        assert_matches!(validate_slot(96, 15), Err(ScheduleError::ValidationError(_)));
        assert!(validate_slot(95, 15).is_ok());
    }
}

use std::collections::HashSet;

use chrono::{NaiveDate, NaiveTime, Timelike, Utc};
use reqwest::Method;
use serde_json::{json, Map, Value};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_models::auth::{Role, Session};

use crate::models::{
    CreateModificationRequest, ModificationKind, ModificationRequest, RequestStatus,
    ScheduleError, ScheduleRequest, UpdateModificationRequest, MINUTES_PER_DAY,
};
use crate::services::lifecycle::{ModificationAction, ScheduleLifecycleService};
use crate::services::schedule::{plan_block_release, plan_modification, ScheduleService};
use crate::services::schedule_request::ScheduleRequestService;

const MODIFICATIONS_PATH: &str = "/rest/v1/schedule_modification_requests";

pub struct ModificationService {
    supabase: SupabaseClient,
    lifecycle: ScheduleLifecycleService,
    requests: ScheduleRequestService,
    schedules: ScheduleService,
}

impl ModificationService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
            lifecycle: ScheduleLifecycleService::new(),
            requests: ScheduleRequestService::new(config),
            schedules: ScheduleService::new(config),
        }
    }

    // ==============================================================================
    // FILING
    // ==============================================================================

    pub async fn create_modification(
        &self,
        request: CreateModificationRequest,
        session: &Session,
    ) -> Result<ModificationRequest, ScheduleError> {
        debug!("Filing {} modification for doctor {}", request.kind.request_type(), request.doctor_id);

        if !session.can_act_for_doctor(&request.doctor_id) {
            return Err(ScheduleError::Unauthorized(
                "Doctors can only file modifications for their own schedules".to_string(),
            ));
        }
        if request.reason.trim().is_empty() {
            return Err(ScheduleError::ValidationError("reason is required".to_string()));
        }

        if let ModificationKind::CancelBlock { parent_request_id } = request.kind {
            return self.create_cancel_block(&request, parent_request_id, session).await;
        }

        let start_date = request.start_date.ok_or_else(|| {
            ScheduleError::ValidationError("start_date is required".to_string())
        })?;
        validate_date_range(start_date, request.end_date, Utc::now().date_naive())?;
        self.validate_against_slot(&request.kind, request.doctor_id, request.branch_id, &session.token).await?;

        self.insert(
            request.doctor_id,
            request.branch_id,
            &request.kind,
            start_date,
            request.end_date,
            &request.reason,
            &session.token,
        ).await
    }

    /// Files a `cancel_block` child. The parent moves to `pending_cancellation`
    /// first and is put back if the child cannot be stored.
    async fn create_cancel_block(
        &self,
        request: &CreateModificationRequest,
        parent_id: Uuid,
        session: &Session,
    ) -> Result<ModificationRequest, ScheduleError> {
        let parent = self.get_modification(parent_id, &session.token).await?;

        if parent.doctor_id != request.doctor_id || parent.branch_id != request.branch_id {
            return Err(ScheduleError::ValidationError(
                "parent_request_id must reference this doctor's request at this branch".to_string(),
            ));
        }
        if !parent.kind.is_block() {
            return Err(ScheduleError::ValidationError(
                "Only block_date or block_schedule requests can be cancelled".to_string(),
            ));
        }

        let parent_next = self
            .lifecycle
            .next_modification_status(parent.status, ModificationAction::OpenCancellation)?;
        let parent = self.transition(&parent, parent_next, Map::new(), &session.token).await?;

        let created = self.insert(
            request.doctor_id,
            request.branch_id,
            &request.kind,
            parent.start_date,
            parent.end_date,
            &request.reason,
            &session.token,
        ).await;

        match created {
            Ok(child) => Ok(child),
            Err(e) => {
                error!("Failed to file cancel_block for {}, reverting parent: {}", parent.id, e);
                let reverted = self
                    .lifecycle
                    .next_modification_status(parent.status, ModificationAction::RejectCancellation)?;
                self.transition(&parent, reverted, Map::new(), &session.token).await?;
                Err(e)
            }
        }
    }

    pub async fn update_modification(
        &self,
        modification_id: Uuid,
        update: UpdateModificationRequest,
        session: &Session,
    ) -> Result<ModificationRequest, ScheduleError> {
        debug!("Updating modification {}", modification_id);

        let current = self.get_modification(modification_id, &session.token).await?;
        if !session.can_act_for_doctor(&current.doctor_id) {
            return Err(ScheduleError::Unauthorized(
                "Doctors can only edit their own modification requests".to_string(),
            ));
        }
        if current.status != RequestStatus::Pending {
            return Err(ScheduleError::NotEditable(current.status));
        }
        if matches!(current.kind, ModificationKind::CancelBlock { .. })
            || matches!(update.kind, ModificationKind::CancelBlock { .. })
        {
            return Err(ScheduleError::ValidationError(
                "cancel_block requests cannot be edited, delete and refile instead".to_string(),
            ));
        }

        let start_date = update.start_date.unwrap_or(current.start_date);
        let end_date = update.end_date.or(current.end_date);
        validate_date_range(start_date, end_date, Utc::now().date_naive())?;
        self.validate_against_slot(&update.kind, current.doctor_id, current.branch_id, &session.token).await?;

        let mut changes = update.kind.to_columns();
        changes.insert("start_date".to_string(), json!(start_date));
        changes.insert("end_date".to_string(), json!(end_date));
        if let Some(reason) = update.reason {
            changes.insert("reason".to_string(), json!(reason));
        }

        self.transition(&current, RequestStatus::Pending, changes, &session.token).await
    }

    /// Withdraws a pending modification. Withdrawing a `cancel_block` puts its
    /// parent block back in force.
    pub async fn delete_modification(
        &self,
        modification_id: Uuid,
        session: &Session,
    ) -> Result<ModificationRequest, ScheduleError> {
        let current = self.get_modification(modification_id, &session.token).await?;
        if !session.can_act_for_doctor(&current.doctor_id) {
            return Err(ScheduleError::Unauthorized(
                "Doctors can only withdraw their own modification requests".to_string(),
            ));
        }
        if current.status != RequestStatus::Pending {
            return Err(ScheduleError::NotEditable(current.status));
        }

        let path = format!(
            "{}?id=eq.{}&status=eq.{}",
            MODIFICATIONS_PATH, modification_id, RequestStatus::Pending
        );
        let deleted: Vec<ModificationRequest> = self.supabase.request_with_headers(
            Method::DELETE,
            &path,
            Some(&session.token),
            None,
            Some(SupabaseClient::representation_headers()),
        ).await.map_err(ScheduleError::from)?;

        let deleted = deleted.into_iter().next().ok_or(ScheduleError::StaleState)?;
        info!("Modification {} withdrawn", deleted.id);

        if let ModificationKind::CancelBlock { parent_request_id } = deleted.kind {
            let parent = self.get_modification(parent_request_id, &session.token).await?;
            if parent.status == RequestStatus::PendingCancellation {
                self.transition(&parent, RequestStatus::Approved, Map::new(), &session.token).await?;
            }
        }

        Ok(deleted)
    }

    // ==============================================================================
    // LISTINGS
    // ==============================================================================

    pub async fn list_doctor_modifications(
        &self,
        doctor_id: Uuid,
        status: Option<RequestStatus>,
        session: &Session,
    ) -> Result<Vec<ModificationRequest>, ScheduleError> {
        if !session.can_view_doctor(&doctor_id) {
            return Err(ScheduleError::Unauthorized(
                "Not authorized to view this doctor's modification requests".to_string(),
            ));
        }

        let mut path = format!("{}?doctor_id=eq.{}", MODIFICATIONS_PATH, doctor_id);
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

    pub async fn list_branch_modifications(
        &self,
        branch_id: Uuid,
        status: Option<RequestStatus>,
        session: &Session,
    ) -> Result<Vec<ModificationRequest>, ScheduleError> {
        if !session.can_manage_branch(&branch_id) {
            return Err(ScheduleError::Unauthorized(
                "Only admins of this branch can view its modification requests".to_string(),
            ));
        }

        let mut path = format!("{}?branch_id=eq.{}", MODIFICATIONS_PATH, branch_id);
        if let Some(status) = status {
            path.push_str(&format!("&status=eq.{}", status));
        }
        path.push_str("&order=requested_at.desc");

        self.fetch(&path, &session.token).await
    }

    // ==============================================================================
    // DECISIONS
    // ==============================================================================

    /// Approves or rejects a pending modification. Approval applies its effect
    /// to the dated schedules; a decided `cancel_block` settles its parent.
    pub async fn decide(
        &self,
        modification_id: Uuid,
        action: ModificationAction,
        approval_notes: Option<String>,
        session: &Session,
    ) -> Result<ModificationRequest, ScheduleError> {
        debug!("Deciding modification {} via {:?}", modification_id, action);

        if !matches!(action, ModificationAction::Approve | ModificationAction::Reject) {
            return Err(ScheduleError::ValidationError(format!(
                "Modification requests can only be approved or rejected, not {}",
                action
            )));
        }

        let current = self.get_modification(modification_id, &session.token).await?;
        if !session.can_manage_branch(&current.branch_id) {
            return Err(ScheduleError::Unauthorized(
                "Only admins of this branch can decide its modification requests".to_string(),
            ));
        }

        let has_notes = approval_notes.as_deref().map(|n| !n.trim().is_empty()).unwrap_or(false);
        if action == ModificationAction::Reject && !has_notes {
            return Err(ScheduleError::ValidationError(
                "approval_notes is required to reject".to_string(),
            ));
        }

        let next = self.lifecycle.next_modification_status(current.status, action)?;

        // Settle the parent's transition up front so a stale parent fails the
        // decision before anything is written.
        let parent = match current.kind {
            ModificationKind::CancelBlock { parent_request_id } => {
                let parent = self.get_modification(parent_request_id, &session.token).await?;
                let parent_action = if action == ModificationAction::Approve {
                    ModificationAction::ApproveCancellation
                } else {
                    ModificationAction::RejectCancellation
                };
                let parent_next = self.lifecycle.next_modification_status(parent.status, parent_action)?;
                Some((parent, parent_next))
            }
            _ => {
                if action == ModificationAction::Approve {
                    self.validate_against_slot(&current.kind, current.doctor_id, current.branch_id, &session.token)
                        .await?;
                }
                None
            }
        };

        let mut changes = Map::new();
        changes.insert("approval_notes".to_string(), json!(approval_notes));
        changes.insert("decided_at".to_string(), json!(Utc::now().to_rfc3339()));
        let decided = self.transition(&current, next, changes, &session.token).await?;

        let settled = match parent {
            Some((parent, parent_next)) => self.settle_parent(&parent, parent_next, &session.token).await,
            None if decided.status == RequestStatus::Approved => {
                self.apply_effects(&decided, &session.token).await.map(|_| ())
            }
            None => Ok(()),
        };

        if let Err(e) = settled {
            error!("Modification {} decided but its effects failed: {}", decided.id, e);
            self.revert_decision(&decided, &current, &session.token).await;
            return Err(e);
        }

        Ok(decided)
    }

    /// Moves a `cancel_block` parent with its child's decision. A lifted block
    /// goes back to `pending_cancellation` if its schedules cannot be restored.
    async fn settle_parent(
        &self,
        parent: &ModificationRequest,
        next: RequestStatus,
        auth_token: &str,
    ) -> Result<(), ScheduleError> {
        let settled = self.transition(parent, next, Map::new(), auth_token).await?;
        if settled.status != RequestStatus::Cancelled {
            return Ok(());
        }

        if let Err(e) = self.release_block(&settled, auth_token).await {
            self.revert_decision(&settled, parent, auth_token).await;
            return Err(e);
        }
        Ok(())
    }

    /// Puts a decided modification back in the state it was decided from so
    /// the decision can be retried. Schedule patches are idempotent.
    async fn revert_decision(&self, decided: &ModificationRequest, previous: &ModificationRequest, auth_token: &str) {
        let mut changes = Map::new();
        changes.insert("approval_notes".to_string(), json!(previous.approval_notes));
        changes.insert("decided_at".to_string(), json!(previous.decided_at));

        match self.transition(decided, previous.status, changes, auth_token).await {
            Ok(_) => warn!("Modification {} reverted to {}", previous.id, previous.status),
            Err(e) => error!("Failed to revert modification {} to {}: {}", previous.id, previous.status, e),
        }
    }

    async fn apply_effects(&self, modification: &ModificationRequest, auth_token: &str) -> Result<usize, ScheduleError> {
        let schedules = self.schedules.find_in_range(
            modification.doctor_id,
            modification.branch_id,
            modification.start_date,
            modification.last_date(),
            auth_token,
        ).await?;

        let patches = plan_modification(&modification.kind, &schedules);
        let applied = self.schedules.apply_patches(patches, auth_token).await?;
        info!("Modification {} changed {} schedule(s)", modification.id, applied);
        Ok(applied)
    }

    /// Restores schedules a cancelled block had taken off the calendar, leaving
    /// those another block in force still covers.
    async fn release_block(&self, block: &ModificationRequest, auth_token: &str) -> Result<usize, ScheduleError> {
        let schedules: Vec<_> = self.schedules.find_in_range(
            block.doctor_id,
            block.branch_id,
            block.start_date,
            block.last_date(),
            auth_token,
        ).await?
            .into_iter()
            .filter(|s| block.kind.schedule_id().map_or(true, |id| s.schedule_request_id == id))
            .collect();

        if schedules.is_empty() {
            return Ok(0);
        }

        let slot_ids: HashSet<Uuid> = schedules.iter().map(|s| s.schedule_request_id).collect();
        let scheduled = self.requests.scheduled_request_ids(&slot_ids, auth_token).await?;

        let remaining: Vec<ModificationRequest> = self.schedules.blocks_in_force(
            block.doctor_id,
            block.branch_id,
            block.start_date,
            block.last_date(),
            auth_token,
        ).await?
            .into_iter()
            .filter(|other| other.id != block.id)
            .collect();

        let patches = plan_block_release(&schedules, &scheduled, &remaining);
        let restored = self.schedules.apply_patches(patches, auth_token).await?;
        info!("Block {} lifted, {} schedule(s) restored", block.id, restored);
        Ok(restored)
    }

    // ==============================================================================
    // HELPERS
    // ==============================================================================

    pub async fn get_modification(&self, modification_id: Uuid, auth_token: &str) -> Result<ModificationRequest, ScheduleError> {
        let path = format!("{}?id=eq.{}", MODIFICATIONS_PATH, modification_id);
        self.fetch(&path, auth_token)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ScheduleError::NotFound("Modification request".to_string()))
    }

    /// Checks the referenced weekly slot for types that target one.
    async fn validate_against_slot(
        &self,
        kind: &ModificationKind,
        doctor_id: Uuid,
        branch_id: Uuid,
        auth_token: &str,
    ) -> Result<(), ScheduleError> {
        let Some(schedule_id) = kind.schedule_id() else {
            return Ok(());
        };

        let slot = match self.requests.get_request(schedule_id, auth_token).await {
            Ok(slot) => slot,
            Err(ScheduleError::NotFound(_)) => {
                return Err(ScheduleError::ValidationError(
                    "schedule_id does not reference a schedule request".to_string(),
                ))
            }
            Err(e) => return Err(e),
        };

        if slot.doctor_id != doctor_id || slot.branch_id != branch_id {
            return Err(ScheduleError::ValidationError(
                "schedule_id must reference this doctor's schedule at this branch".to_string(),
            ));
        }
        if slot.status != RequestStatus::Approved {
            return Err(ScheduleError::ValidationError(format!(
                "schedule_id must reference an approved schedule, found {}",
                slot.status
            )));
        }

        check_kind_fits_slot(kind, &slot)
    }

    async fn insert(
        &self,
        doctor_id: Uuid,
        branch_id: Uuid,
        kind: &ModificationKind,
        start_date: NaiveDate,
        end_date: Option<NaiveDate>,
        reason: &str,
        auth_token: &str,
    ) -> Result<ModificationRequest, ScheduleError> {
        let mut row = kind.to_columns();
        row.insert("doctor_id".to_string(), json!(doctor_id));
        row.insert("branch_id".to_string(), json!(branch_id));
        row.insert("start_date".to_string(), json!(start_date));
        row.insert("end_date".to_string(), json!(end_date));
        row.insert("reason".to_string(), json!(reason));
        row.insert("status".to_string(), json!(RequestStatus::Pending));
        row.insert("requested_at".to_string(), json!(Utc::now().to_rfc3339()));

        let created: Vec<ModificationRequest> = self.supabase.request_with_headers(
            Method::POST,
            MODIFICATIONS_PATH,
            Some(auth_token),
            Some(Value::Object(row)),
            Some(SupabaseClient::representation_headers()),
        ).await.map_err(ScheduleError::from)?;

        let created = created.into_iter().next().ok_or_else(|| {
            ScheduleError::DatabaseError("Failed to create modification request".to_string())
        })?;

        info!("Modification {} ({}) filed for doctor {}", created.id, created.kind.request_type(), doctor_id);
        Ok(created)
    }

    async fn transition(
        &self,
        current: &ModificationRequest,
        next: RequestStatus,
        mut changes: Map<String, Value>,
        auth_token: &str,
    ) -> Result<ModificationRequest, ScheduleError> {
        changes.insert("status".to_string(), json!(next));

        let path = format!("{}?id=eq.{}&status=eq.{}", MODIFICATIONS_PATH, current.id, current.status);
        let updated: Vec<ModificationRequest> = self.supabase.request_with_headers(
            Method::PATCH,
            &path,
            Some(auth_token),
            Some(Value::Object(changes)),
            Some(SupabaseClient::representation_headers()),
        ).await.map_err(ScheduleError::from)?;

        let updated = updated.into_iter().next().ok_or_else(|| {
            warn!("Modification {} left status {} before the write landed", current.id, current.status);
            ScheduleError::StaleState
        })?;

        if current.status != updated.status {
            info!("Modification {} moved {} -> {}", updated.id, current.status, updated.status);
        }
        Ok(updated)
    }

    async fn fetch(&self, path: &str, auth_token: &str) -> Result<Vec<ModificationRequest>, ScheduleError> {
        let rows: Vec<Value> = self.supabase.request(
            Method::GET,
            path,
            Some(auth_token),
            None,
        ).await.map_err(ScheduleError::from)?;

        rows.into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<ModificationRequest>, _>>()
            .map_err(|e| ScheduleError::DatabaseError(format!("Failed to parse modification requests: {}", e)))
    }
}

pub fn validate_date_range(
    start_date: NaiveDate,
    end_date: Option<NaiveDate>,
    today: NaiveDate,
) -> Result<(), ScheduleError> {
    if start_date < today {
        return Err(ScheduleError::ValidationError("start_date cannot be in the past".to_string()));
    }
    if let Some(end_date) = end_date {
        if end_date < start_date {
            return Err(ScheduleError::ValidationError(
                "end_date must not be before start_date".to_string(),
            ));
        }
    }
    Ok(())
}

/// Minutes from the slot's start to `time`, on the slot's own axis.
fn offset_into_slot(slot: &ScheduleRequest, time: NaiveTime) -> i64 {
    let start = (slot.start_time.num_seconds_from_midnight() / 60) as i64;
    let at = (time.num_seconds_from_midnight() / 60) as i64;
    (at - start).rem_euclid(MINUTES_PER_DAY)
}

/// New times must fall strictly inside the slot; a limit must be strictly lower.
pub fn check_kind_fits_slot(kind: &ModificationKind, slot: &ScheduleRequest) -> Result<(), ScheduleError> {
    let duration = slot.window().duration_minutes();

    match kind {
        ModificationKind::DelayStart { new_start_time, .. } => {
            let offset = offset_into_slot(slot, *new_start_time);
            if offset == 0 || offset >= duration {
                return Err(ScheduleError::ValidationError(
                    "new_start_time must fall inside the schedule window".to_string(),
                ));
            }
        }
        ModificationKind::EarlyEnd { new_end_time, .. } => {
            let offset = offset_into_slot(slot, *new_end_time);
            if offset == 0 || offset >= duration {
                return Err(ScheduleError::ValidationError(
                    "new_end_time must fall inside the schedule window".to_string(),
                ));
            }
        }
        ModificationKind::LimitAppointments { new_max_patients, .. } => {
            if *new_max_patients < 1 || *new_max_patients >= slot.max_patients {
                return Err(ScheduleError::ValidationError(format!(
                    "new_max_patients must be between 1 and {}",
                    slot.max_patients - 1
                )));
            }
        }
        ModificationKind::BlockDate
        | ModificationKind::BlockSchedule { .. }
        | ModificationKind::CancelBlock { .. } => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use crate::models::{derive_end_time, ScheduleDay};

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn slot(start: NaiveTime, max: i32, per: i32) -> ScheduleRequest {
        ScheduleRequest {
            id: Uuid::new_v4(),
            doctor_id: Uuid::new_v4(),
            branch_id: Uuid::new_v4(),
            schedule_day: ScheduleDay::Monday,
            start_time: start,
            end_time: derive_end_time(start, max, per),
            max_patients: max,
            time_per_patient: per,
            status: RequestStatus::Approved,
            reason: None,
            approval_notes: None,
            requested_at: Utc::now(),
            approved_at: None,
            updated_at: None,
        }
    }

    #[test]
    fn test_date_range_rules() {
        let today = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();

        assert!(validate_date_range(today, None, today).is_ok());
        assert_matches!(
            validate_date_range(today.pred_opt().unwrap(), None, today),
            Err(ScheduleError::ValidationError(_))
        );
        assert_matches!(
            validate_date_range(today.succ_opt().unwrap(), Some(today), today),
            Err(ScheduleError::ValidationError(_))
        );
    }

    #[test]
    fn test_delay_and_early_end_must_be_strictly_inside() {
        let slot = slot(time(9, 0), 20, 15);
        let id = slot.id;

        let inside = ModificationKind::DelayStart { schedule_id: id, new_start_time: time(10, 0) };
        assert!(check_kind_fits_slot(&inside, &slot).is_ok());

        for bad in [time(9, 0), time(14, 0), time(8, 0), time(15, 0)] {
            let delay = ModificationKind::DelayStart { schedule_id: id, new_start_time: bad };
            assert_matches!(check_kind_fits_slot(&delay, &slot), Err(ScheduleError::ValidationError(_)));
            let early = ModificationKind::EarlyEnd { schedule_id: id, new_end_time: bad };
            assert_matches!(check_kind_fits_slot(&early, &slot), Err(ScheduleError::ValidationError(_)));
        }
    }

    #[test]
    fn test_window_past_midnight() {
        let slot = slot(time(22, 0), 8, 30);
        let early = ModificationKind::EarlyEnd { schedule_id: slot.id, new_end_time: time(1, 0) };

        assert!(check_kind_fits_slot(&early, &slot).is_ok());
    }

    #[test]
    fn test_limit_must_be_strictly_lower() {
        let slot = slot(time(9, 0), 20, 15);

        for (limit, ok) in [(1, true), (19, true), (0, false), (20, false), (25, false)] {
            let kind = ModificationKind::LimitAppointments { schedule_id: slot.id, new_max_patients: limit };
            assert_eq!(check_kind_fits_slot(&kind, &slot).is_ok(), ok, "limit {}", limit);
        }
    }
}

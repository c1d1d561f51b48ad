use std::collections::HashSet;

use chrono::{Datelike, Duration, NaiveDate, NaiveTime, Timelike, Utc};
use futures::future::try_join_all;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, info};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_models::auth::{Role, Session};

use crate::models::{
    derive_end_time, format_time, ModificationKind, ModificationRequest, RequestStatus, Schedule,
    ScheduleDay, ScheduleError, SchedulePatch, ScheduleRangeQuery, ScheduleRequest, ScheduleView,
    MINUTES_PER_DAY,
};

const SCHEDULES_PATH: &str = "/rest/v1/doctor_schedules";
const MODIFICATIONS_PATH: &str = "/rest/v1/schedule_modification_requests";

// ==============================================================================
// MATERIALIZATION
// ==============================================================================

/// Every date falling on `day` in `[from, from + weeks)`.
pub fn occurrence_dates(day: ScheduleDay, from: NaiveDate, weeks: i64) -> Vec<NaiveDate> {
    let target = day.weekday().num_days_from_monday() as i64;
    let current = from.weekday().num_days_from_monday() as i64;
    let until = from + Duration::days(weeks * 7);

    let mut dates = Vec::new();
    let mut date = from + Duration::days((target - current).rem_euclid(7));
    while date < until {
        dates.push(date);
        date += Duration::days(7);
    }
    dates
}

/// Patients that fit in `[start, end)`, wrapping past midnight.
pub fn capacity(start: NaiveTime, end: NaiveTime, time_per_patient: i32) -> i32 {
    if time_per_patient <= 0 {
        return 0;
    }
    let start_minute = (start.num_seconds_from_midnight() / 60) as i64;
    let end_minute = (end.num_seconds_from_midnight() / 60) as i64;
    let minutes = (end_minute - start_minute).rem_euclid(MINUTES_PER_DAY);
    (minutes / time_per_patient as i64) as i32
}

fn available(max_patients: i32, booked_slots: i32) -> i32 {
    (max_patients - booked_slots).max(0)
}

fn schedule_row(request: &ScheduleRequest, date: NaiveDate, is_cancelled: bool) -> Value {
    json!({
        "schedule_request_id": request.id,
        "doctor_id": request.doctor_id,
        "branch_id": request.branch_id,
        "date": date,
        "start_time": format_time(request.start_time),
        "end_time": format_time(request.end_time),
        "time_per_patient": request.time_per_patient,
        "max_patients": request.max_patients,
        "booked_slots": 0,
        "available_slots": request.max_patients,
        "is_cancelled": is_cancelled
    })
}

// ==============================================================================
// MODIFICATION PLANNING
// ==============================================================================

/// Patches an approved modification makes to the dated schedules in its range.
/// `cancel_block` is handled by [`plan_block_release`].
pub fn plan_modification(kind: &ModificationKind, schedules: &[Schedule]) -> Vec<SchedulePatch> {
    schedules
        .iter()
        .filter(|schedule| !schedule.is_cancelled)
        .filter(|schedule| match kind.schedule_id() {
            Some(schedule_id) => schedule.schedule_request_id == schedule_id,
            None => true,
        })
        .filter_map(|schedule| plan_one(kind, schedule))
        .collect()
}

fn plan_one(kind: &ModificationKind, schedule: &Schedule) -> Option<SchedulePatch> {
    let patch = SchedulePatch { id: schedule.id, ..SchedulePatch::default() };

    match kind {
        ModificationKind::BlockDate | ModificationKind::BlockSchedule { .. } => Some(SchedulePatch {
            is_cancelled: Some(true),
            ..patch
        }),
        ModificationKind::DelayStart { new_start_time, .. } => {
            let max_patients = capacity(*new_start_time, schedule.end_time, schedule.time_per_patient)
                .min(schedule.max_patients);
            Some(SchedulePatch {
                start_time: Some(*new_start_time),
                max_patients: Some(max_patients),
                available_slots: Some(available(max_patients, schedule.booked_slots)),
                ..patch
            })
        }
        ModificationKind::EarlyEnd { new_end_time, .. } => {
            let max_patients = capacity(schedule.start_time, *new_end_time, schedule.time_per_patient)
                .min(schedule.max_patients);
            Some(SchedulePatch {
                end_time: Some(*new_end_time),
                max_patients: Some(max_patients),
                available_slots: Some(available(max_patients, schedule.booked_slots)),
                ..patch
            })
        }
        ModificationKind::LimitAppointments { new_max_patients, .. } => Some(SchedulePatch {
            end_time: Some(derive_end_time(schedule.start_time, *new_max_patients, schedule.time_per_patient)),
            max_patients: Some(*new_max_patients),
            available_slots: Some(available(*new_max_patients, schedule.booked_slots)),
            ..patch
        }),
        ModificationKind::CancelBlock { .. } => None,
    }
}

/// Whether `block` keeps the slot `schedule_request_id` off the calendar on `date`.
pub fn block_covers(block: &ModificationRequest, schedule_request_id: Uuid, date: NaiveDate) -> bool {
    block.kind.is_block()
        && block.start_date <= date
        && date <= block.last_date()
        && block.kind.schedule_id().map_or(true, |id| id == schedule_request_id)
}

/// Restores schedules a block cancelled, unless their weekly slot is itself
/// no longer approved or another block still holds the date.
pub fn plan_block_release(
    schedules: &[Schedule],
    approved_request_ids: &HashSet<Uuid>,
    remaining_blocks: &[ModificationRequest],
) -> Vec<SchedulePatch> {
    schedules
        .iter()
        .filter(|schedule| schedule.is_cancelled)
        .filter(|schedule| approved_request_ids.contains(&schedule.schedule_request_id))
        .filter(|schedule| {
            !remaining_blocks
                .iter()
                .any(|block| block_covers(block, schedule.schedule_request_id, schedule.date))
        })
        .map(|schedule| SchedulePatch {
            id: schedule.id,
            is_cancelled: Some(false),
            ..SchedulePatch::default()
        })
        .collect()
}

// ==============================================================================
// SERVICE
// ==============================================================================

pub struct ScheduleService {
    supabase: SupabaseClient,
    horizon_weeks: i64,
}

impl ScheduleService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
            horizon_weeks: config.schedule_horizon_weeks,
        }
    }

    /// Creates the dated schedules of an approved request from `today` over the
    /// configured horizon, skipping dates that already exist. Dates held by a
    /// block in force are created cancelled.
    pub async fn materialize(
        &self,
        request: &ScheduleRequest,
        today: NaiveDate,
        auth_token: &str,
    ) -> Result<Vec<Schedule>, ScheduleError> {
        debug!("Materializing schedules for request {} from {}", request.id, today);

        let existing_path = format!(
            "{}?schedule_request_id=eq.{}&date=gte.{}&select=date",
            SCHEDULES_PATH, request.id, today
        );
        let existing: Vec<Value> = self.supabase.request(
            Method::GET,
            &existing_path,
            Some(auth_token),
            None,
        ).await.map_err(ScheduleError::from)?;

        let existing_dates: HashSet<String> = existing
            .iter()
            .filter_map(|row| row["date"].as_str().map(String::from))
            .collect();

        let dates: Vec<NaiveDate> = occurrence_dates(request.schedule_day, today, self.horizon_weeks)
            .into_iter()
            .filter(|date| !existing_dates.contains(&date.to_string()))
            .collect();

        let (Some(&first), Some(&last)) = (dates.first(), dates.last()) else {
            return Ok(vec![]);
        };

        let blocks = self.blocks_in_force(request.doctor_id, request.branch_id, first, last, auth_token).await?;
        let rows: Vec<Value> = dates
            .into_iter()
            .map(|date| {
                let blocked = blocks.iter().any(|block| block_covers(block, request.id, date));
                if blocked {
                    debug!("{} of request {} is blocked, creating it cancelled", date, request.id);
                }
                schedule_row(request, date, blocked)
            })
            .collect();

        let created: Vec<Schedule> = self.supabase.request_with_headers(
            Method::POST,
            SCHEDULES_PATH,
            Some(auth_token),
            Some(Value::Array(rows)),
            Some(SupabaseClient::representation_headers()),
        ).await.map_err(ScheduleError::from)?;

        info!("Materialized {} schedule(s) for request {}", created.len(), request.id);
        Ok(created)
    }

    /// Marks every not-yet-past schedule of a weekly slot cancelled.
    pub async fn cancel_future(
        &self,
        schedule_request_id: Uuid,
        today: NaiveDate,
        auth_token: &str,
    ) -> Result<usize, ScheduleError> {
        let path = format!(
            "{}?schedule_request_id=eq.{}&date=gte.{}&is_cancelled=eq.false",
            SCHEDULES_PATH, schedule_request_id, today
        );

        let cancelled: Vec<Value> = self.supabase.request_with_headers(
            Method::PATCH,
            &path,
            Some(auth_token),
            Some(json!({ "is_cancelled": true })),
            Some(SupabaseClient::representation_headers()),
        ).await.map_err(ScheduleError::from)?;

        info!("Cancelled {} future schedule(s) of request {}", cancelled.len(), schedule_request_id);
        Ok(cancelled.len())
    }

    pub async fn find_in_range(
        &self,
        doctor_id: Uuid,
        branch_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
        auth_token: &str,
    ) -> Result<Vec<Schedule>, ScheduleError> {
        let path = format!(
            "{}?doctor_id=eq.{}&branch_id=eq.{}&date=gte.{}&date=lte.{}&order=date.asc,start_time.asc",
            SCHEDULES_PATH, doctor_id, branch_id, from, to
        );
        self.fetch(&path, auth_token).await
    }

    /// Approved blocks, including those awaiting cancellation, that touch
    /// `[from, to]` for this doctor at this branch.
    pub async fn blocks_in_force(
        &self,
        doctor_id: Uuid,
        branch_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
        auth_token: &str,
    ) -> Result<Vec<ModificationRequest>, ScheduleError> {
        let path = format!(
            "{}?doctor_id=eq.{}&branch_id=eq.{}&request_type=in.(block_date,block_schedule)&status=in.({},{})&start_date=lte.{}",
            MODIFICATIONS_PATH,
            doctor_id,
            branch_id,
            RequestStatus::Approved,
            RequestStatus::PendingCancellation,
            to
        );
        let rows: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await.map_err(ScheduleError::from)?;

        let blocks = rows.into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<ModificationRequest>, _>>()
            .map_err(|e| ScheduleError::DatabaseError(format!("Failed to parse blocks: {}", e)))?;

        Ok(blocks.into_iter().filter(|block| block.last_date() >= from).collect())
    }

    pub async fn apply_patches(
        &self,
        patches: Vec<SchedulePatch>,
        auth_token: &str,
    ) -> Result<usize, ScheduleError> {
        if patches.is_empty() {
            return Ok(0);
        }

        let updates = patches.iter().map(|patch| async move {
            let body = serde_json::to_value(patch)
                .map_err(|e| ScheduleError::DatabaseError(e.to_string()))?;
            let path = format!("{}?id=eq.{}", SCHEDULES_PATH, patch.id);
            self.supabase.request_with_headers::<Vec<Value>>(
                Method::PATCH,
                &path,
                Some(auth_token),
                Some(body),
                Some(SupabaseClient::representation_headers()),
            ).await.map_err(ScheduleError::from)
        });

        let results = try_join_all(updates).await?;
        let updated: usize = results.iter().map(Vec::len).sum();
        debug!("Applied {} schedule patch(es)", updated);
        Ok(updated)
    }

    pub async fn list_for_doctor(
        &self,
        doctor_id: Uuid,
        range: ScheduleRangeQuery,
        session: &Session,
    ) -> Result<Vec<ScheduleView>, ScheduleError> {
        if !session.can_view_doctor(&doctor_id) {
            return Err(ScheduleError::Unauthorized(
                "Not authorized to view this doctor's schedules".to_string(),
            ));
        }

        let (from, to) = self.resolve_range(&range)?;
        let mut path = format!(
            "{}?doctor_id=eq.{}&date=gte.{}&date=lte.{}",
            SCHEDULES_PATH, doctor_id, from, to
        );
        if session.role == Some(Role::BranchAdmin) {
            let branch_id = session.branch_id.ok_or_else(|| {
                ScheduleError::Unauthorized("Branch admin has no branch assigned".to_string())
            })?;
            path.push_str(&format!("&branch_id=eq.{}", branch_id));
        }
        path.push_str("&order=date.asc,start_time.asc");

        let today = Utc::now().date_naive();
        let schedules = self.fetch(&path, &session.token).await?;
        Ok(schedules.into_iter().map(|s| s.into_view(today)).collect())
    }

    pub async fn list_for_branch(
        &self,
        branch_id: Uuid,
        range: ScheduleRangeQuery,
        session: &Session,
    ) -> Result<Vec<ScheduleView>, ScheduleError> {
        if !session.can_manage_branch(&branch_id) {
            return Err(ScheduleError::Unauthorized(
                "Not authorized to view schedules of this branch".to_string(),
            ));
        }

        let (from, to) = self.resolve_range(&range)?;
        let path = format!(
            "{}?branch_id=eq.{}&date=gte.{}&date=lte.{}&order=date.asc,start_time.asc",
            SCHEDULES_PATH, branch_id, from, to
        );

        let today = Utc::now().date_naive();
        let schedules = self.fetch(&path, &session.token).await?;
        Ok(schedules.into_iter().map(|s| s.into_view(today)).collect())
    }

    fn resolve_range(&self, range: &ScheduleRangeQuery) -> Result<(NaiveDate, NaiveDate), ScheduleError> {
        let from = range.from.unwrap_or_else(|| Utc::now().date_naive());
        let to = range.to.unwrap_or(from + Duration::days(self.horizon_weeks * 7));

        if to < from {
            return Err(ScheduleError::ValidationError(
                "'to' must not be before 'from'".to_string(),
            ));
        }
        Ok((from, to))
    }

    async fn fetch(&self, path: &str, auth_token: &str) -> Result<Vec<Schedule>, ScheduleError> {
        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            path,
            Some(auth_token),
            None,
        ).await.map_err(ScheduleError::from)?;

        result.into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Schedule>, _>>()
            .map_err(|e| ScheduleError::DatabaseError(format!("Failed to parse schedules: {}", e)))
    }
}

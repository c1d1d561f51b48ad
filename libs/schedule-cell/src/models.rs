// libs/schedule-cell/src/models.rs
use std::fmt;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;
use uuid::Uuid;

use shared_database::supabase::SupabaseClient;
use shared_models::error::AppError;

pub const MINUTES_PER_DAY: i64 = 24 * 60;

// ==============================================================================
// SHARED ENUMS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleDay {
    #[serde(alias = "Monday", alias = "mon", alias = "Mon")]
    Monday,
    #[serde(alias = "Tuesday", alias = "tue", alias = "Tue")]
    Tuesday,
    #[serde(alias = "Wednesday", alias = "wed", alias = "Wed")]
    Wednesday,
    #[serde(alias = "Thursday", alias = "thu", alias = "Thu")]
    Thursday,
    #[serde(alias = "Friday", alias = "fri", alias = "Fri")]
    Friday,
    #[serde(alias = "Saturday", alias = "sat", alias = "Sat")]
    Saturday,
    #[serde(alias = "Sunday", alias = "sun", alias = "Sun")]
    Sunday,
}

impl ScheduleDay {
    pub fn weekday(&self) -> Weekday {
        match self {
            ScheduleDay::Monday => Weekday::Mon,
            ScheduleDay::Tuesday => Weekday::Tue,
            ScheduleDay::Wednesday => Weekday::Wed,
            ScheduleDay::Thursday => Weekday::Thu,
            ScheduleDay::Friday => Weekday::Fri,
            ScheduleDay::Saturday => Weekday::Sat,
            ScheduleDay::Sunday => Weekday::Sun,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleDay::Monday => "monday",
            ScheduleDay::Tuesday => "tuesday",
            ScheduleDay::Wednesday => "wednesday",
            ScheduleDay::Thursday => "thursday",
            ScheduleDay::Friday => "friday",
            ScheduleDay::Saturday => "saturday",
            ScheduleDay::Sunday => "sunday",
        }
    }
}

impl fmt::Display for ScheduleDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status shared by schedule requests and modification requests. Modification
/// requests never enter `RevisionRequested`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
    RevisionRequested,
    PendingCancellation,
    Cancelled,
}

impl RequestStatus {
    pub const ALL: [RequestStatus; 6] = [
        RequestStatus::Pending,
        RequestStatus::Approved,
        RequestStatus::Rejected,
        RequestStatus::RevisionRequested,
        RequestStatus::PendingCancellation,
        RequestStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Rejected => "rejected",
            RequestStatus::RevisionRequested => "revision_requested",
            RequestStatus::PendingCancellation => "pending_cancellation",
            RequestStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==============================================================================
// TIME WINDOWS
// ==============================================================================

/// A weekly slot on a continuous minute axis starting at midnight of its day.
/// `end_minute` may exceed 1440 when the slot runs past midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start_minute: i64,
    pub end_minute: i64,
}

impl TimeWindow {
    pub fn from_slot(start_time: NaiveTime, max_patients: i32, time_per_patient: i32) -> Self {
        let start_minute = (start_time.num_seconds_from_midnight() / 60) as i64;
        Self {
            start_minute,
            end_minute: start_minute + max_patients as i64 * time_per_patient as i64,
        }
    }

    pub fn duration_minutes(&self) -> i64 {
        self.end_minute - self.start_minute
    }

    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        self.start_minute < other.end_minute && other.start_minute < self.end_minute
    }

    /// Minutes between two non-overlapping windows, 0 when they overlap or touch.
    pub fn gap_minutes(&self, other: &TimeWindow) -> i64 {
        if self.overlaps(other) {
            return 0;
        }
        (other.start_minute - self.end_minute)
            .max(self.start_minute - other.end_minute)
            .max(0)
    }
}

/// end_time = start_time + max_patients * time_per_patient, wrapping at midnight.
pub fn derive_end_time(start_time: NaiveTime, max_patients: i32, time_per_patient: i32) -> NaiveTime {
    start_time + Duration::minutes(max_patients as i64 * time_per_patient as i64)
}

pub fn format_time(time: NaiveTime) -> String {
    time.format("%H:%M:%S").to_string()
}

// ==============================================================================
// SCHEDULE REQUESTS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleRequest {
    pub id: Uuid,
    pub doctor_id: Uuid,
    pub branch_id: Uuid,
    pub schedule_day: ScheduleDay,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub max_patients: i32,
    pub time_per_patient: i32,
    pub status: RequestStatus,
    pub reason: Option<String>,
    pub approval_notes: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ScheduleRequest {
    pub fn window(&self) -> TimeWindow {
        TimeWindow::from_slot(self.start_time, self.max_patients, self.time_per_patient)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateScheduleRequest {
    pub doctor_id: Uuid,
    pub branch_id: Uuid,
    pub schedule_day: ScheduleDay,
    pub start_time: NaiveTime,
    pub max_patients: i32,
    pub time_per_patient: i32,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateScheduleRequest {
    pub branch_id: Option<Uuid>,
    pub schedule_day: Option<ScheduleDay>,
    pub start_time: Option<NaiveTime>,
    pub max_patients: Option<i32>,
    pub time_per_patient: Option<i32>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecisionRequest {
    pub approval_notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancellationRequest {
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictCheckRequest {
    pub doctor_id: Uuid,
    pub branch_id: Uuid,
    pub schedule_day: ScheduleDay,
    pub start_time: NaiveTime,
    pub max_patients: i32,
    pub time_per_patient: i32,
    pub exclude_request_id: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    Overlap,
    InsufficientBuffer,
    DuplicateDay,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleConflict {
    pub request_id: Uuid,
    pub branch_id: Uuid,
    pub schedule_day: ScheduleDay,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub status: RequestStatus,
    pub conflict_type: ConflictType,
    pub gap_minutes: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequestSummary {
    pub pending: usize,
    pub approved: usize,
    pub rejected: usize,
    pub revision_requested: usize,
    pub pending_cancellation: usize,
    pub cancelled: usize,
    pub total: usize,
}

impl RequestSummary {
    pub fn from_statuses<I: IntoIterator<Item = RequestStatus>>(statuses: I) -> Self {
        let mut summary = Self::default();
        for status in statuses {
            match status {
                RequestStatus::Pending => summary.pending += 1,
                RequestStatus::Approved => summary.approved += 1,
                RequestStatus::Rejected => summary.rejected += 1,
                RequestStatus::RevisionRequested => summary.revision_requested += 1,
                RequestStatus::PendingCancellation => summary.pending_cancellation += 1,
                RequestStatus::Cancelled => summary.cancelled += 1,
            }
            summary.total += 1;
        }
        summary
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusFilter {
    pub status: Option<RequestStatus>,
}

// ==============================================================================
// MODIFICATION REQUESTS
// ==============================================================================

/// Per-type payload of a modification request, keyed by `request_type`.
/// `schedule_id` always names the approved schedule request (the weekly slot).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "request_type", rename_all = "snake_case")]
pub enum ModificationKind {
    BlockDate,
    BlockSchedule { schedule_id: Uuid },
    DelayStart { schedule_id: Uuid, new_start_time: NaiveTime },
    LimitAppointments { schedule_id: Uuid, new_max_patients: i32 },
    EarlyEnd { schedule_id: Uuid, new_end_time: NaiveTime },
    CancelBlock { parent_request_id: Uuid },
}

impl ModificationKind {
    pub fn request_type(&self) -> &'static str {
        match self {
            ModificationKind::BlockDate => "block_date",
            ModificationKind::BlockSchedule { .. } => "block_schedule",
            ModificationKind::DelayStart { .. } => "delay_start",
            ModificationKind::LimitAppointments { .. } => "limit_appointments",
            ModificationKind::EarlyEnd { .. } => "early_end",
            ModificationKind::CancelBlock { .. } => "cancel_block",
        }
    }

    pub fn schedule_id(&self) -> Option<Uuid> {
        match self {
            ModificationKind::BlockSchedule { schedule_id }
            | ModificationKind::DelayStart { schedule_id, .. }
            | ModificationKind::LimitAppointments { schedule_id, .. }
            | ModificationKind::EarlyEnd { schedule_id, .. } => Some(*schedule_id),
            ModificationKind::BlockDate | ModificationKind::CancelBlock { .. } => None,
        }
    }

    pub fn is_block(&self) -> bool {
        matches!(self, ModificationKind::BlockDate | ModificationKind::BlockSchedule { .. })
    }

    /// Flat column layout of the `schedule_modification_requests` table.
    pub fn to_columns(&self) -> Map<String, Value> {
        let mut columns = Map::new();
        columns.insert("request_type".to_string(), json!(self.request_type()));
        columns.insert("schedule_id".to_string(), json!(self.schedule_id()));
        columns.insert("new_start_time".to_string(), Value::Null);
        columns.insert("new_end_time".to_string(), Value::Null);
        columns.insert("new_max_patients".to_string(), Value::Null);
        columns.insert("parent_request_id".to_string(), Value::Null);

        match self {
            ModificationKind::DelayStart { new_start_time, .. } => {
                columns.insert("new_start_time".to_string(), json!(format_time(*new_start_time)));
            }
            ModificationKind::EarlyEnd { new_end_time, .. } => {
                columns.insert("new_end_time".to_string(), json!(format_time(*new_end_time)));
            }
            ModificationKind::LimitAppointments { new_max_patients, .. } => {
                columns.insert("new_max_patients".to_string(), json!(new_max_patients));
            }
            ModificationKind::CancelBlock { parent_request_id } => {
                columns.insert("parent_request_id".to_string(), json!(parent_request_id));
            }
            ModificationKind::BlockDate | ModificationKind::BlockSchedule { .. } => {}
        }

        columns
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModificationRequest {
    pub id: Uuid,
    pub doctor_id: Uuid,
    pub branch_id: Uuid,
    #[serde(flatten)]
    pub kind: ModificationKind,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub reason: Option<String>,
    pub status: RequestStatus,
    pub approval_notes: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
}

impl ModificationRequest {
    pub fn last_date(&self) -> NaiveDate {
        self.end_date.unwrap_or(self.start_date)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateModificationRequest {
    pub doctor_id: Uuid,
    pub branch_id: Uuid,
    #[serde(flatten)]
    pub kind: ModificationKind,
    /// Required for every type except `cancel_block`, which inherits its parent's range.
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateModificationRequest {
    #[serde(flatten)]
    pub kind: ModificationKind,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub reason: Option<String>,
}

// ==============================================================================
// MATERIALIZED SCHEDULES
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: Uuid,
    pub schedule_request_id: Uuid,
    pub doctor_id: Uuid,
    pub branch_id: Uuid,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub time_per_patient: i32,
    pub max_patients: i32,
    pub booked_slots: i32,
    pub available_slots: i32,
    pub is_cancelled: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    Active,
    Cancelled,
    Completed,
}

impl Schedule {
    pub fn status(&self, today: NaiveDate) -> ScheduleStatus {
        if self.is_cancelled {
            ScheduleStatus::Cancelled
        } else if self.date < today {
            ScheduleStatus::Completed
        } else {
            ScheduleStatus::Active
        }
    }

    pub fn into_view(self, today: NaiveDate) -> ScheduleView {
        let status = self.status(today);
        ScheduleView { schedule: self, status }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScheduleView {
    #[serde(flatten)]
    pub schedule: Schedule,
    pub status: ScheduleStatus,
}

/// Partial update of one dated schedule; only set fields are written.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct SchedulePatch {
    #[serde(skip)]
    pub id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "serialize_opt_time")]
    pub start_time: Option<NaiveTime>,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "serialize_opt_time")]
    pub end_time: Option<NaiveTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_patients: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_slots: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_cancelled: Option<bool>,
}

fn serialize_opt_time<S>(time: &Option<NaiveTime>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match time {
        Some(t) => serializer.serialize_str(&format_time(*t)),
        None => serializer.serialize_none(),
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScheduleRangeQuery {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Schedule conflicts with {} existing schedule(s)", .0.len())]
    Conflicts(Vec<ScheduleConflict>),

    #[error("Cannot {action} a request in status {from}")]
    InvalidTransition { from: RequestStatus, action: String },

    #[error("Request cannot be modified in status {0}")]
    NotEditable(RequestStatus),

    #[error("Request was modified concurrently, reload and retry")]
    StaleState,

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Schedule store unavailable: {0}")]
    Upstream(String),
}

impl From<anyhow::Error> for ScheduleError {
    fn from(err: anyhow::Error) -> Self {
        if SupabaseClient::is_upstream_failure(&err) {
            ScheduleError::Upstream(err.to_string())
        } else {
            ScheduleError::DatabaseError(err.to_string())
        }
    }
}

impl From<ScheduleError> for AppError {
    fn from(err: ScheduleError) -> Self {
        match err {
            ScheduleError::NotFound(_) => AppError::NotFound(err.to_string()),
            ScheduleError::ValidationError(msg) => AppError::ValidationError(msg),
            ScheduleError::Conflicts(ref conflicts) => AppError::ScheduleConflict {
                message: err.to_string(),
                conflicts: json!(conflicts),
            },
            ScheduleError::InvalidTransition { .. }
            | ScheduleError::NotEditable(_)
            | ScheduleError::StaleState => AppError::InvalidState(err.to_string()),
            ScheduleError::Unauthorized(msg) => AppError::Forbidden(msg),
            ScheduleError::DatabaseError(msg) => AppError::Database(msg),
            ScheduleError::Upstream(msg) => AppError::ExternalService(msg),
        }
    }
}

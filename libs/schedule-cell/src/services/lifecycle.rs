// libs/schedule-cell/src/services/lifecycle.rs
use std::fmt;

use tracing::{debug, info, warn};

use crate::models::{RequestStatus, ScheduleError};

/// Actions on a doctor's weekly schedule request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleAction {
    Approve,
    Reject,
    RequestRevision,
    Resubmit,
    RequestCancellation,
    ApproveCancellation,
    RejectCancellation,
}

impl fmt::Display for ScheduleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleAction::Approve => write!(f, "approve"),
            ScheduleAction::Reject => write!(f, "reject"),
            ScheduleAction::RequestRevision => write!(f, "request revision of"),
            ScheduleAction::Resubmit => write!(f, "resubmit"),
            ScheduleAction::RequestCancellation => write!(f, "request cancellation of"),
            ScheduleAction::ApproveCancellation => write!(f, "approve cancellation of"),
            ScheduleAction::RejectCancellation => write!(f, "reject cancellation of"),
        }
    }
}

/// Actions on a schedule modification request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModificationAction {
    Approve,
    Reject,
    /// A `cancel_block` child was filed against this request.
    OpenCancellation,
    ApproveCancellation,
    RejectCancellation,
}

impl fmt::Display for ModificationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModificationAction::Approve => write!(f, "approve"),
            ModificationAction::Reject => write!(f, "reject"),
            ModificationAction::OpenCancellation => write!(f, "cancel"),
            ModificationAction::ApproveCancellation => write!(f, "approve cancellation of"),
            ModificationAction::RejectCancellation => write!(f, "reject cancellation of"),
        }
    }
}

pub struct ScheduleLifecycleService;

impl ScheduleLifecycleService {
    pub fn new() -> Self {
        Self
    }

    /// Status a schedule request moves to, or the state violation.
    pub fn next_status(
        &self,
        current: RequestStatus,
        action: ScheduleAction,
    ) -> Result<RequestStatus, ScheduleError> {
        debug!("Validating schedule request transition {} via {:?}", current, action);

        let next = match (current, action) {
            (RequestStatus::Pending, ScheduleAction::Approve) => RequestStatus::Approved,
            (RequestStatus::Pending, ScheduleAction::Reject) => RequestStatus::Rejected,
            (RequestStatus::Pending, ScheduleAction::RequestRevision) => RequestStatus::RevisionRequested,
            (RequestStatus::RevisionRequested, ScheduleAction::Resubmit) => RequestStatus::Pending,
            (RequestStatus::Approved, ScheduleAction::RequestCancellation) => RequestStatus::PendingCancellation,
            (RequestStatus::PendingCancellation, ScheduleAction::ApproveCancellation) => RequestStatus::Cancelled,
            (RequestStatus::PendingCancellation, ScheduleAction::RejectCancellation) => RequestStatus::Approved,
            _ => {
                warn!("Invalid schedule request transition attempted: {} via {:?}", current, action);
                return Err(ScheduleError::InvalidTransition {
                    from: current,
                    action: action.to_string(),
                });
            }
        };

        info!("Schedule request transition validated: {} -> {}", current, next);
        Ok(next)
    }

    pub fn get_valid_actions(&self, current: RequestStatus) -> Vec<ScheduleAction> {
        match current {
            RequestStatus::Pending => vec![
                ScheduleAction::Approve,
                ScheduleAction::Reject,
                ScheduleAction::RequestRevision,
            ],
            RequestStatus::RevisionRequested => vec![ScheduleAction::Resubmit],
            RequestStatus::Approved => vec![ScheduleAction::RequestCancellation],
            RequestStatus::PendingCancellation => vec![
                ScheduleAction::ApproveCancellation,
                ScheduleAction::RejectCancellation,
            ],
            // Terminal states
            RequestStatus::Rejected | RequestStatus::Cancelled => vec![],
        }
    }

    /// Doctors edit or withdraw only before a decision lands.
    pub fn is_editable(&self, status: RequestStatus) -> bool {
        matches!(status, RequestStatus::Pending | RequestStatus::RevisionRequested)
    }

    pub fn is_terminal(&self, status: RequestStatus) -> bool {
        matches!(status, RequestStatus::Rejected | RequestStatus::Cancelled)
    }

    /// Edits on a request sent back for revision resubmit it.
    pub fn status_after_edit(&self, current: RequestStatus) -> Result<RequestStatus, ScheduleError> {
        match current {
            RequestStatus::Pending => Ok(RequestStatus::Pending),
            RequestStatus::RevisionRequested => self.next_status(current, ScheduleAction::Resubmit),
            other => Err(ScheduleError::NotEditable(other)),
        }
    }

    /// Rejections and revision requests must tell the doctor why.
    pub fn validate_notes(&self, action: ScheduleAction, notes: Option<&str>) -> Result<(), ScheduleError> {
        let needs_notes = matches!(action, ScheduleAction::Reject | ScheduleAction::RequestRevision);
        let has_notes = notes.map(|n| !n.trim().is_empty()).unwrap_or(false);

        if needs_notes && !has_notes {
            return Err(ScheduleError::ValidationError(
                "approval_notes is required to reject or request revision".to_string(),
            ));
        }
        Ok(())
    }

    pub fn next_modification_status(
        &self,
        current: RequestStatus,
        action: ModificationAction,
    ) -> Result<RequestStatus, ScheduleError> {
        debug!("Validating modification transition {} via {:?}", current, action);

        let next = match (current, action) {
            (RequestStatus::Pending, ModificationAction::Approve) => RequestStatus::Approved,
            (RequestStatus::Pending, ModificationAction::Reject) => RequestStatus::Rejected,
            (RequestStatus::Approved, ModificationAction::OpenCancellation) => RequestStatus::PendingCancellation,
            (RequestStatus::PendingCancellation, ModificationAction::ApproveCancellation) => RequestStatus::Cancelled,
            (RequestStatus::PendingCancellation, ModificationAction::RejectCancellation) => RequestStatus::Approved,
            _ => {
                warn!("Invalid modification transition attempted: {} via {:?}", current, action);
                return Err(ScheduleError::InvalidTransition {
                    from: current,
                    action: action.to_string(),
                });
            }
        };

        info!("Modification transition validated: {} -> {}", current, next);
        Ok(next)
    }
}

impl Default for ScheduleLifecycleService {
    fn default() -> Self {
        Self::new()
    }
}

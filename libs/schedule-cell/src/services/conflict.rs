use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{
    ConflictType, RequestStatus, ScheduleConflict, ScheduleDay, ScheduleRequest, TimeWindow,
};

/// Proposed weekly slot checked against a doctor's existing slots.
#[derive(Debug, Clone, Copy)]
pub struct ProposedSlot {
    pub branch_id: Uuid,
    pub schedule_day: ScheduleDay,
    pub window: TimeWindow,
    /// The request being edited, never compared with itself.
    pub exclude_request_id: Option<Uuid>,
}

/// Which existing requests count as occupying their slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictScope {
    /// Submission and edits: anything pending or scheduled.
    Active,
    /// Approval: only what is actually on the calendar.
    Approved,
}

impl ConflictScope {
    pub fn statuses(&self) -> &'static [RequestStatus] {
        match self {
            ConflictScope::Active => &[
                RequestStatus::Pending,
                RequestStatus::Approved,
                RequestStatus::PendingCancellation,
            ],
            ConflictScope::Approved => &[
                RequestStatus::Approved,
                RequestStatus::PendingCancellation,
            ],
        }
    }
}

/// Pure overlap check on weekly windows. The caller supplies the candidate
/// requests (one doctor's slots) and decides whether to block.
pub struct ConflictChecker {
    buffer_minutes: i64,
}

impl ConflictChecker {
    pub fn new(buffer_minutes: i64) -> Self {
        Self { buffer_minutes }
    }

    pub fn buffer_minutes(&self) -> i64 {
        self.buffer_minutes
    }

    pub fn find_conflicts(
        &self,
        proposed: &ProposedSlot,
        existing: &[ScheduleRequest],
        scope: ConflictScope,
    ) -> Vec<ScheduleConflict> {
        debug!(
            "Checking {} {}-{} against {} existing slot(s)",
            proposed.schedule_day,
            proposed.window.start_minute,
            proposed.window.end_minute,
            existing.len()
        );

        let statuses = scope.statuses();

        let conflicts: Vec<ScheduleConflict> = existing
            .iter()
            .filter(|request| Some(request.id) != proposed.exclude_request_id)
            .filter(|request| request.schedule_day == proposed.schedule_day)
            .filter(|request| statuses.contains(&request.status))
            .filter_map(|request| self.classify(proposed, request))
            .collect();

        if !conflicts.is_empty() {
            warn!(
                "{} conflict(s) for proposed {} slot at branch {}",
                conflicts.len(),
                proposed.schedule_day,
                proposed.branch_id
            );
        }

        conflicts
    }

    fn classify(&self, proposed: &ProposedSlot, existing: &ScheduleRequest) -> Option<ScheduleConflict> {
        let existing_window = existing.window();
        let gap_minutes = proposed.window.gap_minutes(&existing_window);

        let conflict_type = if proposed.window.overlaps(&existing_window) {
            ConflictType::Overlap
        } else if gap_minutes < self.buffer_minutes {
            ConflictType::InsufficientBuffer
        } else if existing.branch_id == proposed.branch_id {
            // One active slot per doctor, branch and day.
            ConflictType::DuplicateDay
        } else {
            return None;
        };

        Some(ScheduleConflict {
            request_id: existing.id,
            branch_id: existing.branch_id,
            schedule_day: existing.schedule_day,
            start_time: existing.start_time,
            end_time: existing.end_time,
            status: existing.status,
            conflict_type,
            gap_minutes,
        })
    }
}

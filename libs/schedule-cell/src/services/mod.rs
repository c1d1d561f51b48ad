pub mod conflict;
pub mod lifecycle;
pub mod modification;
pub mod schedule;
pub mod schedule_request;

pub use conflict::{ConflictChecker, ConflictScope, ProposedSlot};
pub use lifecycle::{ModificationAction, ScheduleAction, ScheduleLifecycleService};
pub use modification::ModificationService;
pub use schedule::ScheduleService;
pub use schedule_request::ScheduleRequestService;

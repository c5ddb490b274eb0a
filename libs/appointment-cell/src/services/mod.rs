pub mod booking;
pub mod conflict;
pub mod lifecycle;
pub mod schedule;

pub use booking::{AppointmentBookingService, BillingUpdate};
pub use conflict::ConflictDetectionService;
pub use lifecycle::AppointmentLifecycleService;
pub use schedule::AppointmentScheduleService;

// =====================================================================================
// APPOINTMENT CELL - SCHEDULING, CONFLICTS & LIFECYCLE
// =====================================================================================

pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use models::*;
pub use router::appointment_routes;
pub use services::{
    AppointmentBookingService, AppointmentLifecycleService, AppointmentScheduleService,
    BillingUpdate, ConflictDetectionService,
};

// =====================================================================================
// CONSULTATION CELL - CLINICAL RECORDS & PRESCRIPTIONS
// =====================================================================================
//
// - One consultation per attended appointment, with vitals and derived BMI
// - Prescriptions with their own active/completed/cancelled lifecycle
//
// =====================================================================================

pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use models::*;
pub use router::{consultation_routes, prescription_routes};
pub use services::{ConsultationService, PrescriptionService};

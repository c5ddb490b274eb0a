pub mod consultation;
pub mod prescription;

pub use consultation::{compute_bmi, ConsultationService};
pub use prescription::PrescriptionService;

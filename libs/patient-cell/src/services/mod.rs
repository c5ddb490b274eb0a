pub mod patient;

pub use patient::{next_history_number, validate_document, PatientService};

use tracing::warn;

use crate::models::{AppointmentError, AppointmentStatus};

/// Status rules for the appointment lifecycle.
///
/// `pending`, `confirmed`, `paid` and `unpaid` move freely among themselves;
/// `cancelled` and `attended` are reached only through cancel and
/// mark-attended and never change afterwards.
pub struct AppointmentLifecycleService;

impl AppointmentLifecycleService {
    pub fn initial_status(payment_amount: Option<f64>) -> AppointmentStatus {
        if payment_amount.is_some() {
            AppointmentStatus::Paid
        } else {
            AppointmentStatus::Pending
        }
    }

    pub fn validate_cancel(current: AppointmentStatus) -> Result<(), AppointmentError> {
        match current {
            AppointmentStatus::Cancelled => Err(rejected("Appointment is already cancelled")),
            AppointmentStatus::Attended => Err(rejected("Cannot cancel an attended appointment")),
            _ => Ok(()),
        }
    }

    pub fn validate_attend(current: AppointmentStatus) -> Result<(), AppointmentError> {
        match current {
            AppointmentStatus::Attended => Err(rejected("Appointment is already marked as attended")),
            AppointmentStatus::Cancelled => {
                Err(rejected("Cannot mark a cancelled appointment as attended"))
            }
            _ => Ok(()),
        }
    }

    pub fn validate_update(
        current: AppointmentStatus,
        requested: Option<AppointmentStatus>,
    ) -> Result<(), AppointmentError> {
        if current == AppointmentStatus::Attended {
            return Err(rejected("Cannot modify an attended appointment"));
        }

        match requested {
            Some(status) if status == current => Ok(()),
            Some(status) if status.is_terminal() => Err(rejected(&format!(
                "Status '{}' can only be set through its dedicated endpoint",
                status
            ))),
            Some(_) if current.is_terminal() => Err(rejected(&format!(
                "Cannot change the status of a {} appointment",
                current
            ))),
            _ => Ok(()),
        }
    }
}

fn rejected(message: &str) -> AppointmentError {
    warn!("Appointment transition rejected: {}", message);
    AppointmentError::InvalidTransition(message.to_string())
}

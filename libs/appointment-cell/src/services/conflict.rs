use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::AppointmentError;

pub struct ConflictDetectionService;

impl ConflictDetectionService {
    /// First active, non-cancelled appointment for the doctor whose start lies
    /// in `[at - window, at + window]`.
    pub fn find_conflict(
        conn: &Connection,
        doctor_id: Uuid,
        at: DateTime<Utc>,
        window: Duration,
        exclude_appointment_id: Option<Uuid>,
    ) -> Result<Option<Uuid>, AppointmentError> {
        debug!(
            "Checking conflicts for doctor {} within {} minutes of {}",
            doctor_id,
            window.num_minutes(),
            at
        );

        let conflicting = conn
            .query_row(
                "SELECT id FROM appointments
                 WHERE doctor_id = ?1
                   AND is_active = 1
                   AND status != 'cancelled'
                   AND date_time BETWEEN ?2 AND ?3
                   AND (?4 IS NULL OR id != ?4)
                 ORDER BY date_time
                 LIMIT 1",
                params![doctor_id, at - window, at + window, exclude_appointment_id],
                |row| row.get::<_, Uuid>(0),
            )
            .optional()?;

        if let Some(id) = conflicting {
            warn!("Conflict detected for doctor {} with appointment {}", doctor_id, id);
        }
        Ok(conflicting)
    }

    pub fn ensure_available(
        conn: &Connection,
        doctor_id: Uuid,
        at: DateTime<Utc>,
        window: Duration,
        exclude_appointment_id: Option<Uuid>,
    ) -> Result<(), AppointmentError> {
        match Self::find_conflict(conn, doctor_id, at, window, exclude_appointment_id)? {
            Some(conflicting_appointment_id) => Err(AppointmentError::Conflict {
                conflicting_appointment_id,
            }),
            None => Ok(()),
        }
    }
}

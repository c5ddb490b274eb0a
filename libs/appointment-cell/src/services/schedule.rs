use chrono::{DateTime, Duration, FixedOffset, NaiveDate, TimeZone, Utc};
use rusqlite::{params, Connection};
use tracing::debug;
use uuid::Uuid;

use shared_models::pagination::{Page, Pagination};

use crate::models::{
    Appointment, AppointmentError, AppointmentListQuery, AppointmentStats, DailySchedule,
    SchedulingRules, StatsQuery,
};
use crate::services::booking::{map_appointment, APPOINTMENT_SELECT};

pub struct AppointmentScheduleService;

impl AppointmentScheduleService {
    /// Non-cancelled appointments for one clinic-local calendar day, earliest first.
    pub fn daily_schedule(
        conn: &Connection,
        doctor_id: Uuid,
        date: NaiveDate,
        rules: &SchedulingRules,
    ) -> Result<DailySchedule, AppointmentError> {
        let (start, end) = day_bounds(date, rules.utc_offset_minutes)?;
        debug!("Daily schedule for doctor {} between {} and {}", doctor_id, start, end);

        let mut stmt = conn.prepare(&format!(
            "{APPOINTMENT_SELECT}
             WHERE a.doctor_id = ?1 AND a.is_active = 1 AND a.status != 'cancelled'
               AND a.date_time >= ?2 AND a.date_time < ?3
             ORDER BY a.date_time ASC"
        ))?;
        let appointments = stmt
            .query_map(params![doctor_id, start, end], map_appointment)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(DailySchedule {
            doctor_id,
            date,
            total: appointments.len(),
            appointments,
        })
    }

    pub fn list_appointments(
        conn: &Connection,
        query: &AppointmentListQuery,
        rules: &SchedulingRules,
    ) -> Result<Page<Appointment>, AppointmentError> {
        let page = query.page_params();
        let (from, to) = range_bounds(query.date_from, query.date_to, rules)?;
        let status = query.status.map(|s| s.as_str());
        let kind = query.appointment_type.map(|t| t.as_str());

        let filter = "WHERE a.is_active = 1
               AND (?1 IS NULL OR a.doctor_id = ?1)
               AND (?2 IS NULL OR a.patient_id = ?2)
               AND (?3 IS NULL OR a.status = ?3)
               AND (?4 IS NULL OR a.appointment_type = ?4)
               AND (?5 IS NULL OR a.date_time >= ?5)
               AND (?6 IS NULL OR a.date_time < ?6)";

        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM appointments a {filter}"),
            params![query.doctor_id, query.patient_id, status, kind, from, to],
            |row| row.get(0),
        )?;

        let mut stmt = conn.prepare(&format!(
            "{APPOINTMENT_SELECT} {filter}
             ORDER BY a.date_time ASC
             LIMIT ?7 OFFSET ?8"
        ))?;
        let items = stmt
            .query_map(
                params![
                    query.doctor_id,
                    query.patient_id,
                    status,
                    kind,
                    from,
                    to,
                    page.limit(),
                    page.offset()
                ],
                map_appointment,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page {
            items,
            pagination: Pagination::new(&page, total as u64),
        })
    }

    pub fn stats(
        conn: &Connection,
        query: &StatsQuery,
        rules: &SchedulingRules,
    ) -> Result<AppointmentStats, AppointmentError> {
        let (from, to) = range_bounds(query.date_from, query.date_to, rules)?;
        let filter = "WHERE is_active = 1
               AND (?1 IS NULL OR doctor_id = ?1)
               AND (?2 IS NULL OR date_time >= ?2)
               AND (?3 IS NULL OR date_time < ?3)";

        let mut stats = AppointmentStats::default();
        for (column, bucket) in [("status", &mut stats.by_status), ("appointment_type", &mut stats.by_type)] {
            let mut stmt = conn.prepare(&format!(
                "SELECT {column}, COUNT(*) FROM appointments {filter} GROUP BY {column}"
            ))?;
            let rows = stmt.query_map(params![query.doctor_id, from, to], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                let (key, count) = row?;
                bucket.insert(key, count as u64);
            }
        }
        stats.total = stats.by_status.values().sum();
        Ok(stats)
    }
}

/// UTC instants bounding the clinic-local calendar day `[start, end)`.
pub fn day_bounds(
    date: NaiveDate,
    utc_offset_minutes: i32,
) -> Result<(DateTime<Utc>, DateTime<Utc>), AppointmentError> {
    let offset = FixedOffset::east_opt(utc_offset_minutes * 60).ok_or_else(|| {
        AppointmentError::Validation(format!("Invalid clinic UTC offset: {} minutes", utc_offset_minutes))
    })?;
    let start = offset
        .from_local_datetime(&date.and_hms_opt(0, 0, 0).unwrap_or_default())
        .single()
        .ok_or_else(|| AppointmentError::Validation(format!("Invalid date: {}", date)))?
        .with_timezone(&Utc);
    Ok((start, start + Duration::days(1)))
}

/// Today's date in the clinic's configured offset.
pub fn clinic_today(rules: &SchedulingRules) -> NaiveDate {
    let now = Utc::now() + Duration::minutes(rules.utc_offset_minutes as i64);
    now.date_naive()
}

fn range_bounds(
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    rules: &SchedulingRules,
) -> Result<(Option<DateTime<Utc>>, Option<DateTime<Utc>>), AppointmentError> {
    let start = from
        .map(|d| day_bounds(d, rules.utc_offset_minutes).map(|(start, _)| start))
        .transpose()?;
    let end = to
        .map(|d| day_bounds(d, rules.utc_offset_minutes).map(|(_, end)| end))
        .transpose()?;
    Ok((start, end))
}

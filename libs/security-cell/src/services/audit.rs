// =====================================================================================
// AUDIT SERVICE - APPEND-ONLY CLINICAL AUDIT TRAIL
// =====================================================================================

use chrono::Utc;
use serde_json::{Map, Value};
use rusqlite::{params, Connection, Row};
use shared_database::{parse_column, DatabaseError};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::models::{AuditEntry, AuditLog, EntityType};

pub const DEFAULT_HISTORY_LIMIT: u32 = 50;
pub const DEFAULT_ACTIVITY_LIMIT: u32 = 100;
const MAX_QUERY_LIMIT: u32 = 500;

const SENSITIVE_MARKERS: [&str; 3] = ["password", "token", "secret"];

pub struct AuditService;

impl AuditService {
    /// Append an audit record. Failures are logged and swallowed so the audited
    /// operation is never rolled back because of its audit trail.
    #[instrument(skip(conn, entry), fields(action = %entry.action, entity_type = %entry.entity_type))]
    pub fn record(conn: &Connection, entry: AuditEntry) {
        match Self::insert(conn, &entry) {
            Ok(event_id) => {
                info!(
                    event_id = %event_id,
                    user_id = ?entry.user_id,
                    entity_id = %entry.entity_id,
                    "AUDIT: {} {}", entry.action, entry.entity_type
                );
            }
            Err(e) => {
                warn!(
                    entity_id = %entry.entity_id,
                    error = %e,
                    "Failed to write audit record"
                );
            }
        }
    }

    fn insert(conn: &Connection, entry: &AuditEntry) -> Result<Uuid, DatabaseError> {
        let id = Uuid::new_v4();
        let context = entry
            .context
            .as_ref()
            .and_then(|ctx| serde_json::to_value(ctx).ok())
            .map(strip_sensitive);

        conn.execute(
            "INSERT INTO audit_logs (id, user_id, action, entity_type, entity_id, old_data, new_data, context, ip_address, user_agent, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                id,
                entry.user_id,
                entry.action.as_str(),
                entry.entity_type.as_str(),
                entry.entity_id,
                entry.old_data.clone().map(strip_sensitive),
                entry.new_data.clone().map(strip_sensitive),
                context,
                entry.ip_address,
                entry.user_agent,
                Utc::now(),
            ],
        )?;
        Ok(id)
    }

    /// History of one entity, newest first.
    pub fn entity_history(
        conn: &Connection,
        entity_type: EntityType,
        entity_id: &str,
        limit: Option<u32>,
    ) -> Result<Vec<AuditLog>, DatabaseError> {
        let limit = limit.unwrap_or(DEFAULT_HISTORY_LIMIT).clamp(1, MAX_QUERY_LIMIT);
        let mut stmt = conn.prepare(
            "SELECT * FROM audit_logs
             WHERE entity_type = ?1 AND entity_id = ?2
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?3",
        )?;
        let logs = stmt
            .query_map(params![entity_type.as_str(), entity_id, limit], map_audit_log)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(logs)
    }

    /// Everything one user did, newest first.
    pub fn user_activity(
        conn: &Connection,
        user_id: Uuid,
        limit: Option<u32>,
    ) -> Result<Vec<AuditLog>, DatabaseError> {
        let limit = limit.unwrap_or(DEFAULT_ACTIVITY_LIMIT).clamp(1, MAX_QUERY_LIMIT);
        let mut stmt = conn.prepare(
            "SELECT * FROM audit_logs
             WHERE user_id = ?1
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?2",
        )?;
        let logs = stmt
            .query_map(params![user_id, limit], map_audit_log)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(logs)
    }
}

fn map_audit_log(row: &Row<'_>) -> rusqlite::Result<AuditLog> {
    Ok(AuditLog {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        action: parse_column(row, "action")?,
        entity_type: parse_column(row, "entity_type")?,
        entity_id: row.get("entity_id")?,
        old_data: row.get("old_data")?,
        new_data: row.get("new_data")?,
        context: row.get("context")?,
        ip_address: row.get("ip_address")?,
        user_agent: row.get("user_agent")?,
        created_at: row.get("created_at")?,
    })
}

fn is_sensitive_key(key: &str) -> bool {
    let key = key.to_lowercase();
    SENSITIVE_MARKERS.iter().any(|marker| key.contains(marker))
}

/// Remove every key naming a password, token or secret, at any depth.
pub fn strip_sensitive(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(key, _)| !is_sensitive_key(key))
                .map(|(key, value)| (key, strip_sensitive(value)))
                .collect::<Map<String, Value>>(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(strip_sensitive).collect()),
        other => other,
    }
}

use hmac::{Hmac, Mac};
use rusqlite::Connection;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use sha2::Sha256;
use tracing::{info, warn};

use appointment_cell::SchedulingRules;
use shared_utils::extractor::ClientInfo;

use crate::models::{ExternalError, PaymentStatusRequest, SyncAppointmentRequest, WebhookEvent, WebhookEventKind};
use crate::services::sync::BillingSyncService;

type HmacSha256 = Hmac<Sha256>;

/// Hex HMAC-SHA256 of `body`, as the billing system sends it in `X-Signature`.
pub fn sign_payload(secret: &str, body: &[u8]) -> Result<String, ExternalError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| ExternalError::WebhookNotConfigured)?;
    mac.update(body);
    Ok(to_hex(&mac.finalize().into_bytes()))
}

/// Constant-time check of a hex signature, optionally prefixed with `sha256=`.
pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> Result<(), ExternalError> {
    if secret.is_empty() {
        return Err(ExternalError::WebhookNotConfigured);
    }
    let signature = signature.trim();
    let hex = signature.strip_prefix("sha256=").unwrap_or(signature);
    let expected = from_hex(hex).ok_or(ExternalError::InvalidSignature)?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| ExternalError::WebhookNotConfigured)?;
    mac.update(body);
    mac.verify_slice(&expected).map_err(|_| {
        warn!("Billing webhook signature mismatch");
        ExternalError::InvalidSignature
    })
}

pub struct WebhookService;

impl WebhookService {
    /// Dispatch a verified billing event to the matching sync operation.
    pub fn handle_event(
        conn: &Connection,
        event: WebhookEvent,
        rules: &SchedulingRules,
        client: &ClientInfo,
    ) -> Result<Value, ExternalError> {
        let kind = WebhookEventKind::parse(&event.event_type)
            .ok_or_else(|| ExternalError::UnsupportedEvent(event.event_type.clone()))?;
        info!("Billing webhook event {}", event.event_type);

        match kind {
            WebhookEventKind::AppointmentCreated | WebhookEventKind::AppointmentUpdated => {
                let request: SyncAppointmentRequest = event_data(event.data)?;
                let outcome = BillingSyncService::sync_appointment(conn, request, rules, client)?;
                Ok(json!(outcome))
            }
            WebhookEventKind::PaymentUpdated => {
                let request: PaymentStatusRequest = event_data(event.data)?;
                let appointment = BillingSyncService::update_payment_status(conn, request, client)?;
                Ok(json!({
                    "appointment_id": appointment.id,
                    "new_status": appointment.status
                }))
            }
        }
    }
}

fn event_data<T: DeserializeOwned>(data: Value) -> Result<T, ExternalError> {
    serde_json::from_value(data).map_err(|e| ExternalError::Validation(format!("Invalid event data: {}", e)))
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn from_hex(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok())
        .collect()
}

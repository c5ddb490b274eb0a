// =====================================================================================
// EXTERNAL CELL - BILLING SYSTEM RECONCILIATION
// =====================================================================================
//
// - Appointment sync keyed by the billing system's external code
// - Payment status updates and sync statistics
// - HMAC-signed billing webhook
//
// =====================================================================================

pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use models::*;
pub use router::external_routes;
pub use services::{sign_payload, split_names, BillingSyncService, WebhookService};

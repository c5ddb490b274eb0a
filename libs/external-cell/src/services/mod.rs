pub mod sync;
pub mod webhook;

pub use sync::{split_names, BillingSyncService};
pub use webhook::{sign_payload, verify_signature, WebhookService};

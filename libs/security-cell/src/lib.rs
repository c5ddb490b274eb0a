// =====================================================================================
// SECURITY CELL - AUDIT TRAIL & PASSWORD SECURITY
// =====================================================================================
//
// - Append-only audit logging with sensitive-field stripping
// - Audit history queries for administrators
// - Argon2 password hashing and password policy
//
// =====================================================================================

pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use models::{AuditAction, AuditContext, AuditEntry, AuditLog, EntityType, SecurityError};
pub use services::{AuditService, PasswordSecurityService};

pub use router::audit_routes;

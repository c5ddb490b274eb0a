pub mod audit;
pub mod password;

pub use audit::AuditService;
pub use password::PasswordSecurityService;

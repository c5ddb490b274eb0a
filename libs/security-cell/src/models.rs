use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use shared_models::auth::Role;
use shared_utils::extractor::ClientInfo;

// =====================================================================================
// AUDIT MODELS
// =====================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    Login,
    Logout,
    SyncUpdate,
    PaymentUpdate,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "create",
            AuditAction::Update => "update",
            AuditAction::Delete => "delete",
            AuditAction::Login => "login",
            AuditAction::Logout => "logout",
            AuditAction::SyncUpdate => "sync_update",
            AuditAction::PaymentUpdate => "payment_update",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(AuditAction::Create),
            "update" => Ok(AuditAction::Update),
            "delete" => Ok(AuditAction::Delete),
            "login" => Ok(AuditAction::Login),
            "logout" => Ok(AuditAction::Logout),
            "sync_update" => Ok(AuditAction::SyncUpdate),
            "payment_update" => Ok(AuditAction::PaymentUpdate),
            other => Err(format!("Unknown audit action: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    User,
    Doctor,
    Patient,
    Appointment,
    Consultation,
    Prescription,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::User => "user",
            EntityType::Doctor => "doctor",
            EntityType::Patient => "patient",
            EntityType::Appointment => "appointment",
            EntityType::Consultation => "consultation",
            EntityType::Prescription => "prescription",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(EntityType::User),
            "doctor" => Ok(EntityType::Doctor),
            "patient" => Ok(EntityType::Patient),
            "appointment" => Ok(EntityType::Appointment),
            "consultation" => Ok(EntityType::Consultation),
            "prescription" => Ok(EntityType::Prescription),
            other => Err(format!("Unknown entity type: {}", other)),
        }
    }
}

/// Typed context attached to an audit record, one variant per event shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditContext {
    Cancellation {
        reason: Option<String>,
    },
    MarkAttended,
    SoftDelete,
    Login {
        role: Role,
    },
    Logout,
    PasswordChange,
    UserCreated {
        role: Role,
    },
    BillingSync {
        external_code: String,
        sync_type: String,
        patient_created: bool,
    },
    PatientFromSync {
        external_code: String,
    },
    PaymentUpdate {
        external_code: String,
        transaction_id: Option<String>,
        payment_date: Option<String>,
    },
    PrescriptionStatus {
        status: String,
    },
}

/// An audit record about to be written.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub user_id: Option<Uuid>,
    pub action: AuditAction,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub old_data: Option<Value>,
    pub new_data: Option<Value>,
    pub context: Option<AuditContext>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl AuditEntry {
    pub fn new(action: AuditAction, entity_type: EntityType, entity_id: impl ToString) -> Self {
        Self {
            user_id: None,
            action,
            entity_type,
            entity_id: entity_id.to_string(),
            old_data: None,
            new_data: None,
            context: None,
            ip_address: None,
            user_agent: None,
        }
    }

    pub fn with_user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_old<T: Serialize>(mut self, old: &T) -> Self {
        self.old_data = serde_json::to_value(old).ok();
        self
    }

    pub fn with_new<T: Serialize>(mut self, new: &T) -> Self {
        self.new_data = serde_json::to_value(new).ok();
        self
    }

    pub fn with_context(mut self, context: AuditContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_client(mut self, client: &ClientInfo) -> Self {
        self.ip_address = client.ip_address.clone();
        self.user_agent = client.user_agent.clone();
        self
    }
}

/// A stored audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLog {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub action: AuditAction,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub old_data: Option<Value>,
    pub new_data: Option<Value>,
    pub context: Option<Value>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    pub limit: Option<u32>,
}

// =====================================================================================
// PASSWORD MODELS
// =====================================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SecurityError {
    #[error("Password must be at least {0} characters long")]
    PasswordTooShort(usize),

    #[error("Password hashing failed: {0}")]
    Hashing(String),
}

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Employer,
    Employee,
    Admin,
}

impl UserRole {
    pub fn to_str(&self) -> &str {
        match self {
            UserRole::Employer => "employer",
            UserRole::Employee => "employee",
            UserRole::Admin => "admin",
        }
    }
}

/// Caller identity as vouched for by the identity provider. Users themselves
/// live outside this service; only the id and role are carried.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub id: Uuid,
    pub role: UserRole,
}

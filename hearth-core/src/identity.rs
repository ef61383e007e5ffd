use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who is acting on an order. Also used to record who cancelled it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ActorRole {
    Customer,
    Provider,
    Admin,
    System,
}

impl ActorRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorRole::Customer => "customer",
            ActorRole::Provider => "provider",
            ActorRole::Admin => "admin",
            ActorRole::System => "system",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "customer" => Some(ActorRole::Customer),
            "provider" => Some(ActorRole::Provider),
            "admin" => Some(ActorRole::Admin),
            "system" => Some(ActorRole::System),
            _ => None,
        }
    }
}

impl std::fmt::Display for ActorRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Actor {
    /// `None` for the system (dispatch, timeouts, expiry sweep).
    pub id: Option<Uuid>,
    pub role: ActorRole,
}

impl Actor {
    pub fn customer(id: Uuid) -> Self {
        Self { id: Some(id), role: ActorRole::Customer }
    }

    pub fn provider(id: Uuid) -> Self {
        Self { id: Some(id), role: ActorRole::Provider }
    }

    pub fn admin(id: Uuid) -> Self {
        Self { id: Some(id), role: ActorRole::Admin }
    }

    pub fn system() -> Self {
        Self { id: None, role: ActorRole::System }
    }

    pub fn is_admin(&self) -> bool {
        self.role == ActorRole::Admin
    }
}

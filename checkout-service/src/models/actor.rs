use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Master,
    Partner,
    Employee,
    Customer,
    /// Internal callers such as webhook reconciliation. Never accepted from headers.
    System,
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "master" => Ok(Role::Master),
            "partner" => Ok(Role::Partner),
            "employee" => Ok(Role::Employee),
            "customer" => Ok(Role::Customer),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// The authenticated user on whose behalf an operation runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: String,
    pub role: Role,
    /// Owning partner, for employees.
    pub partner_id: Option<String>,
}

impl Actor {
    pub fn new(id: impl Into<String>, role: Role, partner_id: Option<String>) -> Self {
        Self {
            id: id.into(),
            role,
            partner_id,
        }
    }

    pub fn system(component: &str) -> Self {
        Self::new(format!("system:{}", component), Role::System, None)
    }

    /// Partner on whose behalf this actor owns coupons.
    pub fn owning_partner(&self) -> Option<&str> {
        match self.role {
            Role::Partner => Some(self.id.as_str()),
            Role::Employee => self.partner_id.as_deref(),
            _ => None,
        }
    }
}

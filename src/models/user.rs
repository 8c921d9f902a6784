use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Installer,
    Customer,
}

impl Role {
    /// Installers and admins may change control settings and edit the diagram
    pub fn can_edit(&self) -> bool {
        matches!(self, Role::Admin | Role::Installer)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    pub role: Role,
    /// Installation this user belongs to
    pub customer_id: String,
}

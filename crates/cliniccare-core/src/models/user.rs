use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    #[default]
    Doctor,
}

impl Role {
    pub fn display_name(&self) -> &'static str {
        match self {
            Role::Admin => "Admin",
            Role::Doctor => "Doctor",
        }
    }
}

fn default_active() -> bool {
    true
}

/// A staff account as returned by the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub role: Role,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

impl User {
    /// Full name when set, email otherwise
    pub fn display_name(&self) -> &str {
        self.full_name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(&self.email)
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn status_display(&self) -> &'static str {
        if self.is_active {
            "Active"
        } else {
            "Inactive"
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct UserCreate {
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    pub role: Role,
    pub is_active: bool,
    pub password: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_user() {
        let json = r#"{"email": "house@clinic.test", "full_name": "Gregory House", "role": "admin", "is_active": true, "id": "6f1c1e52-7a0b-4f51-9d43-3c1b0a3f8e21"}"#;
        let user: User = serde_json::from_str(json).expect("Failed to parse user test JSON");
        assert_eq!(user.display_name(), "Gregory House");
        assert!(user.is_admin());
        assert_eq!(user.status_display(), "Active");
    }

    #[test]
    fn test_user_defaults_and_display_name_fallback() {
        let json = r#"{"email": "wilson@clinic.test", "id": "00000000-0000-0000-0000-000000000001"}"#;
        let user: User = serde_json::from_str(json).expect("Failed to parse user test JSON");
        assert_eq!(user.role, Role::Doctor);
        assert!(user.is_active);
        assert_eq!(user.display_name(), "wilson@clinic.test");
    }

    #[test]
    fn test_role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Admin).unwrap(), r#""admin""#);
        assert_eq!(serde_json::to_string(&Role::Doctor).unwrap(), r#""doctor""#);
    }
}

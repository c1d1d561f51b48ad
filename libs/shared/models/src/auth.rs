use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize)]
pub struct JwtClaims {
    pub sub: String,
    pub exp: Option<u64>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub app_metadata: Option<serde_json::Value>,
    pub user_metadata: Option<serde_json::Value>,
    pub aud: Option<String>,
    pub iat: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    pub role: Option<String>,
    pub metadata: Option<serde_json::Value>,
    /// Server-controlled claims; tenant and branch assignment live here.
    pub app_metadata: Option<serde_json::Value>,
    pub created_at: Option<DateTime<Utc>>,
}

impl User {
    /// Supabase puts "authenticated" in the top-level role claim, so the
    /// application role falls back to `app_metadata.role`.
    pub fn role_kind(&self) -> Option<Role> {
        self.role
            .as_deref()
            .and_then(Role::parse)
            .or_else(|| {
                self.app_metadata
                    .as_ref()
                    .and_then(|meta| meta.get("role"))
                    .and_then(|value| value.as_str())
                    .and_then(Role::parse)
            })
    }

    pub fn branch_id(&self) -> Option<Uuid> {
        self.app_metadata
            .as_ref()
            .and_then(|meta| meta.get("branch_id"))
            .and_then(|value| value.as_str())
            .and_then(|raw| Uuid::parse_str(raw).ok())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    SuperAdmin,
    BranchAdmin,
    Doctor,
    Pharmacist,
}

impl Role {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "super_admin" => Some(Role::SuperAdmin),
            "branch_admin" => Some(Role::BranchAdmin),
            "doctor" => Some(Role::Doctor),
            "pharmacist" => Some(Role::Pharmacist),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::SuperAdmin => write!(f, "super_admin"),
            Role::BranchAdmin => write!(f, "branch_admin"),
            Role::Doctor => write!(f, "doctor"),
            Role::Pharmacist => write!(f, "pharmacist"),
        }
    }
}

/// Per-request caller context handed to services instead of ambient globals.
#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: String,
    pub role: Option<Role>,
    pub branch_id: Option<Uuid>,
    pub token: String,
}

impl Session {
    pub fn new(user: &User, token: &str) -> Self {
        Self {
            user_id: user.id.clone(),
            role: user.role_kind(),
            branch_id: user.branch_id(),
            token: token.to_string(),
        }
    }

    pub fn is_super_admin(&self) -> bool {
        self.role == Some(Role::SuperAdmin)
    }

    /// Doctors act only for themselves; super admins act for anyone.
    pub fn can_act_for_doctor(&self, doctor_id: &Uuid) -> bool {
        if self.is_super_admin() {
            return true;
        }
        self.role == Some(Role::Doctor) && self.user_id == doctor_id.to_string()
    }

    /// Branch admins manage only their own branch.
    pub fn can_manage_branch(&self, branch_id: &Uuid) -> bool {
        if self.is_super_admin() {
            return true;
        }
        self.role == Some(Role::BranchAdmin) && self.branch_id.as_ref() == Some(branch_id)
    }

    /// Read access to a doctor's data: the doctor, or an admin of the branch in question.
    pub fn can_view_doctor(&self, doctor_id: &Uuid) -> bool {
        self.can_act_for_doctor(doctor_id) || self.role == Some(Role::BranchAdmin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user(role: &str, app_metadata: Option<serde_json::Value>) -> User {
        User {
            id: Uuid::new_v4().to_string(),
            email: None,
            role: Some(role.to_string()),
            metadata: None,
            app_metadata,
            created_at: None,
        }
    }

    #[test]
    fn test_branch_admin_scoped_to_own_branch() {
        let branch = Uuid::new_v4();
        let admin = user("branch_admin", Some(json!({ "branch_id": branch.to_string() })));
        let session = Session::new(&admin, "token");

        assert!(session.can_manage_branch(&branch));
        assert!(!session.can_manage_branch(&Uuid::new_v4()));
    }

    #[test]
    fn test_doctor_acts_only_for_self() {
        let doctor = user("doctor", None);
        let doctor_id = Uuid::parse_str(&doctor.id).unwrap();
        let session = Session::new(&doctor, "token");

        assert!(session.can_act_for_doctor(&doctor_id));
        assert!(!session.can_act_for_doctor(&Uuid::new_v4()));
        assert!(!session.can_manage_branch(&Uuid::new_v4()));
    }

    #[test]
    fn test_super_admin_unrestricted() {
        let session = Session::new(&user("super_admin", None), "token");

        assert!(session.can_act_for_doctor(&Uuid::new_v4()));
        assert!(session.can_manage_branch(&Uuid::new_v4()));
    }

    #[test]
    fn test_unknown_role_has_no_access() {
        let session = Session::new(&user("patient", None), "token");

        assert_eq!(session.role, None);
        assert!(!session.can_view_doctor(&Uuid::new_v4()));
    }
}

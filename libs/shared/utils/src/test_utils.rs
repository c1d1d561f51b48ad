use std::sync::Arc;
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use base64::{Engine as _, engine::general_purpose};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::{Session, User};

pub struct TestConfig {
    pub jwt_secret: String,
    pub supabase_url: String,
    pub supabase_anon_key: String,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "test-secret-key-for-jwt-validation-must-be-long-enough".to_string(),
            supabase_url: "http://localhost:54321".to_string(),
            supabase_anon_key: "test-anon-key".to_string(),
        }
    }
}

impl TestConfig {
    /// Points the config at a mock PostgREST server.
    pub fn with_url(url: &str) -> Self {
        Self {
            supabase_url: url.to_string(),
            ..Self::default()
        }
    }

    pub fn to_app_config(&self) -> AppConfig {
        AppConfig::new(&self.supabase_url, &self.supabase_anon_key, &self.jwt_secret)
    }

    pub fn to_arc(&self) -> Arc<AppConfig> {
        Arc::new(self.to_app_config())
    }
}

pub struct TestUser {
    pub id: String,
    pub email: String,
    pub role: String,
    pub branch_id: Option<Uuid>,
}

impl TestUser {
    pub fn new(email: &str, role: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            role: role.to_string(),
            branch_id: None,
        }
    }

    pub fn doctor(email: &str) -> Self {
        Self::new(email, "doctor")
    }

    pub fn branch_admin(email: &str, branch_id: Uuid) -> Self {
        Self {
            branch_id: Some(branch_id),
            ..Self::new(email, "branch_admin")
        }
    }

    pub fn super_admin(email: &str) -> Self {
        Self::new(email, "super_admin")
    }

    pub fn uuid(&self) -> Uuid {
        Uuid::parse_str(&self.id).expect("test user ids are uuids")
    }

    fn app_metadata(&self) -> Value {
        match self.branch_id {
            Some(branch_id) => json!({ "role": self.role, "branch_id": branch_id.to_string() }),
            None => json!({ "role": self.role }),
        }
    }

    pub fn to_user(&self) -> User {
        User {
            id: self.id.clone(),
            email: Some(self.email.clone()),
            role: Some(self.role.clone()),
            metadata: None,
            app_metadata: Some(self.app_metadata()),
            created_at: Some(Utc::now()),
        }
    }

    pub fn session(&self, token: &str) -> Session {
        Session::new(&self.to_user(), token)
    }
}

pub struct JwtTestUtils;

impl JwtTestUtils {
    pub fn create_test_token(user: &TestUser, secret: &str, exp_hours: Option<i64>) -> String {
        let now = Utc::now();
        let exp = now + Duration::hours(exp_hours.unwrap_or(24));

        let header = json!({
            "alg": "HS256",
            "typ": "JWT"
        });

        let payload = json!({
            "sub": user.id,
            "email": user.email,
            "role": user.role,
            "app_metadata": user.app_metadata(),
            "iat": now.timestamp(),
            "exp": exp.timestamp()
        });

        let header_encoded = general_purpose::URL_SAFE_NO_PAD.encode(header.to_string());
        let payload_encoded = general_purpose::URL_SAFE_NO_PAD.encode(payload.to_string());

        let signing_input = format!("{}.{}", header_encoded, payload_encoded);

        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(signing_input.as_bytes());
        let signature = mac.finalize().into_bytes();
        let signature_encoded = general_purpose::URL_SAFE_NO_PAD.encode(signature);

        format!("{}.{}", signing_input, signature_encoded)
    }

    pub fn create_expired_token(user: &TestUser, secret: &str) -> String {
        Self::create_test_token(user, secret, Some(-1))
    }

    pub fn create_invalid_signature_token(user: &TestUser) -> String {
        Self::create_test_token(user, "wrong-secret", Some(24))
    }
}

/// PostgREST row fixtures for the schedule tables.
pub struct MockSupabaseResponses;

impl MockSupabaseResponses {
    pub fn schedule_request_row(
        id: Uuid,
        doctor_id: Uuid,
        branch_id: Uuid,
        day: &str,
        start: &str,
        end: &str,
        status: &str,
    ) -> Value {
        json!({
            "id": id,
            "doctor_id": doctor_id,
            "branch_id": branch_id,
            "schedule_day": day,
            "start_time": start,
            "end_time": end,
            "max_patients": 20,
            "time_per_patient": 15,
            "status": status,
            "reason": null,
            "approval_notes": null,
            "requested_at": "2026-01-05T08:00:00Z",
            "approved_at": null,
            "updated_at": "2026-01-05T08:00:00Z"
        })
    }

    pub fn schedule_row(
        id: Uuid,
        schedule_request_id: Uuid,
        doctor_id: Uuid,
        branch_id: Uuid,
        date: &str,
    ) -> Value {
        json!({
            "id": id,
            "schedule_request_id": schedule_request_id,
            "doctor_id": doctor_id,
            "branch_id": branch_id,
            "date": date,
            "start_time": "09:00:00",
            "end_time": "14:00:00",
            "time_per_patient": 15,
            "max_patients": 20,
            "booked_slots": 0,
            "available_slots": 20,
            "is_cancelled": false
        })
    }

    pub fn modification_row(
        id: Uuid,
        doctor_id: Uuid,
        branch_id: Uuid,
        request_type: &str,
        start_date: &str,
        status: &str,
    ) -> Value {
        json!({
            "id": id,
            "doctor_id": doctor_id,
            "branch_id": branch_id,
            "request_type": request_type,
            "schedule_id": null,
            "start_date": start_date,
            "end_date": null,
            "new_start_time": null,
            "new_end_time": null,
            "new_max_patients": null,
            "parent_request_id": null,
            "reason": "Conference",
            "status": status,
            "approval_notes": null,
            "requested_at": "2026-01-05T08:00:00Z",
            "decided_at": null
        })
    }

    pub fn error_response(message: &str, code: &str) -> Value {
        json!({
            "message": message,
            "code": code
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_creation() {
        let config = TestConfig::default();
        let app_config = config.to_app_config();

        assert_eq!(app_config.supabase_url, "http://localhost:54321");
        assert_eq!(app_config.supabase_anon_key, "test-anon-key");
        assert!(!app_config.supabase_jwt_secret.is_empty());
    }

    #[test]
    fn test_branch_admin_session() {
        let branch_id = Uuid::new_v4();
        let admin = TestUser::branch_admin("admin@example.com", branch_id);
        let session = admin.session("token");

        assert!(session.can_manage_branch(&branch_id));
        assert_eq!(session.token, "token");
    }

    #[test]
    fn test_jwt_token_creation() {
        let user = TestUser::doctor("doc@example.com");
        let token = JwtTestUtils::create_test_token(&user, "test-secret", Some(1));

        assert_eq!(token.split('.').count(), 3);
    }
}

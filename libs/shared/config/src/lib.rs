use std::env;
use tracing::warn;

pub const DEFAULT_CONFLICT_BUFFER_MINUTES: i64 = 30;
pub const DEFAULT_HORIZON_WEEKS: i64 = 4;
pub const DEFAULT_PORT: u16 = 3000;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_jwt_secret: String,
    /// Minimum gap between two schedule windows of the same doctor on the same day.
    pub conflict_buffer_minutes: i64,
    /// How many weeks ahead dated schedules are materialized on approval.
    pub schedule_horizon_weeks: i64,
    pub port: u16,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            supabase_jwt_secret: env::var("SUPABASE_JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_JWT_SECRET not set, using empty value");
                    String::new()
                }),
            conflict_buffer_minutes: parse_or_default(
                "SCHEDULE_CONFLICT_BUFFER_MINUTES",
                DEFAULT_CONFLICT_BUFFER_MINUTES,
            ),
            schedule_horizon_weeks: parse_or_default(
                "SCHEDULE_HORIZON_WEEKS",
                DEFAULT_HORIZON_WEEKS,
            ),
            port: parse_or_default("PORT", DEFAULT_PORT),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    /// Config pointing at a given PostgREST endpoint with scheduling defaults.
    pub fn new(supabase_url: &str, supabase_anon_key: &str, supabase_jwt_secret: &str) -> Self {
        Self {
            supabase_url: supabase_url.to_string(),
            supabase_anon_key: supabase_anon_key.to_string(),
            supabase_jwt_secret: supabase_jwt_secret.to_string(),
            conflict_buffer_minutes: DEFAULT_CONFLICT_BUFFER_MINUTES,
            schedule_horizon_weeks: DEFAULT_HORIZON_WEEKS,
            port: DEFAULT_PORT,
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty()
            && !self.supabase_anon_key.is_empty()
            && !self.supabase_jwt_secret.is_empty()
    }
}

fn parse_or_default<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + std::fmt::Display + Copy,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} has invalid value '{}', using default {}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_uses_scheduling_defaults() {
        let config = AppConfig::new("http://localhost:54321", "anon", "secret");

        assert!(config.is_configured());
        assert_eq!(config.conflict_buffer_minutes, 30);
        assert_eq!(config.schedule_horizon_weeks, 4);
        assert_eq!(config.port, 3000);
    }

    #[test]
    fn test_missing_supabase_values_not_configured() {
        let config = AppConfig::new("", "anon", "secret");
        assert!(!config.is_configured());
    }
}

use std::env;
use std::str::FromStr;

use tracing::warn;

pub const DEFAULT_TRANSACTION_RETRIES: u32 = 25;
pub const DEFAULT_SLOT_DURATION_MINUTES: u32 = 30;
pub const DEFAULT_CURRENCY: &str = "EUR";
pub const DEFAULT_RESERVATION_GRACE_SECONDS: u32 = 120;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub firebase_database_url: String,
    pub firebase_auth_token: Option<String>,
    pub store_max_transaction_retries: u32,
    pub scheduling_utc_offset_minutes: i32,
    pub default_currency: String,
    pub default_slot_duration_minutes: u32,
    pub create_missing_slots: bool,
    pub reservation_grace_seconds: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            firebase_database_url: String::new(),
            firebase_auth_token: None,
            store_max_transaction_retries: DEFAULT_TRANSACTION_RETRIES,
            scheduling_utc_offset_minutes: 0,
            default_currency: DEFAULT_CURRENCY.to_string(),
            default_slot_duration_minutes: DEFAULT_SLOT_DURATION_MINUTES,
            create_missing_slots: false,
            reservation_grace_seconds: DEFAULT_RESERVATION_GRACE_SECONDS,
        }
    }
}

impl AppConfig {
    /// Loads a `.env` file if present, then reads the process environment.
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        let config = Self {
            firebase_database_url: env::var("FIREBASE_DATABASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|_| {
                    warn!("FIREBASE_DATABASE_URL not set, using empty value");
                    String::new()
                }),
            firebase_auth_token: env::var("FIREBASE_AUTH_TOKEN")
                .ok()
                .filter(|token| !token.is_empty()),
            store_max_transaction_retries: parse_or_default(
                "STORE_MAX_TRANSACTION_RETRIES",
                DEFAULT_TRANSACTION_RETRIES,
            ),
            scheduling_utc_offset_minutes: parse_or_default("SCHEDULING_UTC_OFFSET_MINUTES", 0),
            default_currency: env::var("DEFAULT_CURRENCY")
                .unwrap_or_else(|_| DEFAULT_CURRENCY.to_string()),
            default_slot_duration_minutes: parse_or_default(
                "DEFAULT_SLOT_DURATION_MINUTES",
                DEFAULT_SLOT_DURATION_MINUTES,
            ),
            create_missing_slots: parse_or_default("CREATE_MISSING_SLOTS", false),
            reservation_grace_seconds: parse_or_default(
                "RESERVATION_GRACE_SECONDS",
                DEFAULT_RESERVATION_GRACE_SECONDS,
            ),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.firebase_database_url.is_empty()
    }
}

fn parse_or_default<T>(key: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Debug,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} has invalid value {:?}, using default {:?}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_not_configured() {
        let config = AppConfig::default();
        assert!(!config.is_configured());
        assert_eq!(config.store_max_transaction_retries, 25);
        assert_eq!(config.default_currency, "EUR");
        assert_eq!(config.default_slot_duration_minutes, 30);
        assert!(!config.create_missing_slots);
        assert_eq!(config.reservation_grace_seconds, 120);
    }

    #[test]
    fn invalid_numeric_values_fall_back_to_default() {
        env::set_var("SCHEDULING_TEST_BAD_NUMBER", "not-a-number");
        assert_eq!(parse_or_default("SCHEDULING_TEST_BAD_NUMBER", 7u32), 7);
        env::set_var("SCHEDULING_TEST_GOOD_NUMBER", " 12 ");
        assert_eq!(parse_or_default("SCHEDULING_TEST_GOOD_NUMBER", 7u32), 12);
        assert!(!parse_or_default("SCHEDULING_TEST_UNSET_FLAG", false));
    }
}

// libs/scheduling-cell/src/models.rs
use std::collections::BTreeMap;
use std::fmt;

use chrono::{FixedOffset, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use shared_config::AppConfig;
use shared_database::StoreError;
use shared_models::auth::{User, UserRole};
use shared_utils::time::{format_date, format_hhmm, parse_date, parse_hhmm, utc_offset};

pub const DEFAULT_BUFFER_MINUTES: u32 = 15;

// ==============================================================================
// CONFIGURATION
// ==============================================================================

#[derive(Debug, Clone)]
pub struct SchedulingConfig {
    /// Offset used to turn a local date and `HH:mm` into an instant.
    pub utc_offset: FixedOffset,
    pub default_currency: String,
    pub default_slot_duration_minutes: u32,
    /// Create a slot on reservation when none exists instead of failing.
    pub create_missing_slots: bool,
    /// Reservations younger than this are left alone by reconciliation, since
    /// the booking that made them may still be writing its record.
    pub reservation_grace_millis: i64,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self::from_app_config(&AppConfig::default())
    }
}

impl SchedulingConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            utc_offset: utc_offset(config.scheduling_utc_offset_minutes),
            default_currency: config.default_currency.clone(),
            default_slot_duration_minutes: config.default_slot_duration_minutes,
            create_missing_slots: config.create_missing_slots,
            reservation_grace_millis: i64::from(config.reservation_grace_seconds) * 1000,
        }
    }
}

// ==============================================================================
// SLOTS
// ==============================================================================

/// Identity of a slot: provider, local date and local `HH:mm`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotKey {
    pub provider_id: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
}

impl SlotKey {
    pub fn new(provider_id: impl Into<String>, date: NaiveDate, time: NaiveTime) -> Self {
        Self {
            provider_id: provider_id.into(),
            date,
            time,
        }
    }

    pub fn parse(provider_id: &str, date: &str, time: &str) -> Result<Self, SchedulingError> {
        let date = parse_date(date)
            .ok_or_else(|| SchedulingError::InvalidRequest(format!("Invalid date '{}', expected yyyy-MM-dd", date)))?;
        let time = parse_hhmm(time)
            .ok_or_else(|| SchedulingError::InvalidRequest(format!("Invalid time '{}', expected HH:mm", time)))?;
        Ok(Self::new(provider_id, date, time))
    }

    /// Parses the `"yyyy-MM-dd HH:mm"` form stored on appointments.
    pub fn from_scheduled(provider_id: &str, scheduled_date_time: &str) -> Option<Self> {
        let (date, time) = scheduled_date_time.trim().split_once(' ')?;
        Self::parse(provider_id, date, time.trim()).ok()
    }

    pub fn date_str(&self) -> String {
        format_date(self.date)
    }

    pub fn time_str(&self) -> String {
        format_hhmm(self.time)
    }

    pub fn scheduled_date_time(&self) -> String {
        format!("{} {}", self.date_str(), self.time_str())
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.provider_id, self.scheduled_date_time())
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Slot {
    #[serde(default)]
    pub provider_id: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub time: String,
    #[serde(default)]
    pub service_id: String,
    #[serde(rename = "duration", default)]
    pub duration_minutes: u32,
    #[serde(default = "default_true")]
    pub is_available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub appointment_id: Option<String>,
    /// Epoch millis of the reservation that bound `appointment_id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reserved_at: Option<i64>,
}

impl Slot {
    pub fn available(key: &SlotKey, service_id: &str, duration_minutes: u32) -> Self {
        Self {
            provider_id: key.provider_id.clone(),
            date: key.date_str(),
            time: key.time_str(),
            service_id: service_id.to_string(),
            duration_minutes,
            is_available: true,
            appointment_id: None,
            reserved_at: None,
        }
    }

    /// Reads a slot document stored under `key`.
    ///
    /// Identity fields come from the path. A bare non-object value is a legacy
    /// "time only" entry and reads as an available slot; an empty
    /// `appointmentId` reads as unbound. Fields are read one by one so a
    /// malformed `duration` or `serviceId` never hides a reservation: the slot
    /// is available only when `isAvailable` is absent or literally `true` and
    /// no holder is recorded.
    pub fn from_document(key: &SlotKey, value: &Value, default_duration: u32) -> Self {
        let Value::Object(fields) = value else {
            return Slot::available(key, "", default_duration);
        };

        let appointment_id = match fields.get("appointmentId") {
            None | Some(Value::Null) => None,
            Some(Value::String(id)) if id.is_empty() => None,
            Some(Value::String(id)) => Some(id.clone()),
            Some(other) => Some(other.to_string()),
        };
        let flagged_available = match fields.get("isAvailable") {
            None | Some(Value::Null) => true,
            Some(Value::Bool(flag)) => *flag,
            Some(_) => false,
        };
        let duration_minutes = fields
            .get("duration")
            .and_then(Value::as_u64)
            .and_then(|minutes| u32::try_from(minutes).ok())
            .filter(|minutes| *minutes > 0)
            .unwrap_or(default_duration);

        Self {
            provider_id: key.provider_id.clone(),
            date: key.date_str(),
            time: key.time_str(),
            service_id: fields
                .get("serviceId")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            duration_minutes,
            is_available: flagged_available && appointment_id.is_none(),
            appointment_id,
            reserved_at: fields.get("reservedAt").and_then(Value::as_i64),
        }
    }

    pub fn is_reserved(&self) -> bool {
        !self.is_available
    }

    pub fn is_held_by(&self, appointment_id: &str) -> bool {
        self.appointment_id.as_deref() == Some(appointment_id)
    }

    /// Reserved less than `grace_millis` before `now`. Reservations without a
    /// timestamp predate it and are never recent.
    pub fn reserved_within(&self, now: i64, grace_millis: i64) -> bool {
        self.is_reserved() && self.reserved_at.is_some_and(|at| now.saturating_sub(at) < grace_millis)
    }

    pub fn key(&self) -> Option<SlotKey> {
        SlotKey::parse(&self.provider_id, &self.date, &self.time).ok()
    }
}

/// A provider's working window for one weekday.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkingHours {
    pub start: String,
    pub end: String,
}

impl Default for WorkingHours {
    fn default() -> Self {
        Self {
            start: "09:00".to_string(),
            end: "17:00".to_string(),
        }
    }
}

// ==============================================================================
// APPOINTMENTS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Confirmed,
    Cancelled,
    Completed,
    NoShow,
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Confirmed => write!(f, "confirmed"),
            AppointmentStatus::Cancelled => write!(f, "cancelled"),
            AppointmentStatus::Completed => write!(f, "completed"),
            AppointmentStatus::NoShow => write!(f, "no_show"),
        }
    }
}

/// Service category. Unknown stored values read as `Health`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(from = "String", into = "String")]
pub enum ServiceCategory {
    #[default]
    Health,
    Wellness,
    Technical,
    Educational,
    Auto,
}

impl ServiceCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceCategory::Health => "health",
            ServiceCategory::Wellness => "wellness",
            ServiceCategory::Technical => "technical",
            ServiceCategory::Educational => "educational",
            ServiceCategory::Auto => "auto",
        }
    }

    pub fn from_value(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "wellness" => ServiceCategory::Wellness,
            "technical" => ServiceCategory::Technical,
            "educational" => ServiceCategory::Educational,
            "auto" => ServiceCategory::Auto,
            _ => ServiceCategory::Health,
        }
    }
}

impl From<String> for ServiceCategory {
    fn from(value: String) -> Self {
        Self::from_value(&value)
    }
}

impl From<ServiceCategory> for String {
    fn from(value: ServiceCategory) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for ServiceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CancelledBy {
    User,
    Provider,
}

impl From<&User> for CancelledBy {
    fn from(user: &User) -> Self {
        match user.role {
            UserRole::User => CancelledBy::User,
            UserRole::Provider => CancelledBy::Provider,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    pub id: String,
    pub user_id: String,
    #[serde(default)]
    pub user_name: String,
    pub provider_id: String,
    #[serde(default)]
    pub provider_name: String,
    pub service_id: String,
    #[serde(default)]
    pub service_name: String,
    #[serde(default)]
    pub category: ServiceCategory,
    /// Scheduled instant, epoch milliseconds. Also the reverse index value.
    pub appointment_date: i64,
    /// `"yyyy-MM-dd HH:mm"`, the slot this appointment occupies.
    pub scheduled_date_time: String,
    #[serde(rename = "duration")]
    pub duration_minutes: u32,
    pub price: f64,
    pub currency: String,
    pub status: AppointmentStatus,
    #[serde(default)]
    pub notes: String,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled_by: Option<CancelledBy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled_reason: Option<String>,
}

impl Appointment {
    pub fn slot_key(&self) -> Option<SlotKey> {
        SlotKey::from_scheduled(&self.provider_id, &self.scheduled_date_time)
    }

    pub fn is_confirmed(&self) -> bool {
        self.status == AppointmentStatus::Confirmed
    }
}

// ==============================================================================
// REQUEST MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAppointmentRequest {
    pub user_id: String,
    #[serde(default)]
    pub user_name: String,
    pub provider_id: String,
    #[serde(default)]
    pub provider_name: String,
    pub service_id: String,
    #[serde(default)]
    pub service_name: String,
    #[serde(default)]
    pub category: ServiceCategory,
    /// `yyyy-MM-dd`
    pub date: String,
    /// `HH:mm`
    pub time: String,
    pub duration_minutes: u32,
    pub price: f64,
    pub currency: Option<String>,
    pub notes: Option<String>,
}

/// Filters for listing a user's or provider's appointments.
#[derive(Debug, Clone, Default)]
pub struct AppointmentQuery {
    /// Inclusive lower bound on the scheduled instant, epoch millis.
    pub from: Option<i64>,
    /// Inclusive upper bound on the scheduled instant, epoch millis.
    pub to: Option<i64>,
    pub status: Option<AppointmentStatus>,
    pub category: Option<ServiceCategory>,
}

impl AppointmentQuery {
    pub fn matches(&self, appointment: &Appointment) -> bool {
        self.status.map_or(true, |s| appointment.status == s)
            && self.category.map_or(true, |c| appointment.category == c)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexOwner {
    User(String),
    Provider(String),
}

impl IndexOwner {
    pub fn id(&self) -> &str {
        match self {
            IndexOwner::User(id) | IndexOwner::Provider(id) => id,
        }
    }

    /// Appointment field holding the owner id.
    pub fn appointment_field(&self) -> &'static str {
        match self {
            IndexOwner::User(_) => "userId",
            IndexOwner::Provider(_) => "providerId",
        }
    }
}

// ==============================================================================
// ANALYTICS
// ==============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CategoryAnalytics {
    pub count: u32,
    pub duration: u32,
    pub cost: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyAnalytics {
    pub month: String,
    #[serde(default)]
    pub total_appointments: u32,
    #[serde(default)]
    pub total_duration: u32,
    #[serde(default)]
    pub total_cost: f64,
    pub currency: String,
    #[serde(default)]
    pub by_category: BTreeMap<String, CategoryAnalytics>,
}

impl MonthlyAnalytics {
    pub fn empty(month: &str, currency: &str) -> Self {
        Self {
            month: month.to_string(),
            total_appointments: 0,
            total_duration: 0,
            total_cost: 0.0,
            currency: currency.to_string(),
            by_category: BTreeMap::new(),
        }
    }

    pub fn total_hours(&self) -> f64 {
        f64::from(self.total_duration) / 60.0
    }

    pub fn is_empty(&self) -> bool {
        self.total_appointments == 0 && self.by_category.is_empty()
    }

    pub fn add(&mut self, category: ServiceCategory, duration: u32, cost: f64) {
        self.total_appointments += 1;
        self.total_duration += duration;
        self.total_cost += cost;

        let bucket = self.by_category.entry(category.as_str().to_string()).or_default();
        bucket.count += 1;
        bucket.duration += duration;
        bucket.cost += cost;
    }

    /// Inverse of `add`, clamped at zero. A bucket reaching zero count is removed.
    pub fn subtract(&mut self, category: ServiceCategory, duration: u32, cost: f64) {
        self.total_appointments = self.total_appointments.saturating_sub(1);
        self.total_duration = self.total_duration.saturating_sub(duration);
        self.total_cost = (self.total_cost - cost).max(0.0);

        let key = category.as_str();
        if let Some(bucket) = self.by_category.get_mut(key) {
            bucket.count = bucket.count.saturating_sub(1);
            bucket.duration = bucket.duration.saturating_sub(duration);
            bucket.cost = (bucket.cost - cost).max(0.0);
            if bucket.count == 0 {
                self.by_category.remove(key);
            }
        }
    }
}

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Error, Debug)]
pub enum SchedulingError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Appointment slot not available")]
    SlotUnavailable,

    #[error("Appointment slot not found")]
    SlotNotFound,

    #[error("Appointment not found")]
    NotFound,

    #[error("Appointment cannot be modified in current status: {0}")]
    InvalidState(AppointmentStatus),

    #[error("Corrupt document at {path}: {reason}")]
    CorruptDocument { path: String, reason: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl SchedulingError {
    /// Transient I/O the caller may retry with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SchedulingError::Store(_))
    }

    pub(crate) fn corrupt(path: &str, reason: impl fmt::Display) -> Self {
        SchedulingError::CorruptDocument {
            path: path.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key() -> SlotKey {
        SlotKey::parse("p1", "2026-03-02", "09:45").unwrap()
    }

    #[test]
    fn slot_key_round_trips_scheduled_form() {
        let key = key();
        assert_eq!(key.scheduled_date_time(), "2026-03-02 09:45");
        assert_eq!(SlotKey::from_scheduled("p1", "2026-03-02 09:45"), Some(key));
        assert_eq!(SlotKey::from_scheduled("p1", "2026-03-02T09:45"), None);
    }

    #[test]
    fn slot_document_uses_camel_case_and_omits_unbound_appointment() {
        let slot = Slot::available(&key(), "s1", 30);
        let doc = serde_json::to_value(&slot).unwrap();
        assert_eq!(
            doc,
            json!({
                "providerId": "p1",
                "date": "2026-03-02",
                "time": "09:45",
                "serviceId": "s1",
                "duration": 30,
                "isAvailable": true,
            })
        );
    }

    #[test]
    fn legacy_slot_documents_are_tolerated() {
        let slot = Slot::from_document(&key(), &json!(true), 30);
        assert!(slot.is_available);
        assert_eq!(slot.duration_minutes, 30);

        let slot = Slot::from_document(
            &key(),
            &json!({"isAvailable": true, "appointmentId": "", "serviceId": "s1"}),
            30,
        );
        assert_eq!(slot.appointment_id, None);
        assert_eq!(slot.time, "09:45");
    }

    #[test]
    fn malformed_fields_never_hide_a_reservation() {
        let slot = Slot::from_document(
            &key(),
            &json!({"isAvailable": false, "appointmentId": "a1", "duration": "30"}),
            30,
        );
        assert!(slot.is_reserved());
        assert_eq!(slot.appointment_id.as_deref(), Some("a1"));
        assert_eq!(slot.duration_minutes, 30);

        let slot = Slot::from_document(&key(), &json!({"isAvailable": "yes", "duration": -5}), 30);
        assert!(slot.is_reserved());
        assert_eq!(slot.duration_minutes, 30);

        let slot = Slot::from_document(&key(), &json!({"isAvailable": true, "appointmentId": "a2"}), 30);
        assert!(slot.is_reserved());
        assert!(slot.is_held_by("a2"));
    }

    #[test]
    fn unknown_category_reads_as_health() {
        let category: ServiceCategory = serde_json::from_value(json!("plumbing")).unwrap();
        assert_eq!(category, ServiceCategory::Health);
        assert_eq!(serde_json::to_value(ServiceCategory::Auto).unwrap(), json!("auto"));
    }

    #[test]
    fn analytics_subtract_clamps_and_drops_empty_bucket() {
        let mut analytics = MonthlyAnalytics::empty("2026-03", "EUR");
        analytics.add(ServiceCategory::Health, 30, 20.0);
        analytics.subtract(ServiceCategory::Health, 45, 25.0);

        assert_eq!(analytics.total_appointments, 0);
        assert_eq!(analytics.total_duration, 0);
        assert_eq!(analytics.total_cost, 0.0);
        assert!(analytics.by_category.is_empty());

        analytics.subtract(ServiceCategory::Wellness, 10, 5.0);
        assert!(analytics.is_empty());
    }

    #[test]
    fn cancelled_by_follows_caller_role() {
        let provider = User::new("p1", UserRole::Provider);
        assert_eq!(CancelledBy::from(&provider), CancelledBy::Provider);
        assert_eq!(CancelledBy::from(&User::new("u1", UserRole::User)), CancelledBy::User);
    }
}

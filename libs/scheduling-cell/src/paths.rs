// libs/scheduling-cell/src/paths.rs
//
// Store layout:
//   availability/{providerId}/{yyyy-MM-dd}/{HH:mm}
//   appointments/{appointmentId}
//   indexes/appointments_by_user/{userId}/{appointmentId}         -> epoch millis
//   indexes/appointments_by_provider/{providerId}/{appointmentId} -> epoch millis
//   analytics/user_monthly/{userId}/{yyyy-MM}
//   users/providers/{providerId}/workingHours/{weekday}

use crate::models::{IndexOwner, SlotKey};

pub const AVAILABILITY: &str = "availability";
pub const APPOINTMENTS: &str = "appointments";
pub const USER_INDEX: &str = "indexes/appointments_by_user";
pub const PROVIDER_INDEX: &str = "indexes/appointments_by_provider";
pub const USER_MONTHLY_ANALYTICS: &str = "analytics/user_monthly";

pub fn provider_availability(provider_id: &str) -> String {
    format!("{}/{}", AVAILABILITY, provider_id)
}

pub fn slots_for_date(provider_id: &str, date: &str) -> String {
    format!("{}/{}/{}", AVAILABILITY, provider_id, date)
}

pub fn slot(key: &SlotKey) -> String {
    format!(
        "{}/{}/{}/{}",
        AVAILABILITY,
        key.provider_id,
        key.date_str(),
        key.time_str()
    )
}

pub fn appointment(appointment_id: &str) -> String {
    format!("{}/{}", APPOINTMENTS, appointment_id)
}

pub fn index(owner: &IndexOwner) -> String {
    match owner {
        IndexOwner::User(id) => format!("{}/{}", USER_INDEX, id),
        IndexOwner::Provider(id) => format!("{}/{}", PROVIDER_INDEX, id),
    }
}

pub fn index_entry(owner: &IndexOwner, appointment_id: &str) -> String {
    format!("{}/{}", index(owner), appointment_id)
}

pub fn monthly_analytics(user_id: &str, month: &str) -> String {
    format!("{}/{}/{}", USER_MONTHLY_ANALYTICS, user_id, month)
}

pub fn working_hours(provider_id: &str, weekday: &str) -> String {
    format!("users/providers/{}/workingHours/{}", provider_id, weekday)
}

/// Rejects ids that would escape their path segment.
pub fn is_valid_key(value: &str) -> bool {
    !value.trim().is_empty()
        && !value.contains(['/', '.', '$', '#', '[', ']'])
        && !value.chars().any(char::is_control)
}

#![allow(dead_code)]

use std::sync::Arc;

use shared_database::{DocumentStore, InMemoryStore};
use shared_utils::test_utils::{init_test_tracing, TestConfig};
use shared_utils::time::{parse_date, parse_hhmm};

use scheduling_cell::{
    AppointmentBookingService, CreateAppointmentRequest, SchedulingConfig, ServiceCategory, Slot,
    SlotGenerationConfig,
};

pub const PROVIDER: &str = "provider-1";
pub const SERVICE: &str = "service-1";
pub const DATE: &str = "2026-03-02";

pub fn test_config() -> SchedulingConfig {
    SchedulingConfig::from_app_config(&TestConfig::default().to_app_config())
}

pub fn booking_service(store: Arc<dyn DocumentStore>) -> AppointmentBookingService {
    init_test_tracing();
    AppointmentBookingService::new(store, test_config())
}

/// In-memory store plus a service over it; the store handle allows snapshots.
pub fn in_memory_service() -> (Arc<InMemoryStore>, AppointmentBookingService) {
    let store = Arc::new(InMemoryStore::new());
    let service = booking_service(Arc::clone(&store) as Arc<dyn DocumentStore>);
    (store, service)
}

pub fn day_config(start: &str, end: &str, duration: u32, buffer: u32) -> SlotGenerationConfig {
    SlotGenerationConfig::new(
        PROVIDER,
        SERVICE,
        parse_date(DATE).unwrap(),
        parse_hhmm(start).unwrap(),
        parse_hhmm(end).unwrap(),
        duration,
    )
    .with_buffer(buffer)
}

/// 09:00-12:00, 30 minute slots, 15 minute buffer: 09:00, 09:45, 10:30, 11:15.
pub async fn seed_morning(service: &AppointmentBookingService) -> Vec<Slot> {
    service
        .availability()
        .generate_slots(&day_config("09:00", "12:00", 30, 15))
        .await
        .unwrap()
}

pub fn request(user_id: &str, time: &str) -> CreateAppointmentRequest {
    CreateAppointmentRequest {
        user_id: user_id.to_string(),
        user_name: "Test User".to_string(),
        provider_id: PROVIDER.to_string(),
        provider_name: "Test Provider".to_string(),
        service_id: SERVICE.to_string(),
        service_name: "Consultation".to_string(),
        category: ServiceCategory::Health,
        date: DATE.to_string(),
        time: time.to_string(),
        duration_minutes: 30,
        price: 20.0,
        currency: Some("EUR".to_string()),
        notes: None,
    }
}

pub fn priced(user_id: &str, time: &str, duration_minutes: u32, price: f64) -> CreateAppointmentRequest {
    CreateAppointmentRequest {
        duration_minutes,
        price,
        ..request(user_id, time)
    }
}

pub async fn slot_at(service: &AppointmentBookingService, time: &str) -> Option<Slot> {
    service
        .list_slots(PROVIDER, DATE)
        .await
        .unwrap()
        .into_iter()
        .find(|slot| slot.time == time)
}

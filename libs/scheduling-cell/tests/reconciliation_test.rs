mod common;

use assert_matches::assert_matches;
use serde_json::json;

use shared_database::DocumentStore;

use scheduling_cell::{CancelledBy, IndexOwner, SchedulingError, SlotKey};

use common::*;

fn key(time: &str) -> SlotKey {
    SlotKey::parse(PROVIDER, DATE, time).unwrap()
}

/// Moves a reservation's timestamp out of the grace period.
async fn age_reservation(store: &dyn DocumentStore, time: &str) {
    store
        .set(&format!("availability/{}/{}/{}/reservedAt", PROVIDER, DATE, time), json!(0))
        .await
        .unwrap();
}

#[tokio::test]
async fn consistent_provider_reports_clean() {
    let (_, service) = in_memory_service();
    seed_morning(&service).await;
    service.create_appointment(request("user-a", "09:00")).await.unwrap();

    let report = service.reconciliation().reconcile_provider(PROVIDER).await.unwrap();
    assert!(report.is_clean());
}

#[tokio::test]
async fn releases_slots_without_a_live_holder() {
    let (store, service) = in_memory_service();
    seed_morning(&service).await;

    // Held by an appointment that was never written.
    service.availability().reserve_slot(&key("09:00"), "ghost").await.unwrap();
    age_reservation(store.as_ref(), "09:00").await;

    // Held by an appointment whose cancellation never released it.
    let cancelled = service.create_appointment(request("user-a", "09:45")).await.unwrap();
    store
        .set(&format!("appointments/{}/status", cancelled.id), json!("cancelled"))
        .await
        .unwrap();

    let report = service.reconciliation().reconcile_provider(PROVIDER).await.unwrap();
    assert_eq!(report.released, vec![key("09:00"), key("09:45")]);
    assert!(report.rebound.is_empty());
    assert!(slot_at(&service, "09:00").await.unwrap().is_available);
    assert!(slot_at(&service, "09:45").await.unwrap().is_available);
}

#[tokio::test]
async fn rebinds_confirmed_appointments_after_regeneration() {
    let (_, service) = in_memory_service();
    seed_morning(&service).await;
    let appointment = service.create_appointment(request("user-a", "10:30")).await.unwrap();

    // Regenerating the date wipes the reservation.
    seed_morning(&service).await;
    assert!(slot_at(&service, "10:30").await.unwrap().is_available);

    let report = service.reconciliation().reconcile_provider(PROVIDER).await.unwrap();
    assert_eq!(report.rebound, vec![key("10:30")]);

    let slot = slot_at(&service, "10:30").await.unwrap();
    assert_eq!(slot.appointment_id.as_deref(), Some(appointment.id.as_str()));
}

#[tokio::test]
async fn reports_appointments_whose_slot_is_gone() {
    let (_, service) = in_memory_service();
    seed_morning(&service).await;
    let appointment = service.create_appointment(request("user-a", "11:15")).await.unwrap();

    service
        .availability()
        .generate_slots(&day_config("09:00", "10:00", 30, 0))
        .await
        .unwrap();

    let report = service.reconciliation().reconcile_provider(PROVIDER).await.unwrap();
    assert_eq!(report.unresolved, vec![appointment.id]);
}

#[tokio::test]
async fn moved_appointment_keeps_only_its_current_slot() {
    let (store, service) = in_memory_service();
    seed_morning(&service).await;
    let appointment = service.create_appointment(request("user-a", "09:00")).await.unwrap();
    service
        .cancel_appointment(&appointment.id, CancelledBy::User, None)
        .await
        .unwrap();

    let other = service.create_appointment(request("user-b", "09:45")).await.unwrap();
    store
        .set(
            &format!("availability/{}/{}/11:15", PROVIDER, DATE),
            json!({"isAvailable": false, "appointmentId": other.id.as_str(), "duration": 30}),
        )
        .await
        .unwrap();

    let report = service.reconciliation().reconcile_provider(PROVIDER).await.unwrap();
    assert_eq!(report.released, vec![key("11:15")]);
    assert!(!slot_at(&service, "09:45").await.unwrap().is_available);

    // Index drift is repaired separately.
    let rebuilt = service
        .indexes()
        .rebuild(&IndexOwner::Provider(PROVIDER.to_string()))
        .await
        .unwrap();
    assert_eq!(rebuilt, 2);
}

#[tokio::test]
async fn fresh_reservation_of_an_unwritten_booking_is_kept() {
    let (store, service) = in_memory_service();
    seed_morning(&service).await;

    // Reserved, record not yet written.
    service.availability().reserve_slot(&key("09:00"), "in-flight").await.unwrap();

    let report = service.reconciliation().reconcile_provider(PROVIDER).await.unwrap();
    assert!(report.released.is_empty());
    let slot = slot_at(&service, "09:00").await.unwrap();
    assert!(slot.is_held_by("in-flight"));
    assert_matches!(
        service.create_appointment(request("user-b", "09:00")).await,
        Err(SchedulingError::SlotUnavailable)
    );

    // Once the grace period has passed it is abandoned.
    age_reservation(store.as_ref(), "09:00").await;
    let report = service.reconciliation().reconcile_provider(PROVIDER).await.unwrap();
    assert_eq!(report.released, vec![key("09:00")]);
}

#[tokio::test]
async fn fresh_reschedule_target_is_kept() {
    let (_, service) = in_memory_service();
    seed_morning(&service).await;
    let appointment = service.create_appointment(request("user-a", "09:00")).await.unwrap();

    // Destination reserved, record still points at 09:00.
    service.availability().reserve_slot(&key("10:30"), &appointment.id).await.unwrap();

    let report = service.reconciliation().reconcile_provider(PROVIDER).await.unwrap();
    assert!(report.is_clean());
    assert!(slot_at(&service, "10:30").await.unwrap().is_held_by(&appointment.id));
    assert!(slot_at(&service, "09:00").await.unwrap().is_held_by(&appointment.id));
}

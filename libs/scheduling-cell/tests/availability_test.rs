mod common;

use assert_matches::assert_matches;

use shared_database::DocumentStore;
use shared_utils::time::parse_date;

use scheduling_cell::{SchedulingError, SlotKey};

use common::*;

#[tokio::test]
async fn generate_reserve_release_round_trips() {
    let (_, service) = in_memory_service();
    let generated = seed_morning(&service).await;
    let availability = service.availability();
    let date = parse_date(DATE).unwrap();

    let listed = availability.list_slots(PROVIDER, date).await.unwrap();
    assert_eq!(listed, generated);

    let key = SlotKey::parse(PROVIDER, DATE, "10:30").unwrap();
    let reserved = availability.reserve_slot(&key, "appt-1").await.unwrap();
    assert!(reserved.is_reserved());
    assert_eq!(availability.list_available_slots(PROVIDER, date).await.unwrap().len(), 3);

    availability.release_slot(&key).await.unwrap();
    availability.release_slot(&key).await.unwrap();
    assert_eq!(availability.list_slots(PROVIDER, date).await.unwrap(), generated);
}

#[tokio::test]
async fn regenerating_replaces_the_whole_date() {
    let (store, service) = in_memory_service();
    seed_morning(&service).await;
    let availability = service.availability();

    let afternoon = availability
        .generate_slots(&day_config("14:00", "15:00", 60, 0))
        .await
        .unwrap();
    assert_eq!(afternoon.len(), 1);

    let day = store
        .get(&format!("availability/{}/{}", PROVIDER, DATE))
        .await
        .unwrap()
        .unwrap();
    let times: Vec<&String> = day.as_object().unwrap().keys().collect();
    assert_eq!(times, vec!["14:00"]);
}

#[tokio::test]
async fn invalid_generation_writes_nothing() {
    let (store, service) = in_memory_service();
    let result = service
        .availability()
        .generate_slots(&day_config("12:00", "09:00", 30, 15))
        .await;

    assert_matches!(result, Err(SchedulingError::InvalidRequest(_)));
    assert_eq!(store.get("availability").await.unwrap(), None);
}

#[tokio::test]
async fn service_filter_and_clear() {
    let (_, service) = in_memory_service();
    seed_morning(&service).await;
    let availability = service.availability();
    let date = parse_date(DATE).unwrap();

    assert_eq!(availability.list_slots_for_service(PROVIDER, date, SERVICE).await.unwrap().len(), 4);
    assert!(availability
        .list_slots_for_service(PROVIDER, date, "other-service")
        .await
        .unwrap()
        .is_empty());

    availability.clear_slots_for_date(PROVIDER, date).await.unwrap();
    assert!(availability.list_slots(PROVIDER, date).await.unwrap().is_empty());
}

#[tokio::test]
async fn find_slots_held_by_scans_every_date() {
    let (_, service) = in_memory_service();
    seed_morning(&service).await;
    let availability = service.availability();
    availability
        .generate_slots(&scheduling_cell::SlotGenerationConfig {
            date: parse_date("2026-03-03").unwrap(),
            ..day_config("09:00", "10:00", 30, 0)
        })
        .await
        .unwrap();

    availability
        .reserve_slot(&SlotKey::parse(PROVIDER, DATE, "09:00").unwrap(), "appt-1")
        .await
        .unwrap();
    availability
        .reserve_slot(&SlotKey::parse(PROVIDER, "2026-03-03", "09:30").unwrap(), "appt-1")
        .await
        .unwrap();
    availability
        .reserve_slot(&SlotKey::parse(PROVIDER, DATE, "09:45").unwrap(), "appt-2")
        .await
        .unwrap();

    let held = availability.find_slots_held_by(PROVIDER, "appt-1").await.unwrap();
    let labels: Vec<String> = held.iter().map(|s| format!("{} {}", s.date, s.time)).collect();
    assert_eq!(labels, vec!["2026-03-02 09:00", "2026-03-03 09:30"]);
}

#[tokio::test]
async fn list_slots_rejects_malformed_dates() {
    let (_, service) = in_memory_service();
    assert_matches!(
        service.list_slots(PROVIDER, "02/03/2026").await,
        Err(SchedulingError::InvalidRequest(_))
    );
    assert!(service.list_slots(PROVIDER, "2026-03-09").await.unwrap().is_empty());
}

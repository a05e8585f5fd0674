// libs/scheduling-cell/src/services/availability.rs
use std::sync::Arc;

use chrono::NaiveDate;
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};

use shared_database::{AtomicOutcome, DocumentStore, TransactionResult};
use shared_utils::time::{format_date, now_millis, parse_date, parse_hhmm, weekday_key};

use crate::models::{SchedulingConfig, SchedulingError, Slot, SlotKey, WorkingHours};
use crate::paths;
use crate::services::slot_generator::{build_slots, SlotGenerationConfig};

/// Owns the `availability/` subtree. Reservation and release are the only
/// race-safe mutations; everything else is a plain read or bulk replace.
pub struct AvailabilityService {
    store: Arc<dyn DocumentStore>,
    config: SchedulingConfig,
}

impl AvailabilityService {
    pub fn new(store: Arc<dyn DocumentStore>, config: SchedulingConfig) -> Self {
        Self { store, config }
    }

    /// Slots for one provider and date, ordered by time.
    #[instrument(skip(self))]
    pub async fn list_slots(&self, provider_id: &str, date: NaiveDate) -> Result<Vec<Slot>, SchedulingError> {
        let path = paths::slots_for_date(provider_id, &format_date(date));
        let node = self.store.get(&path).await?;
        Ok(self.slots_from_date_node(provider_id, date, node.as_ref()))
    }

    pub async fn list_slots_for_service(
        &self,
        provider_id: &str,
        date: NaiveDate,
        service_id: &str,
    ) -> Result<Vec<Slot>, SchedulingError> {
        let slots = self.list_slots(provider_id, date).await?;
        Ok(slots.into_iter().filter(|s| s.service_id == service_id).collect())
    }

    pub async fn list_available_slots(
        &self,
        provider_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<Slot>, SchedulingError> {
        let slots = self.list_slots(provider_id, date).await?;
        Ok(slots.into_iter().filter(|s| s.is_available).collect())
    }

    pub async fn get_slot(&self, key: &SlotKey) -> Result<Option<Slot>, SchedulingError> {
        let value = self.store.get(&paths::slot(key)).await?;
        Ok(value.map(|v| Slot::from_document(key, &v, self.config.default_slot_duration_minutes)))
    }

    /// Every slot the provider has on any date.
    pub async fn list_provider_slots(&self, provider_id: &str) -> Result<Vec<Slot>, SchedulingError> {
        let node = self.store.get(&paths::provider_availability(provider_id)).await?;
        let Some(Value::Object(dates)) = node else {
            return Ok(Vec::new());
        };

        let mut slots = Vec::new();
        for (date, day) in &dates {
            match parse_date(date) {
                Some(date) => slots.extend(self.slots_from_date_node(provider_id, date, Some(day))),
                None => warn!("Skipping malformed availability date '{}' for provider {}", date, provider_id),
            }
        }
        slots.sort_by(|a, b| (&a.date, &a.time).cmp(&(&b.date, &b.time)));
        Ok(slots)
    }

    /// Slots of `provider_id` currently bound to `appointment_id`.
    pub async fn find_slots_held_by(
        &self,
        provider_id: &str,
        appointment_id: &str,
    ) -> Result<Vec<Slot>, SchedulingError> {
        let slots = self.list_provider_slots(provider_id).await?;
        Ok(slots
            .into_iter()
            .filter(|s| s.is_reserved() && s.is_held_by(appointment_id))
            .collect())
    }

    /// Generates slots for `config` and replaces whatever the date held.
    ///
    /// Existing reservations on that date are dropped; callers regenerate only
    /// dates they know to be free.
    #[instrument(skip(self, config), fields(provider_id = %config.provider_id, date = %config.date))]
    pub async fn generate_slots(&self, config: &SlotGenerationConfig) -> Result<Vec<Slot>, SchedulingError> {
        let slots = build_slots(config)?;
        self.replace_slots_for_date(&config.provider_id, config.date, &slots).await?;

        info!(
            "Generated {} slots for provider {} on {}",
            slots.len(),
            config.provider_id,
            config.date
        );
        Ok(slots)
    }

    /// Generates slots from the provider's stored working hours for that weekday,
    /// falling back to 09:00-17:00.
    pub async fn generate_from_working_hours(
        &self,
        provider_id: &str,
        service_id: &str,
        date: NaiveDate,
        slot_duration_minutes: u32,
        buffer_minutes: u32,
    ) -> Result<Vec<Slot>, SchedulingError> {
        let hours = self.working_hours(provider_id, date).await?;
        let start_time = parse_hhmm(&hours.start)
            .ok_or_else(|| SchedulingError::InvalidRequest(format!("Invalid working hours start '{}'", hours.start)))?;
        let end_time = parse_hhmm(&hours.end)
            .ok_or_else(|| SchedulingError::InvalidRequest(format!("Invalid working hours end '{}'", hours.end)))?;

        let config = SlotGenerationConfig::new(provider_id, service_id, date, start_time, end_time, slot_duration_minutes)
            .with_buffer(buffer_minutes);
        self.generate_slots(&config).await
    }

    pub async fn working_hours(&self, provider_id: &str, date: NaiveDate) -> Result<WorkingHours, SchedulingError> {
        let path = paths::working_hours(provider_id, weekday_key(date));
        match self.store.get(&path).await? {
            Some(value) => serde_json::from_value(value).map_err(|e| SchedulingError::corrupt(&path, e)),
            None => {
                debug!("No working hours at {}, using defaults", path);
                Ok(WorkingHours::default())
            }
        }
    }

    /// Replaces the date node with `slots` in a single write.
    pub async fn replace_slots_for_date(
        &self,
        provider_id: &str,
        date: NaiveDate,
        slots: &[Slot],
    ) -> Result<(), SchedulingError> {
        let mut node = Map::new();
        for slot in slots {
            let doc = serde_json::to_value(slot).map_err(shared_database::StoreError::from)?;
            node.insert(slot.time.clone(), doc);
        }

        let path = paths::slots_for_date(provider_id, &format_date(date));
        self.store.set(&path, Value::Object(node)).await?;
        Ok(())
    }

    pub async fn clear_slots_for_date(&self, provider_id: &str, date: NaiveDate) -> Result<(), SchedulingError> {
        self.store
            .delete(&paths::slots_for_date(provider_id, &format_date(date)))
            .await?;
        Ok(())
    }

    /// Binds the slot at `key` to `appointment_id` in one atomic step.
    ///
    /// Already held by the same appointment counts as success. A missing slot is
    /// created reserved when `create_missing_slots` is on. Anything other than
    /// an unheld slot flagged available is a conflict.
    #[instrument(skip(self))]
    pub async fn reserve_slot(&self, key: &SlotKey, appointment_id: &str) -> Result<Slot, SchedulingError> {
        let path = paths::slot(key);
        let default_duration = self.config.default_slot_duration_minutes;
        let create_missing = self.config.create_missing_slots;
        let now = now_millis();

        let reserve = |current: Option<&Value>| -> TransactionResult {
            let mut slot = match current {
                Some(value) => Slot::from_document(key, value, default_duration),
                None if create_missing => Slot::available(key, "", default_duration),
                None => return TransactionResult::Abort,
            };
            if slot.is_reserved() && !slot.is_held_by(appointment_id) {
                return TransactionResult::Abort;
            }

            if !slot.is_held_by(appointment_id) {
                slot.reserved_at = Some(now);
            }
            slot.is_available = false;
            slot.appointment_id = Some(appointment_id.to_string());
            match (current, serde_json::to_value(&slot)) {
                (Some(Value::Object(existing)), Ok(Value::Object(fields))) => {
                    let mut doc = existing.clone();
                    doc.extend(fields);
                    TransactionResult::Commit(Value::Object(doc))
                }
                (_, Ok(doc)) => TransactionResult::Commit(doc),
                (_, Err(_)) => TransactionResult::Abort,
            }
        };

        match self.store.atomic_update(&path, &reserve).await? {
            AtomicOutcome::Committed(value) => {
                debug!("Reserved slot {} for appointment {}", key, appointment_id);
                Ok(Slot::from_document(key, &value, default_duration))
            }
            AtomicOutcome::Aborted(None) => Err(SchedulingError::SlotNotFound),
            AtomicOutcome::Aborted(Some(_)) => {
                info!("Slot {} is already taken", key);
                Err(SchedulingError::SlotUnavailable)
            }
        }
    }

    /// Marks the slot available regardless of holder. A missing slot is left missing.
    #[instrument(skip(self))]
    pub async fn release_slot(&self, key: &SlotKey) -> Result<(), SchedulingError> {
        self.release_where(key, |_| true).await.map(|_| ())
    }

    /// Releases the slot only while it is bound to `appointment_id` or reserved
    /// without a holder. Returns whether a release happened.
    #[instrument(skip(self))]
    pub async fn release_slot_held_by(&self, key: &SlotKey, appointment_id: &str) -> Result<bool, SchedulingError> {
        self.release_where(key, |slot| {
            slot.is_reserved() && (slot.appointment_id.is_none() || slot.is_held_by(appointment_id))
        })
        .await
    }

    async fn release_where<F>(&self, key: &SlotKey, should_release: F) -> Result<bool, SchedulingError>
    where
        F: Fn(&Slot) -> bool + Send + Sync,
    {
        let default_duration = self.config.default_slot_duration_minutes;

        let release = |current: Option<&Value>| -> TransactionResult {
            let Some(value) = current else {
                return TransactionResult::Abort;
            };
            let slot = Slot::from_document(key, value, default_duration);
            if !should_release(&slot) {
                return TransactionResult::Abort;
            }

            let mut doc = match value {
                Value::Object(existing) => existing.clone(),
                _ => match serde_json::to_value(&slot) {
                    Ok(Value::Object(fields)) => fields,
                    _ => return TransactionResult::Abort,
                },
            };
            doc.insert("isAvailable".to_string(), Value::Bool(true));
            doc.remove("appointmentId");
            doc.remove("reservedAt");
            TransactionResult::Commit(Value::Object(doc))
        };

        let released = self.store.atomic_update(&paths::slot(key), &release).await?.is_committed();
        if released {
            debug!("Released slot {}", key);
        }
        Ok(released)
    }

    fn slots_from_date_node(&self, provider_id: &str, date: NaiveDate, node: Option<&Value>) -> Vec<Slot> {
        let Some(Value::Object(times)) = node else {
            return Vec::new();
        };

        let mut slots: Vec<Slot> = times
            .iter()
            .filter_map(|(time, value)| match parse_hhmm(time) {
                Some(time) => Some(Slot::from_document(
                    &SlotKey::new(provider_id, date, time),
                    value,
                    self.config.default_slot_duration_minutes,
                )),
                None => {
                    warn!("Skipping malformed slot time '{}' for provider {} on {}", time, provider_id, date);
                    None
                }
            })
            .collect();
        slots.sort_by(|a, b| a.time.cmp(&b.time));
        slots
    }
}

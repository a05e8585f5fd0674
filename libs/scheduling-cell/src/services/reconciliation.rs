// libs/scheduling-cell/src/services/reconciliation.rs
//
// Repairs drift between a provider's slots and the appointment log left behind
// by partially failed multi-step operations or by regenerating a booked date.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use shared_database::DocumentStore;
use shared_utils::time::now_millis;

use crate::models::{Appointment, SchedulingConfig, SchedulingError, SlotKey};
use crate::paths;
use crate::services::availability::AvailabilityService;
use crate::services::lifecycle::AppointmentLifecycleService;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconciliationReport {
    /// Slots freed because no live appointment claims them.
    pub released: Vec<SlotKey>,
    /// Slots re-bound to the confirmed appointment scheduled there.
    pub rebound: Vec<SlotKey>,
    /// Confirmed appointments whose slot is missing or held by someone else.
    pub unresolved: Vec<String>,
}

impl ReconciliationReport {
    pub fn is_clean(&self) -> bool {
        self.released.is_empty() && self.rebound.is_empty() && self.unresolved.is_empty()
    }
}

pub struct ReconciliationService {
    store: Arc<dyn DocumentStore>,
    availability: Arc<AvailabilityService>,
    lifecycle: AppointmentLifecycleService,
    reservation_grace_millis: i64,
}

impl ReconciliationService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        availability: Arc<AvailabilityService>,
        config: &SchedulingConfig,
    ) -> Self {
        Self {
            store,
            availability,
            lifecycle: AppointmentLifecycleService::new(),
            reservation_grace_millis: config.reservation_grace_millis,
        }
    }

    fn claims(&self, appointment: &Appointment, key: &SlotKey) -> bool {
        self.lifecycle.holds_slot(appointment.status) && appointment.slot_key().as_ref() == Some(key)
    }

    /// Re-reads the holder right before a release so a record written since
    /// the snapshot still keeps its slot.
    async fn holder_claims(&self, holder: &str, key: &SlotKey) -> Result<bool, SchedulingError> {
        let Some(record) = self.store.get(&paths::appointment(holder)).await? else {
            return Ok(false);
        };
        match serde_json::from_value::<Appointment>(record) {
            Ok(appointment) => Ok(self.claims(&appointment, key)),
            Err(e) => {
                warn!("Holder {} of slot {} is unreadable: {}", holder, key, e);
                Ok(false)
            }
        }
    }

    async fn provider_appointments(&self, provider_id: &str) -> Result<HashMap<String, Appointment>, SchedulingError> {
        let records = self
            .store
            .find_by_child(paths::APPOINTMENTS, "providerId", &Value::from(provider_id))
            .await?;

        let mut appointments = HashMap::with_capacity(records.len());
        for (id, record) in records {
            match serde_json::from_value::<Appointment>(record) {
                Ok(appointment) => {
                    appointments.insert(id, appointment);
                }
                Err(e) => warn!("Skipping unreadable appointment {}: {}", id, e),
            }
        }
        Ok(appointments)
    }

    /// Releases slots bound to deleted, cancelled or moved appointments, then
    /// re-binds confirmed appointments whose slot is free.
    ///
    /// A slot whose holder is missing or still confirmed elsewhere is skipped
    /// while its reservation is younger than the grace period: a booking or
    /// reschedule may be between reserving and writing its record.
    #[instrument(skip(self))]
    pub async fn reconcile_provider(&self, provider_id: &str) -> Result<ReconciliationReport, SchedulingError> {
        let now = now_millis();
        let appointments = self.provider_appointments(provider_id).await?;
        let slots = self.availability.list_provider_slots(provider_id).await?;
        let mut report = ReconciliationReport::default();

        for slot in slots.iter().filter(|s| s.is_reserved()) {
            let Some(key) = slot.key() else { continue };
            let Some(holder) = slot.appointment_id.as_deref() else {
                warn!("Slot {} is reserved without a holder", key);
                continue;
            };

            let record = appointments.get(holder);
            if record.is_some_and(|appointment| self.claims(appointment, &key)) {
                continue;
            }

            let may_be_in_flight = record.map_or(true, Appointment::is_confirmed);
            if may_be_in_flight && slot.reserved_within(now, self.reservation_grace_millis) {
                debug!("Slot {} was reserved for {} moments ago, leaving it", key, holder);
                continue;
            }
            if self.holder_claims(holder, &key).await? {
                continue;
            }
            if self.availability.release_slot_held_by(&key, holder).await? {
                report.released.push(key);
            }
        }

        let slots_by_key: HashMap<SlotKey, _> = slots
            .into_iter()
            .filter_map(|slot| slot.key().map(|key| (key, slot)))
            .collect();

        for appointment in appointments.values().filter(|a| a.is_confirmed()) {
            let Some(key) = appointment.slot_key() else {
                report.unresolved.push(appointment.id.clone());
                continue;
            };

            match slots_by_key.get(&key) {
                Some(slot) if slot.is_held_by(&appointment.id) => {}
                Some(slot) if slot.is_available || report.released.contains(&key) => {
                    match self.availability.reserve_slot(&key, &appointment.id).await {
                        Ok(_) => report.rebound.push(key),
                        Err(SchedulingError::SlotUnavailable) => report.unresolved.push(appointment.id.clone()),
                        Err(e) => return Err(e),
                    }
                }
                _ => {
                    warn!("Confirmed appointment {} has no usable slot at {}", appointment.id, key);
                    report.unresolved.push(appointment.id.clone());
                }
            }
        }

        report.unresolved.sort();
        if report.is_clean() {
            info!("Slots of provider {} are consistent", provider_id);
        } else {
            info!(
                "Reconciled provider {}: {} released, {} rebound, {} unresolved",
                provider_id,
                report.released.len(),
                report.rebound.len(),
                report.unresolved.len()
            );
        }
        Ok(report)
    }
}

// libs/scheduling-cell/src/services/booking.rs
use std::sync::Arc;

use futures::future::try_join_all;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::{AtomicOutcome, DocumentStore, FirebaseClient, StoreError, TransactionResult};
use shared_utils::time::{now_millis, parse_date, to_epoch_millis};

use crate::models::{
    Appointment, AppointmentQuery, AppointmentStatus, CancelledBy, CreateAppointmentRequest, IndexOwner,
    MonthlyAnalytics, SchedulingConfig, SchedulingError, Slot, SlotKey,
};
use crate::paths::{self, is_valid_key};
use crate::services::analytics::AnalyticsService;
use crate::services::availability::AvailabilityService;
use crate::services::indexes::IndexService;
use crate::services::lifecycle::AppointmentLifecycleService;
use crate::services::reconciliation::ReconciliationService;

/// Sequences slot reservation, the appointment record, reverse indexes and
/// analytics. Slot reservation always happens before the appointment write.
pub struct AppointmentBookingService {
    store: Arc<dyn DocumentStore>,
    availability: Arc<AvailabilityService>,
    indexes: IndexService,
    analytics: AnalyticsService,
    lifecycle: AppointmentLifecycleService,
    config: SchedulingConfig,
}

impl AppointmentBookingService {
    pub fn new(store: Arc<dyn DocumentStore>, config: SchedulingConfig) -> Self {
        Self {
            availability: Arc::new(AvailabilityService::new(Arc::clone(&store), config.clone())),
            indexes: IndexService::new(Arc::clone(&store)),
            analytics: AnalyticsService::new(Arc::clone(&store), config.clone()),
            lifecycle: AppointmentLifecycleService::new(),
            store,
            config,
        }
    }

    /// Service backed by the Realtime Database REST API.
    pub fn from_app_config(config: &AppConfig) -> Self {
        let store: Arc<dyn DocumentStore> = Arc::new(FirebaseClient::new(config));
        Self::new(store, SchedulingConfig::from_app_config(config))
    }

    pub fn availability(&self) -> &AvailabilityService {
        &self.availability
    }

    /// Drift repair over the same store and slot settings.
    pub fn reconciliation(&self) -> ReconciliationService {
        ReconciliationService::new(Arc::clone(&self.store), Arc::clone(&self.availability), &self.config)
    }

    pub fn indexes(&self) -> &IndexService {
        &self.indexes
    }

    pub fn analytics(&self) -> &AnalyticsService {
        &self.analytics
    }

    pub fn config(&self) -> &SchedulingConfig {
        &self.config
    }

    // ==========================================================================
    // CREATE
    // ==========================================================================

    /// Books the requested slot and records a CONFIRMED appointment.
    #[instrument(skip(self, request), fields(provider_id = %request.provider_id, user_id = %request.user_id))]
    pub async fn create_appointment(
        &self,
        request: CreateAppointmentRequest,
    ) -> Result<Appointment, SchedulingError> {
        debug!("Creating appointment at {} {}", request.date, request.time);

        let (slot_key, appointment_date) = self.validate_create_request(&request)?;
        let id = Uuid::new_v4().to_string();
        let now = now_millis();

        let appointment = Appointment {
            id: id.clone(),
            user_id: request.user_id,
            user_name: request.user_name,
            provider_id: request.provider_id,
            provider_name: request.provider_name,
            service_id: request.service_id,
            service_name: request.service_name,
            category: request.category,
            appointment_date,
            scheduled_date_time: slot_key.scheduled_date_time(),
            duration_minutes: request.duration_minutes,
            price: request.price,
            currency: request
                .currency
                .filter(|c| !c.trim().is_empty())
                .unwrap_or_else(|| self.config.default_currency.clone()),
            status: AppointmentStatus::Confirmed,
            notes: request.notes.unwrap_or_default(),
            created_at: now,
            updated_at: now,
            completed_at: None,
            cancelled_at: None,
            cancelled_by: None,
            cancelled_reason: None,
        };
        let document = serde_json::to_value(&appointment).map_err(StoreError::from)?;

        self.availability.reserve_slot(&slot_key, &id).await?;

        if let Err(e) = self.store.set(&paths::appointment(&id), document).await {
            warn!("Appointment write failed for {}, releasing slot {}: {}", id, slot_key, e);
            if let Err(release_err) = self.availability.release_slot_held_by(&slot_key, &id).await {
                warn!("Failed to release slot {} after aborted booking: {}", slot_key, release_err);
            }
            return Err(e.into());
        }

        if let Err(e) = self.indexes.record(&appointment).await {
            warn!("Failed to index appointment {}: {}", id, e);
        }

        info!("Appointment {} booked for slot {}", id, slot_key);
        Ok(appointment)
    }

    fn validate_create_request(&self, request: &CreateAppointmentRequest) -> Result<(SlotKey, i64), SchedulingError> {
        for (field, value) in [
            ("user_id", &request.user_id),
            ("provider_id", &request.provider_id),
            ("service_id", &request.service_id),
        ] {
            if !is_valid_key(value) {
                return Err(SchedulingError::InvalidRequest(format!("Invalid {} '{}'", field, value)));
            }
        }

        if request.duration_minutes == 0 {
            return Err(SchedulingError::InvalidRequest("Duration must be positive".to_string()));
        }
        if !request.price.is_finite() || request.price < 0.0 {
            return Err(SchedulingError::InvalidRequest(format!("Invalid price {}", request.price)));
        }

        let slot_key = SlotKey::parse(&request.provider_id, &request.date, &request.time)?;
        let appointment_date = self.scheduled_instant(&slot_key)?;
        Ok((slot_key, appointment_date))
    }

    fn scheduled_instant(&self, key: &SlotKey) -> Result<i64, SchedulingError> {
        to_epoch_millis(key.date, key.time, self.config.utc_offset).ok_or_else(|| {
            SchedulingError::InvalidRequest(format!("{} has no representable instant", key.scheduled_date_time()))
        })
    }

    // ==========================================================================
    // STATUS TRANSITIONS
    // ==========================================================================

    /// CONFIRMED -> CANCELLED, then gives the slot back.
    #[instrument(skip(self, reason))]
    pub async fn cancel_appointment(
        &self,
        appointment_id: &str,
        cancelled_by: CancelledBy,
        reason: Option<String>,
    ) -> Result<Appointment, SchedulingError> {
        let now = now_millis();
        let cancelled = self
            .transition(appointment_id, AppointmentStatus::Cancelled, move |appointment| {
                appointment.cancelled_at = Some(now);
                appointment.cancelled_by = Some(cancelled_by);
                appointment.cancelled_reason = reason.clone();
                appointment.updated_at = now;
            })
            .await?;

        self.release_bound_slot(&cancelled).await;
        info!("Appointment {} cancelled by {:?}", appointment_id, cancelled_by);
        Ok(cancelled)
    }

    /// CONFIRMED -> COMPLETED, then counts it into the user's monthly analytics.
    #[instrument(skip(self))]
    pub async fn complete_appointment(&self, appointment_id: &str) -> Result<Appointment, SchedulingError> {
        let now = now_millis();
        let completed = self
            .transition(appointment_id, AppointmentStatus::Completed, move |appointment| {
                appointment.completed_at = Some(now);
                appointment.updated_at = now;
            })
            .await?;

        if let Err(e) = self.analytics.record_completion(&completed).await {
            warn!("Failed to record analytics for appointment {}: {}", appointment_id, e);
        }

        info!("Appointment {} completed", appointment_id);
        Ok(completed)
    }

    #[instrument(skip(self))]
    pub async fn mark_no_show(&self, appointment_id: &str) -> Result<Appointment, SchedulingError> {
        let now = now_millis();
        let appointment = self
            .transition(appointment_id, AppointmentStatus::NoShow, move |appointment| {
                appointment.updated_at = now;
            })
            .await?;

        info!("Appointment {} marked as no-show", appointment_id);
        Ok(appointment)
    }

    async fn transition<M>(
        &self,
        appointment_id: &str,
        target: AppointmentStatus,
        mutate: M,
    ) -> Result<Appointment, SchedulingError>
    where
        M: Fn(&mut Appointment) + Send + Sync,
    {
        let lifecycle = self.lifecycle;
        self.apply_to_appointment(
            appointment_id,
            |appointment| lifecycle.validate_status_transition(appointment.status, target).is_ok(),
            |appointment| {
                appointment.status = target;
                mutate(appointment);
            },
        )
        .await
    }

    /// Single atomic read-modify-write of an appointment record. Unknown
    /// fields on the stored document are preserved.
    async fn apply_to_appointment<G, M>(
        &self,
        appointment_id: &str,
        guard: G,
        mutate: M,
    ) -> Result<Appointment, SchedulingError>
    where
        G: Fn(&Appointment) -> bool + Send + Sync,
        M: Fn(&mut Appointment) + Send + Sync,
    {
        let path = paths::appointment(appointment_id);

        let apply = |current: Option<&Value>| -> TransactionResult {
            let Some(Value::Object(existing)) = current else {
                return TransactionResult::Abort;
            };
            let Ok(mut appointment) = serde_json::from_value::<Appointment>(Value::Object(existing.clone())) else {
                return TransactionResult::Abort;
            };
            if !guard(&appointment) {
                return TransactionResult::Abort;
            }

            mutate(&mut appointment);
            match serde_json::to_value(&appointment) {
                Ok(Value::Object(fields)) => {
                    let mut document = existing.clone();
                    document.extend(fields);
                    TransactionResult::Commit(Value::Object(document))
                }
                _ => TransactionResult::Abort,
            }
        };

        match self.store.atomic_update(&path, &apply).await? {
            AtomicOutcome::Committed(value) => parse_appointment(&path, value),
            AtomicOutcome::Aborted(None) => Err(SchedulingError::NotFound),
            AtomicOutcome::Aborted(Some(value)) => {
                let current = parse_appointment(&path, value)?;
                Err(SchedulingError::InvalidState(current.status))
            }
        }
    }

    // ==========================================================================
    // RESCHEDULE
    // ==========================================================================

    /// Moves a CONFIRMED appointment to another slot of the same provider.
    ///
    /// The destination is reserved first; if the record update then fails the
    /// destination is released again and the original booking is untouched.
    #[instrument(skip(self))]
    pub async fn reschedule_appointment(
        &self,
        appointment_id: &str,
        new_date: &str,
        new_time: &str,
    ) -> Result<Appointment, SchedulingError> {
        let current = self.get_appointment(appointment_id).await?;
        if !current.is_confirmed() {
            return Err(SchedulingError::InvalidState(current.status));
        }

        let destination = SlotKey::parse(&current.provider_id, new_date, new_time)?;
        let origin = current.slot_key();
        if origin.as_ref() == Some(&destination) {
            return Err(SchedulingError::InvalidRequest(format!(
                "Appointment is already scheduled at {}",
                destination.scheduled_date_time()
            )));
        }
        let appointment_date = self.scheduled_instant(&destination)?;

        self.availability.reserve_slot(&destination, appointment_id).await?;

        let now = now_millis();
        let scheduled_date_time = destination.scheduled_date_time();
        let update = self
            .apply_to_appointment(
                appointment_id,
                |appointment| appointment.is_confirmed(),
                |appointment| {
                    appointment.appointment_date = appointment_date;
                    appointment.scheduled_date_time = scheduled_date_time.clone();
                    appointment.updated_at = now;
                },
            )
            .await;

        let rescheduled = match update {
            Ok(appointment) => appointment,
            Err(e) => {
                warn!("Reschedule of {} failed, releasing {}: {}", appointment_id, destination, e);
                if let Err(release_err) = self
                    .availability
                    .release_slot_held_by(&destination, appointment_id)
                    .await
                {
                    warn!("Failed to release slot {} after aborted reschedule: {}", destination, release_err);
                }
                return Err(e);
            }
        };

        if let Some(origin) = origin {
            if let Err(e) = self.availability.release_slot_held_by(&origin, appointment_id).await {
                warn!("Failed to release previous slot {}: {}", origin, e);
            }
        }
        self.release_stray_slots(&rescheduled, &destination).await;

        if let Err(e) = self.indexes.record(&rescheduled).await {
            warn!("Failed to re-index appointment {}: {}", appointment_id, e);
        }

        info!("Appointment {} rescheduled to {}", appointment_id, destination);
        Ok(rescheduled)
    }

    /// Releases slots other than `keep` still bound to this appointment.
    async fn release_stray_slots(&self, appointment: &Appointment, keep: &SlotKey) {
        let held = match self
            .availability
            .find_slots_held_by(&appointment.provider_id, &appointment.id)
            .await
        {
            Ok(held) => held,
            Err(e) => {
                warn!("Stray slot scan failed for appointment {}: {}", appointment.id, e);
                return;
            }
        };

        for key in held.iter().filter_map(Slot::key).filter(|key| key != keep) {
            debug!("Releasing stray slot {} of appointment {}", key, appointment.id);
            if let Err(e) = self.availability.release_slot_held_by(&key, &appointment.id).await {
                warn!("Failed to release stray slot {}: {}", key, e);
            }
        }
    }

    async fn release_bound_slot(&self, appointment: &Appointment) {
        let Some(key) = appointment.slot_key() else {
            warn!(
                "Appointment {} has unparseable scheduledDateTime '{}', slot not released",
                appointment.id, appointment.scheduled_date_time
            );
            return;
        };
        if let Err(e) = self.availability.release_slot_held_by(&key, &appointment.id).await {
            warn!("Failed to release slot {} of appointment {}: {}", key, appointment.id, e);
        }
    }

    // ==========================================================================
    // DELETE
    // ==========================================================================

    /// Removes the record and its index entries in one multi-path write, then
    /// frees the slot. Deleting a missing appointment succeeds.
    #[instrument(skip(self))]
    pub async fn delete_appointment(&self, appointment_id: &str) -> Result<(), SchedulingError> {
        let Some(appointment) = self.find_appointment(appointment_id).await? else {
            debug!("Appointment {} already gone", appointment_id);
            return Ok(());
        };

        let mut batch = IndexService::removal_fields(&appointment);
        batch.insert(paths::appointment(appointment_id), Value::Null);
        self.store.update("", batch).await?;

        self.release_bound_slot(&appointment).await;

        if appointment.status == AppointmentStatus::Completed {
            if let Err(e) = self.analytics.reverse_completion(&appointment).await {
                warn!("Failed to reverse analytics for appointment {}: {}", appointment_id, e);
            }
        }

        info!("Appointment {} deleted", appointment_id);
        Ok(())
    }

    // ==========================================================================
    // QUERIES
    // ==========================================================================

    pub async fn find_appointment(&self, appointment_id: &str) -> Result<Option<Appointment>, SchedulingError> {
        let path = paths::appointment(appointment_id);
        match self.store.get(&path).await? {
            Some(value) => parse_appointment(&path, value).map(Some),
            None => Ok(None),
        }
    }

    pub async fn get_appointment(&self, appointment_id: &str) -> Result<Appointment, SchedulingError> {
        self.find_appointment(appointment_id)
            .await?
            .ok_or(SchedulingError::NotFound)
    }

    pub async fn list_user_appointments(
        &self,
        user_id: &str,
        query: &AppointmentQuery,
    ) -> Result<Vec<Appointment>, SchedulingError> {
        self.list_appointments(&IndexOwner::User(user_id.to_string()), query)
            .await
    }

    pub async fn list_provider_appointments(
        &self,
        provider_id: &str,
        query: &AppointmentQuery,
    ) -> Result<Vec<Appointment>, SchedulingError> {
        self.list_appointments(&IndexOwner::Provider(provider_id.to_string()), query)
            .await
    }

    /// Reads the owner's index, fetches the records concurrently and returns
    /// matches newest first.
    async fn list_appointments(
        &self,
        owner: &IndexOwner,
        query: &AppointmentQuery,
    ) -> Result<Vec<Appointment>, SchedulingError> {
        let entries = self.indexes.list_entries(owner, query.from, query.to).await?;
        let fetched = try_join_all(entries.iter().map(|(id, _)| self.find_appointment(id))).await?;

        let mut appointments: Vec<Appointment> = entries
            .iter()
            .zip(fetched)
            .filter_map(|((id, _), appointment)| {
                if appointment.is_none() {
                    debug!("Index entry {} for {} has no appointment", id, owner.id());
                }
                appointment
            })
            .filter(|appointment| query.matches(appointment))
            .collect();

        appointments.sort_by(|a, b| b.appointment_date.cmp(&a.appointment_date));
        Ok(appointments)
    }

    /// Slots for a provider on a `yyyy-MM-dd` date.
    pub async fn list_slots(&self, provider_id: &str, date: &str) -> Result<Vec<Slot>, SchedulingError> {
        let date = parse_date(date)
            .ok_or_else(|| SchedulingError::InvalidRequest(format!("Invalid date '{}', expected yyyy-MM-dd", date)))?;
        self.availability.list_slots(provider_id, date).await
    }

    pub async fn get_monthly_analytics(&self, user_id: &str, month: &str) -> Result<MonthlyAnalytics, SchedulingError> {
        self.analytics.get_monthly_analytics(user_id, month).await
    }
}

fn parse_appointment(path: &str, value: Value) -> Result<Appointment, SchedulingError> {
    serde_json::from_value(value).map_err(|e| SchedulingError::corrupt(path, e))
}

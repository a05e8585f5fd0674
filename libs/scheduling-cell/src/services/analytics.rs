// libs/scheduling-cell/src/services/analytics.rs
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use shared_database::{AtomicOutcome, DocumentStore, StoreError, TransactionResult};
use shared_utils::time::{month_key, parse_month_key};

use crate::models::{Appointment, AppointmentStatus, MonthlyAnalytics, SchedulingConfig, SchedulingError};
use crate::paths;

/// Per-user monthly rollups of completed appointments.
pub struct AnalyticsService {
    store: Arc<dyn DocumentStore>,
    config: SchedulingConfig,
}

#[derive(Clone, Copy)]
enum Adjustment {
    Add,
    Subtract,
}

impl AnalyticsService {
    pub fn new(store: Arc<dyn DocumentStore>, config: SchedulingConfig) -> Self {
        Self { store, config }
    }

    /// `yyyy-MM` the completion is attributed to: `completedAt`, else the scheduled instant.
    pub fn completion_month(&self, appointment: &Appointment) -> Result<String, SchedulingError> {
        let millis = appointment.completed_at.unwrap_or(appointment.appointment_date);
        month_key(millis, self.config.utc_offset).ok_or_else(|| {
            SchedulingError::corrupt(
                &paths::appointment(&appointment.id),
                format!("timestamp {} out of range", millis),
            )
        })
    }

    /// Adds one completed appointment to its month. Atomic with respect to
    /// concurrent completions for the same user and month.
    #[instrument(skip(self, appointment), fields(appointment_id = %appointment.id))]
    pub async fn record_completion(&self, appointment: &Appointment) -> Result<MonthlyAnalytics, SchedulingError> {
        let month = self.completion_month(appointment)?;
        let updated = self.adjust(appointment, &month, Adjustment::Add).await?;
        updated.ok_or_else(|| SchedulingError::corrupt(&paths::monthly_analytics(&appointment.user_id, &month), "unreadable rollup"))
    }

    /// Removes a previously counted completion, clamping at zero. Returns `None`
    /// when the month had no rollup.
    #[instrument(skip(self, appointment), fields(appointment_id = %appointment.id))]
    pub async fn reverse_completion(&self, appointment: &Appointment) -> Result<Option<MonthlyAnalytics>, SchedulingError> {
        let month = self.completion_month(appointment)?;
        self.adjust(appointment, &month, Adjustment::Subtract).await
    }

    async fn adjust(
        &self,
        appointment: &Appointment,
        month: &str,
        adjustment: Adjustment,
    ) -> Result<Option<MonthlyAnalytics>, SchedulingError> {
        let path = paths::monthly_analytics(&appointment.user_id, month);

        let apply = |current: Option<&Value>| -> TransactionResult {
            let mut analytics = match current {
                Some(value) => match serde_json::from_value::<MonthlyAnalytics>(value.clone()) {
                    Ok(analytics) => analytics,
                    Err(_) => return TransactionResult::Abort,
                },
                None => match adjustment {
                    Adjustment::Add => MonthlyAnalytics::empty(month, &appointment.currency),
                    Adjustment::Subtract => return TransactionResult::Abort,
                },
            };

            match adjustment {
                Adjustment::Add => analytics.add(appointment.category, appointment.duration_minutes, appointment.price),
                Adjustment::Subtract => {
                    analytics.subtract(appointment.category, appointment.duration_minutes, appointment.price)
                }
            }

            match serde_json::to_value(&analytics) {
                Ok(doc) => TransactionResult::Commit(doc),
                Err(_) => TransactionResult::Abort,
            }
        };

        match self.store.atomic_update(&path, &apply).await? {
            AtomicOutcome::Committed(value) => {
                let analytics: MonthlyAnalytics =
                    serde_json::from_value(value).map_err(|e| SchedulingError::corrupt(&path, e))?;
                if analytics.currency != appointment.currency {
                    warn!(
                        "Appointment {} in {} counted into {} rollup {}",
                        appointment.id, appointment.currency, analytics.currency, path
                    );
                }
                debug!("Analytics {} now at {} appointments", path, analytics.total_appointments);
                Ok(Some(analytics))
            }
            AtomicOutcome::Aborted(None) => Ok(None),
            AtomicOutcome::Aborted(Some(_)) => Err(SchedulingError::corrupt(&path, "unreadable rollup")),
        }
    }

    /// Rollup for `user_id` and `yyyy-MM`. Months with no completions read as zero.
    pub async fn get_monthly_analytics(&self, user_id: &str, month: &str) -> Result<MonthlyAnalytics, SchedulingError> {
        Self::validate_month(month)?;
        let path = paths::monthly_analytics(user_id, month);

        match self.store.get(&path).await? {
            Some(value) => serde_json::from_value(value).map_err(|e| SchedulingError::corrupt(&path, e)),
            None => Ok(MonthlyAnalytics::empty(month, &self.config.default_currency)),
        }
    }

    /// Recomputes the month from the user's completed appointments and
    /// overwrites the stored rollup.
    #[instrument(skip(self))]
    pub async fn rebuild_month(&self, user_id: &str, month: &str) -> Result<MonthlyAnalytics, SchedulingError> {
        Self::validate_month(month)?;

        let records = self
            .store
            .find_by_child(paths::APPOINTMENTS, "userId", &Value::from(user_id))
            .await?;

        let mut currency: Option<String> = None;
        let mut analytics = MonthlyAnalytics::empty(month, &self.config.default_currency);
        for (id, record) in records {
            let appointment: Appointment = match serde_json::from_value(record) {
                Ok(appointment) => appointment,
                Err(e) => {
                    warn!("Skipping unreadable appointment {}: {}", id, e);
                    continue;
                }
            };
            if appointment.status != AppointmentStatus::Completed || self.completion_month(&appointment)? != month {
                continue;
            }
            currency.get_or_insert_with(|| appointment.currency.clone());
            analytics.add(appointment.category, appointment.duration_minutes, appointment.price);
        }
        if let Some(currency) = currency {
            analytics.currency = currency;
        }

        let path = paths::monthly_analytics(user_id, month);
        if analytics.is_empty() {
            self.store.delete(&path).await?;
        } else {
            let doc = serde_json::to_value(&analytics).map_err(StoreError::from)?;
            self.store.set(&path, doc).await?;
        }

        info!("Rebuilt {} with {} completed appointments", path, analytics.total_appointments);
        Ok(analytics)
    }

    fn validate_month(month: &str) -> Result<(), SchedulingError> {
        parse_month_key(month)
            .map(|_| ())
            .ok_or_else(|| SchedulingError::InvalidRequest(format!("Invalid month '{}', expected yyyy-MM", month)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;
    use shared_database::InMemoryStore;

    #[tokio::test]
    async fn missing_month_reads_as_zero() {
        let analytics = AnalyticsService::new(Arc::new(InMemoryStore::new()), SchedulingConfig::default());
        let month = analytics.get_monthly_analytics("u1", "2026-03").await.unwrap();
        assert_eq!(month.total_appointments, 0);
        assert_eq!(month.currency, "EUR");
        assert!(month.by_category.is_empty());
    }

    #[tokio::test]
    async fn rejects_malformed_month() {
        let analytics = AnalyticsService::new(Arc::new(InMemoryStore::new()), SchedulingConfig::default());
        assert_matches!(
            analytics.get_monthly_analytics("u1", "2026-3").await,
            Err(SchedulingError::InvalidRequest(_))
        );
    }

    #[tokio::test]
    async fn reversing_an_unknown_month_is_a_no_op() {
        let store = Arc::new(InMemoryStore::new());
        let analytics = AnalyticsService::new(Arc::clone(&store) as Arc<dyn DocumentStore>, SchedulingConfig::default());
        let appointment: Appointment = serde_json::from_value(json!({
            "id": "a1", "userId": "u1", "providerId": "p1", "serviceId": "s1",
            "appointmentDate": 1772442000000i64, "scheduledDateTime": "2026-03-02 09:00",
            "duration": 30, "price": 20.0, "currency": "EUR", "status": "completed",
            "createdAt": 0, "updatedAt": 0
        }))
        .unwrap();

        assert_eq!(analytics.reverse_completion(&appointment).await.unwrap(), None);
        assert_eq!(store.get("analytics").await.unwrap(), None);
    }
}

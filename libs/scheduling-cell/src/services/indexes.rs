// libs/scheduling-cell/src/services/indexes.rs
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};

use shared_database::DocumentStore;

use crate::models::{Appointment, IndexOwner, SchedulingError};
use crate::paths;

/// Maintains `indexes/appointments_by_user` and `indexes/appointments_by_provider`.
/// Each entry maps an appointment id to its scheduled instant in epoch millis.
pub struct IndexService {
    store: Arc<dyn DocumentStore>,
}

impl IndexService {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    fn owners(appointment: &Appointment) -> [IndexOwner; 2] {
        [
            IndexOwner::User(appointment.user_id.clone()),
            IndexOwner::Provider(appointment.provider_id.clone()),
        ]
    }

    /// Root-relative fields that write both index entries.
    pub fn entry_fields(appointment: &Appointment) -> Map<String, Value> {
        Self::owners(appointment)
            .iter()
            .map(|owner| {
                (
                    paths::index_entry(owner, &appointment.id),
                    Value::from(appointment.appointment_date),
                )
            })
            .collect()
    }

    /// Root-relative fields that delete both index entries.
    pub fn removal_fields(appointment: &Appointment) -> Map<String, Value> {
        Self::owners(appointment)
            .iter()
            .map(|owner| (paths::index_entry(owner, &appointment.id), Value::Null))
            .collect()
    }

    pub async fn record(&self, appointment: &Appointment) -> Result<(), SchedulingError> {
        self.store.update("", Self::entry_fields(appointment)).await?;
        debug!("Indexed appointment {}", appointment.id);
        Ok(())
    }

    /// Entries for `owner` within the inclusive range, ascending by instant.
    pub async fn list_entries(
        &self,
        owner: &IndexOwner,
        from: Option<i64>,
        to: Option<i64>,
    ) -> Result<Vec<(String, i64)>, SchedulingError> {
        let node = self.store.get(&paths::index(owner)).await?;
        let Some(Value::Object(entries)) = node else {
            return Ok(Vec::new());
        };

        let mut entries: Vec<(String, i64)> = entries
            .into_iter()
            .filter_map(|(id, value)| match value.as_i64() {
                Some(millis) => Some((id, millis)),
                None => {
                    warn!("Ignoring non-numeric index entry {} for {}", id, owner.id());
                    None
                }
            })
            .filter(|(_, millis)| from.map_or(true, |f| *millis >= f) && to.map_or(true, |t| *millis <= t))
            .collect();
        entries.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        Ok(entries)
    }

    /// Recomputes the owner's index from the appointment records.
    #[instrument(skip(self))]
    pub async fn rebuild(&self, owner: &IndexOwner) -> Result<usize, SchedulingError> {
        let records = self
            .store
            .find_by_child(paths::APPOINTMENTS, owner.appointment_field(), &Value::from(owner.id()))
            .await?;

        let mut entries = Map::new();
        for (id, record) in records {
            match record.get("appointmentDate").and_then(Value::as_i64) {
                Some(millis) => {
                    entries.insert(id, Value::from(millis));
                }
                None => warn!("Appointment {} has no appointmentDate, not indexed", id),
            }
        }

        let count = entries.len();
        self.store.set(&paths::index(owner), Value::Object(entries)).await?;
        info!("Rebuilt index for {} with {} entries", owner.id(), count);
        Ok(count)
    }
}

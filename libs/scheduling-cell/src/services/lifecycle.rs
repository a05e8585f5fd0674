// libs/scheduling-cell/src/services/lifecycle.rs
use tracing::{debug, warn};

use crate::models::{AppointmentStatus, SchedulingError};

#[derive(Debug, Clone, Copy, Default)]
pub struct AppointmentLifecycleService;

impl AppointmentLifecycleService {
    pub fn new() -> Self {
        Self
    }

    /// Validate that a status transition is allowed
    pub fn validate_status_transition(
        &self,
        current_status: AppointmentStatus,
        new_status: AppointmentStatus,
    ) -> Result<(), SchedulingError> {
        debug!("Validating status transition from {} to {}", current_status, new_status);

        if !self.can_transition(current_status, new_status) {
            warn!("Invalid status transition attempted: {} -> {}", current_status, new_status);
            return Err(SchedulingError::InvalidState(current_status));
        }

        Ok(())
    }

    pub fn can_transition(&self, current_status: AppointmentStatus, new_status: AppointmentStatus) -> bool {
        self.get_valid_transitions(current_status).contains(&new_status)
    }

    /// Get all valid next statuses for a given current status
    pub fn get_valid_transitions(&self, current_status: AppointmentStatus) -> Vec<AppointmentStatus> {
        match current_status {
            AppointmentStatus::Confirmed => vec![
                AppointmentStatus::Cancelled,
                AppointmentStatus::Completed,
                AppointmentStatus::NoShow,
            ],
            // Terminal states
            AppointmentStatus::Cancelled => vec![],
            AppointmentStatus::Completed => vec![],
            AppointmentStatus::NoShow => vec![],
        }
    }

    /// Whether the appointment still owns its slot. Cancelled appointments give it back.
    pub fn holds_slot(&self, status: AppointmentStatus) -> bool {
        status != AppointmentStatus::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn confirmed_can_reach_every_terminal_state() {
        let lifecycle = AppointmentLifecycleService::new();
        for target in [
            AppointmentStatus::Cancelled,
            AppointmentStatus::Completed,
            AppointmentStatus::NoShow,
        ] {
            assert!(lifecycle.validate_status_transition(AppointmentStatus::Confirmed, target).is_ok());
        }
    }

    #[test]
    fn terminal_states_are_final() {
        let lifecycle = AppointmentLifecycleService::new();
        let result =
            lifecycle.validate_status_transition(AppointmentStatus::Cancelled, AppointmentStatus::Completed);
        assert_matches!(result, Err(SchedulingError::InvalidState(AppointmentStatus::Cancelled)));
        assert!(lifecycle.get_valid_transitions(AppointmentStatus::NoShow).is_empty());
        assert!(!lifecycle.can_transition(AppointmentStatus::Completed, AppointmentStatus::Cancelled));
    }

    #[test]
    fn only_cancellation_frees_the_slot() {
        let lifecycle = AppointmentLifecycleService::new();
        assert!(lifecycle.holds_slot(AppointmentStatus::Completed));
        assert!(lifecycle.holds_slot(AppointmentStatus::NoShow));
        assert!(!lifecycle.holds_slot(AppointmentStatus::Cancelled));
    }
}

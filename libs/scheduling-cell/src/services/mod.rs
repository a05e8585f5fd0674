pub mod analytics;
pub mod availability;
pub mod booking;
pub mod indexes;
pub mod lifecycle;
pub mod reconciliation;
pub mod slot_generator;

pub use analytics::AnalyticsService;
pub use availability::AvailabilityService;
pub use booking::AppointmentBookingService;
pub use indexes::IndexService;
pub use lifecycle::AppointmentLifecycleService;
pub use reconciliation::{ReconciliationReport, ReconciliationService};
pub use slot_generator::{build_slots, generate_slot_times, SlotGenerationConfig, SlotTimes};

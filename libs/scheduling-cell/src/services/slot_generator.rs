// libs/scheduling-cell/src/services/slot_generator.rs
use chrono::{NaiveDate, NaiveTime, Timelike};

use crate::models::{SchedulingError, Slot, SlotKey, DEFAULT_BUFFER_MINUTES};
use crate::paths::is_valid_key;

/// Input for generating a provider's slots on one date.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotGenerationConfig {
    pub provider_id: String,
    pub service_id: String,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub slot_duration_minutes: u32,
    pub buffer_minutes: u32,
}

impl SlotGenerationConfig {
    pub fn new(
        provider_id: impl Into<String>,
        service_id: impl Into<String>,
        date: NaiveDate,
        start_time: NaiveTime,
        end_time: NaiveTime,
        slot_duration_minutes: u32,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            service_id: service_id.into(),
            date,
            start_time,
            end_time,
            slot_duration_minutes,
            buffer_minutes: DEFAULT_BUFFER_MINUTES,
        }
    }

    pub fn with_buffer(mut self, buffer_minutes: u32) -> Self {
        self.buffer_minutes = buffer_minutes;
        self
    }

    pub fn validate(&self) -> Result<(), SchedulingError> {
        if !is_valid_key(&self.provider_id) {
            return Err(SchedulingError::InvalidRequest(format!(
                "Invalid provider id '{}'",
                self.provider_id
            )));
        }
        if self.slot_duration_minutes == 0 {
            return Err(SchedulingError::InvalidRequest(
                "Slot duration must be positive".to_string(),
            ));
        }
        if self.start_time >= self.end_time {
            return Err(SchedulingError::InvalidRequest(format!(
                "Start time {} must be before end time {}",
                self.start_time.format("%H:%M"),
                self.end_time.format("%H:%M")
            )));
        }
        Ok(())
    }

    /// Lazy start times for this window. Cloning restarts the sequence.
    pub fn times(&self) -> SlotTimes {
        SlotTimes {
            next: minute_of_day(self.start_time),
            end: minute_of_day(self.end_time),
            duration: self.slot_duration_minutes,
            step: self.slot_duration_minutes.saturating_add(self.buffer_minutes),
        }
    }

    pub fn slot_key(&self, time: NaiveTime) -> SlotKey {
        SlotKey::new(self.provider_id.clone(), self.date, time)
    }
}

/// Start times `start, start + (duration + buffer), ...` while the slot still
/// ends at or before the window end.
#[derive(Debug, Clone)]
pub struct SlotTimes {
    next: u32,
    end: u32,
    duration: u32,
    step: u32,
}

impl Iterator for SlotTimes {
    type Item = NaiveTime;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted() {
            return None;
        }
        let current = self.next;
        self.next = self.next.saturating_add(self.step);
        NaiveTime::from_num_seconds_from_midnight_opt(current * 60, 0)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.exhausted() {
            return (0, Some(0));
        }
        let remaining = ((self.end - self.duration - self.next) / self.step + 1) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for SlotTimes {}

impl SlotTimes {
    fn exhausted(&self) -> bool {
        self.duration == 0 || self.next.saturating_add(self.duration) > self.end
    }
}

fn minute_of_day(time: NaiveTime) -> u32 {
    time.num_seconds_from_midnight() / 60
}

/// Validates `config` and returns the slot times it describes.
pub fn generate_slot_times(config: &SlotGenerationConfig) -> Result<SlotTimes, SchedulingError> {
    config.validate()?;
    Ok(config.times())
}

/// Materializes available slots for `config`.
pub fn build_slots(config: &SlotGenerationConfig) -> Result<Vec<Slot>, SchedulingError> {
    Ok(generate_slot_times(config)?
        .map(|time| Slot::available(&config.slot_key(time), &config.service_id, config.slot_duration_minutes))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use shared_utils::time::{format_hhmm, parse_date, parse_hhmm};

    fn config(start: &str, end: &str, duration: u32, buffer: u32) -> SlotGenerationConfig {
        SlotGenerationConfig::new(
            "p1",
            "s1",
            parse_date("2026-03-02").unwrap(),
            parse_hhmm(start).unwrap(),
            parse_hhmm(end).unwrap(),
            duration,
        )
        .with_buffer(buffer)
    }

    fn labels(times: SlotTimes) -> Vec<String> {
        times.map(format_hhmm).collect()
    }

    #[test]
    fn steps_by_duration_plus_buffer() {
        let times = generate_slot_times(&config("09:00", "11:00", 30, 15)).unwrap();
        assert_eq!(labels(times), vec!["09:00", "09:45", "10:30"]);
    }

    #[test]
    fn full_working_day_yields_twelve_slots() {
        let times = generate_slot_times(&config("09:00", "18:00", 30, 15)).unwrap();
        assert_eq!(times.len(), 12);
        let labels = labels(times);
        assert_eq!(labels.first().map(String::as_str), Some("09:00"));
        assert_eq!(labels.last().map(String::as_str), Some("17:15"));
    }

    #[test]
    fn last_slot_may_end_exactly_at_window_end() {
        let times = generate_slot_times(&config("09:00", "10:00", 30, 0)).unwrap();
        assert_eq!(labels(times), vec!["09:00", "09:30"]);
    }

    #[test]
    fn window_shorter_than_duration_is_empty() {
        let times = generate_slot_times(&config("09:00", "09:20", 30, 15)).unwrap();
        assert_eq!(times.count(), 0);
    }

    #[test]
    fn default_buffer_is_fifteen_minutes() {
        let config = SlotGenerationConfig::new(
            "p1",
            "s1",
            parse_date("2026-03-02").unwrap(),
            parse_hhmm("09:00").unwrap(),
            parse_hhmm("10:00").unwrap(),
            30,
        );
        assert_eq!(config.buffer_minutes, 15);
    }

    #[test]
    fn cloned_sequence_restarts() {
        let mut times = config("09:00", "12:00", 60, 0).times();
        let restart = times.clone();
        times.next();
        assert_eq!(times.count(), 2);
        assert_eq!(restart.count(), 3);
    }

    #[test]
    fn rejects_invalid_windows() {
        assert_matches!(
            generate_slot_times(&config("10:00", "09:00", 30, 15)),
            Err(SchedulingError::InvalidRequest(_))
        );
        assert_matches!(
            generate_slot_times(&config("09:00", "09:00", 30, 15)),
            Err(SchedulingError::InvalidRequest(_))
        );
        assert_matches!(
            generate_slot_times(&config("09:00", "10:00", 0, 15)),
            Err(SchedulingError::InvalidRequest(_))
        );
    }

    #[test]
    fn oversized_buffer_or_duration_does_not_overflow() {
        let times = generate_slot_times(&config("09:00", "18:00", 30, u32::MAX)).unwrap();
        assert_eq!(times.len(), 1);
        assert_eq!(labels(times), vec!["09:00"]);

        let times = generate_slot_times(&config("09:00", "18:00", u32::MAX, 0)).unwrap();
        assert_eq!(times.len(), 0);
        assert_eq!(times.count(), 0);
    }

    #[test]
    fn built_slots_are_available_and_carry_service() {
        let slots = build_slots(&config("09:00", "10:00", 30, 0)).unwrap();
        assert_eq!(slots.len(), 2);
        assert!(slots.iter().all(|s| s.is_available && s.appointment_id.is_none()));
        assert!(slots.iter().all(|s| s.service_id == "s1" && s.date == "2026-03-02"));
    }
}

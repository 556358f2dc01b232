use serde::{Deserialize, Serialize};

use crate::error::{BillError, Result};

pub const DEFAULT_CALENDAR_VISIBLE_EVENTS: u32 = 3;
pub const MAX_CALENDAR_VISIBLE_EVENTS: u32 = 10;

/// Engine settings, stored as the single `config` row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Events drawn per calendar day cell before the "+N more" overflow.
    pub calendar_visible_events: u32,
    pub week_starts_on_monday: bool,
    /// Master switch for autopay passes.
    pub autopay_enabled: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            calendar_visible_events: DEFAULT_CALENDAR_VISIBLE_EVENTS,
            week_starts_on_monday: false,
            autopay_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigPayload {
    pub calendar_visible_events: Option<u32>,
    pub week_starts_on_monday: Option<bool>,
    pub autopay_enabled: Option<bool>,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_CALENDAR_VISIBLE_EVENTS).contains(&self.calendar_visible_events) {
            return Err(BillError::Config(format!(
                "calendar_visible_events must be between 1 and {}",
                MAX_CALENDAR_VISIBLE_EVENTS
            )));
        }
        Ok(())
    }

    /// Applies the fields present in `payload` and validates the result.
    pub fn merged(&self, payload: ConfigPayload) -> Result<Self> {
        let merged = Self {
            calendar_visible_events: payload
                .calendar_visible_events
                .unwrap_or(self.calendar_visible_events),
            week_starts_on_monday: payload
                .week_starts_on_monday
                .unwrap_or(self.week_starts_on_monday),
            autopay_enabled: payload.autopay_enabled.unwrap_or(self.autopay_enabled),
        };
        merged.validate()?;
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn merge_keeps_missing_fields() {
        let base = EngineConfig::default();
        let merged = base
            .merged(ConfigPayload {
                week_starts_on_monday: Some(true),
                ..Default::default()
            })
            .expect("valid");
        assert!(merged.week_starts_on_monday);
        assert_eq!(merged.calendar_visible_events, 3);
        assert!(merged.autopay_enabled);
    }

    #[test]
    fn visible_events_bounds() {
        let base = EngineConfig::default();
        for bad in [0, 11] {
            let result = base.merged(ConfigPayload {
                calendar_visible_events: Some(bad),
                ..Default::default()
            });
            assert!(matches!(result, Err(BillError::Config(_))));
        }
    }
}

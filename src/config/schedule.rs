// src/config/schedule.rs
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::queue::repeat::normalize_cron;
use crate::window::ActiveWindow;

/// A recurring collection schedule: when jobs fire and from what time of day
/// they run the full pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleSpec {
    /// Normalized (seconds-first) cron expression; doubles as the repeat key.
    pub cron: String,
    pub window: ActiveWindow,
}

impl ScheduleSpec {
    pub fn new(cron: &str, window: ActiveWindow) -> Result<Self> {
        Ok(Self {
            cron: normalize_cron(cron)?,
            window,
        })
    }
}

/// On-disk form: `{ cron = "15 0-22 * * *", window_start = "07:15", window_end = "22:15" }`.
///
/// The cron expression should also fire before `window_start`: those
/// occurrences are what reset the collection each morning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub cron: String,
    #[serde(default = "default_window_start")]
    pub window_start: String,
    #[serde(default = "default_window_end")]
    pub window_end: String,
}

fn default_window_start() -> String {
    "07:15".to_string()
}
fn default_window_end() -> String {
    "22:15".to_string()
}

impl Default for ScheduleEntry {
    fn default() -> Self {
        Self {
            cron: "15 0-22 * * *".to_string(),
            window_start: default_window_start(),
            window_end: default_window_end(),
        }
    }
}

impl TryFrom<&ScheduleEntry> for ScheduleSpec {
    type Error = anyhow::Error;

    fn try_from(e: &ScheduleEntry) -> Result<Self> {
        let window = ActiveWindow::from_hhmm(&e.window_start, &e.window_end)
            .with_context(|| format!("schedule '{}': bad active window", e.cron))?;
        ScheduleSpec::new(&e.cron, window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_converts_to_normalized_spec() {
        let spec = ScheduleSpec::try_from(&ScheduleEntry::default()).unwrap();
        assert_eq!(spec.cron, "0 15 0-22 * * *");
        assert_eq!(spec.window.start_minute_of_day, 7 * 60 + 15);
        assert_eq!(spec.window.end_minute_of_day, 22 * 60 + 15);
    }

    #[test]
    fn default_schedule_fires_before_and_inside_the_window() {
        use crate::queue::repeat::next_occurrence;
        use crate::window::{decide, GateDecision};
        use chrono::{Local, Utc};

        let spec = ScheduleSpec::try_from(&ScheduleEntry::default()).unwrap();
        let mut t = Utc::now();
        let (mut resets, mut runs) = (0, 0);
        // A bit over one day of hourly firings.
        for _ in 0..30 {
            t = next_occurrence(&spec.cron, t).unwrap();
            match decide(&t.with_timezone(&Local), &spec.window) {
                GateDecision::ResetAndSkip => resets += 1,
                GateDecision::Run => runs += 1,
            }
        }
        assert!(resets > 0, "no occurrence before window start");
        assert!(runs > 0, "no occurrence inside the window");
    }

    #[test]
    fn schedule_without_upcoming_firing_is_rejected() {
        let e = ScheduleEntry {
            cron: "0 0 0 30 2 *".into(),
            ..Default::default()
        };
        let err = ScheduleSpec::try_from(&e).unwrap_err();
        assert!(format!("{err:#}").contains("no upcoming occurrence"));
    }

    #[test]
    fn bad_window_mentions_schedule() {
        let e = ScheduleEntry {
            window_start: "23:00".into(),
            window_end: "01:00".into(),
            ..Default::default()
        };
        let err = ScheduleSpec::try_from(&e).unwrap_err();
        assert!(format!("{err:#}").contains("15 0-22 * * *"));
    }
}

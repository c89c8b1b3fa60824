// src/window.rs
//! Active-window gate: decides whether a delivered job runs the pipeline or
//! only resets the collection.
//!
//! The gate is a pure function of `(now, window)`. Resetting the store is the
//! caller's job.

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, TimeZone, Timelike};
use serde::{Deserialize, Serialize};

pub const MINUTES_PER_DAY: u16 = 24 * 60;

/// Time-of-day range (minutes since local midnight) in which runs execute fully.
/// Deserialization goes through [`ActiveWindow::new`], so a decoded window is
/// always in range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawWindow")]
pub struct ActiveWindow {
    pub start_minute_of_day: u16,
    pub end_minute_of_day: u16,
}

#[derive(Deserialize)]
struct RawWindow {
    start_minute_of_day: u16,
    end_minute_of_day: u16,
}

impl TryFrom<RawWindow> for ActiveWindow {
    type Error = anyhow::Error;

    fn try_from(raw: RawWindow) -> Result<Self> {
        Self::new(raw.start_minute_of_day, raw.end_minute_of_day)
    }
}

impl ActiveWindow {
    /// Whole day; used for ad-hoc jobs that carry no window.
    pub const FULL_DAY: ActiveWindow = ActiveWindow {
        start_minute_of_day: 0,
        end_minute_of_day: MINUTES_PER_DAY,
    };

    pub fn new(start_minute_of_day: u16, end_minute_of_day: u16) -> Result<Self> {
        if start_minute_of_day >= MINUTES_PER_DAY {
            bail!("window start {start_minute_of_day} is not a minute of the day");
        }
        if end_minute_of_day > MINUTES_PER_DAY {
            bail!("window end {end_minute_of_day} is past midnight");
        }
        if start_minute_of_day > end_minute_of_day {
            bail!("window start {start_minute_of_day} is after end {end_minute_of_day}");
        }
        Ok(Self {
            start_minute_of_day,
            end_minute_of_day,
        })
    }

    /// Build from two `HH:MM` strings, e.g. `("07:15", "22:15")`.
    pub fn from_hhmm(start: &str, end: &str) -> Result<Self> {
        Self::new(parse_hhmm(start)?, parse_hhmm(end)?)
    }
}

impl std::fmt::Display for ActiveWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (s, e) = (self.start_minute_of_day, self.end_minute_of_day);
        write!(f, "{:02}:{:02}-{:02}:{:02}", s / 60, s % 60, e / 60, e % 60)
    }
}

/// Parse `HH:MM` into minutes since midnight. `24:00` is accepted as end-of-day.
pub fn parse_hhmm(s: &str) -> Result<u16> {
    let (h, m) = s
        .trim()
        .split_once(':')
        .ok_or_else(|| anyhow!("expected HH:MM, got '{s}'"))?;
    let h: u16 = h.parse().map_err(|_| anyhow!("bad hour in '{s}'"))?;
    let m: u16 = m.parse().map_err(|_| anyhow!("bad minute in '{s}'"))?;
    if m >= 60 || h > 24 || (h == 24 && m != 0) {
        bail!("time out of range: '{s}'");
    }
    Ok(h * 60 + m)
}

/// Outcome of the gate for one delivered job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Run,
    /// Clear the collection and make no collaborator calls.
    ResetAndSkip,
}

pub fn minute_of_day<Tz: TimeZone>(now: &DateTime<Tz>) -> u16 {
    // hour() < 24 and minute() < 60, so the cast cannot truncate.
    (now.hour() * 60 + now.minute()) as u16
}

/// `ResetAndSkip` strictly before the window start, `Run` otherwise.
pub fn decide<Tz: TimeZone>(now: &DateTime<Tz>, window: &ActiveWindow) -> GateDecision {
    if minute_of_day(now) < window.start_minute_of_day {
        GateDecision::ResetAndSkip
    } else {
        GateDecision::Run
    }
}

// src/queue/repeat.rs
//! Cron helpers for repeatable queue entries.

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Local, Utc};
use cron::Schedule;
use sha2::{Digest, Sha256};
use std::str::FromStr;

/// Canonical repeat key for a cron expression.
///
/// Five-field expressions get a leading `0` seconds field; whitespace is
/// collapsed so `"15  7-22 * * *"` and `"0 15 7-22 * * *"` share one key.
/// Expressions that parse but never fire again are rejected.
pub fn normalize_cron(expression: &str) -> Result<String> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    let expr = match fields.len() {
        5 => format!("0 {}", fields.join(" ")),
        6 | 7 => fields.join(" "),
        n => {
            return Err(anyhow!(
                "invalid cron expression '{expression}': expected 5-7 fields, got {n}"
            ))
        }
    };
    let schedule = Schedule::from_str(&expr)
        .map_err(|e| anyhow!("invalid cron expression '{expression}': {e}"))?;
    if schedule.upcoming(Utc).next().is_none() {
        bail!("cron expression '{expression}' has no upcoming occurrence");
    }
    Ok(expr)
}

/// Next firing strictly after `after`, evaluated in deployment-local time.
pub fn next_occurrence(key: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let schedule = Schedule::from_str(key)
        .map_err(|e| anyhow!("invalid cron expression '{key}': {e}"))?;
    schedule
        .after(&after.with_timezone(&Local))
        .next()
        .map(|t| t.with_timezone(&Utc))
        .with_context(|| format!("cron expression '{key}' has no upcoming occurrence"))
}

/// Short stable fingerprint of a repeat key, used in job ids.
pub(crate) fn key_fingerprint(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    let mut out = String::with_capacity(12);
    for b in digest.iter().take(6) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

// Beta time-window check
//
// Time-limited builds carry an expiry date; running past it is a fatal
// startup condition. Release builds ship with no expiry.

use chrono::{DateTime, Utc};

use crate::error::{Result, WardenError};

/// RFC3339 expiry for time-limited builds, None for release builds.
pub const BETA_EXPIRY: Option<&str> = None;

pub fn check_expiry() -> Result<()> {
    check_expiry_at(BETA_EXPIRY, Utc::now())
}

fn check_expiry_at(expiry: Option<&str>, now: DateTime<Utc>) -> Result<()> {
    let Some(expiry) = expiry else {
        return Ok(());
    };

    let expiry = DateTime::parse_from_rfc3339(expiry)
        .map_err(|e| WardenError::Other(format!("bad expiry date in build: {}", e)))?
        .with_timezone(&Utc);

    if now >= expiry {
        return Err(WardenError::LicenseExpired(format!(
            "this beta expired on {}",
            expiry.format("%Y-%m-%d")
        )));
    }

    Ok(())
}

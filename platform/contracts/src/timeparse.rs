//! Parsing for provider-reported timestamps.
//!
//! The payment provider reports `settlement_time` as a naive
//! `YYYY-MM-DD HH:MM:SS` string in its own wall-clock zone (UTC+7). The
//! reconciler compares it against our UTC row timestamps, so it is converted
//! here and nowhere else.

use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};

use crate::{AppError, AppResult};

const PROVIDER_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const PROVIDER_UTC_OFFSET_SECS: i32 = 7 * 3600;

/// Parse a provider timestamp into UTC.
pub fn parse_provider_time(raw: &str) -> AppResult<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(raw.trim(), PROVIDER_TIME_FORMAT)
        .map_err(|_| AppError::invalid_argument(format!("unparseable provider time: {raw:?}")))?;

    let offset = FixedOffset::east_opt(PROVIDER_UTC_OFFSET_SECS)
        .expect("static offset is in range");

    match naive.and_local_timezone(offset) {
        chrono::LocalResult::Single(dt) => Ok(dt.with_timezone(&Utc)),
        _ => Err(AppError::invalid_argument(format!(
            "ambiguous provider time: {raw:?}"
        ))),
    }
}

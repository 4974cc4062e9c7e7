//! Time and identifier minting

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Current instant in UTC.
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Current instant as epoch milliseconds.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Mint a fresh v4 UUID.
pub fn new_id() -> Uuid {
    Uuid::new_v4()
}

/// Elapsed wall-clock between two instants, clamped to zero, in whole ms.
pub fn elapsed_ms(start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
    (end - start).num_milliseconds().max(0)
}

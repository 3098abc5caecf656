use time::{OffsetDateTime, format_description::well_known::Rfc3339};

pub mod health;
pub mod phase;
pub mod queue;
pub mod quiz;
pub mod sse;
pub mod user;
pub mod validation;

fn format_millis(millis: i64) -> String {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
        .ok()
        .and_then(|time| time.format(&Rfc3339).ok())
        .unwrap_or_else(|| "invalid-timestamp".into())
}

/// Current server time, formatted for clients.
pub fn server_time() -> String {
    format_millis(crate::state::now_millis())
}

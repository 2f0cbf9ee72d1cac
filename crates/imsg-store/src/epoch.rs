//! Apple-epoch time conversion and `attributedBody` plain-text recovery.

use chrono::{DateTime, Duration, TimeZone, Utc};

/// Seconds between the UNIX epoch (1970-01-01) and the Apple epoch (2001-01-01).
const APPLE_EPOCH_OFFSET_SECS: i64 = 978_307_200;

/// Convert a database `date` column (nanoseconds since the Apple epoch) to a
/// wall-clock UTC instant.
pub fn apple_time_to_utc(ns: i64) -> DateTime<Utc> {
    let base = Utc
        .timestamp_opt(APPLE_EPOCH_OFFSET_SECS, 0)
        .single()
        .expect("Apple epoch offset is a valid UNIX timestamp");
    base + Duration::nanoseconds(ns)
}

const BODY_START_SENTINEL: [u8; 2] = [0x01, 0x2B];
const BODY_END_SENTINEL: [u8; 2] = [0x86, 0x84];

/// Recover the plain-text span from a proprietary `attributedBody` archive
/// blob. Returns an empty string when no payload can be recovered.
pub fn decode_attributed_body(blob: &[u8]) -> String {
    let Some(start) = find_subslice(blob, &BODY_START_SENTINEL) else {
        return String::new();
    };
    let body_start = start + BODY_START_SENTINEL.len();
    let body_end = find_subslice(&blob[body_start..], &BODY_END_SENTINEL)
        .map(|offset| body_start + offset)
        .unwrap_or(blob.len());

    let text = String::from_utf8_lossy(&blob[body_start..body_end]);
    text.trim_start_matches(|c: char| (c as u32) < 32)
        .to_string()
}

fn find_subslice(haystack: &[u8], needle: &[u8; 2]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

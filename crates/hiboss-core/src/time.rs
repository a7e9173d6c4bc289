use chrono::Utc;

/// Current wall-clock time, milliseconds since the Unix epoch.
///
/// All persisted timestamps in Hi-Boss are `i64` milliseconds — never
/// RFC-3339 strings — and the pinned Open Question in §9.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// A wall-clock jump larger than this invalidates any cached "next fire"
/// computation and forces a recompute ( clock handling).
pub const CLOCK_JUMP_THRESHOLD_MS: i64 = 60_000;

//! Progress arithmetic and completion detection

use std::time::Duration;

use serde_json::Value;

/// Fraction at which the finish flag flips to 1
pub const FINISH_THRESHOLD: f64 = 0.999;

/// Completion values the server reports for a fully watched video
pub const COMPLETION_MARKERS: [&str; 2] = ["已完成", "completed"];

/// Floor for a sleep shortened to fit the session timeout
pub const MIN_KEEPALIVE_SECS: u64 = 30;

/// `elapsed / target` clamped to [0, 1]; `None` when the target is unknown or zero
pub fn progress_fraction(elapsed_secs: u64, target_secs: Option<u64>) -> Option<f64> {
    match target_secs {
        Some(target) if target > 0 => Some((elapsed_secs as f64 / target as f64).clamp(0.0, 1.0)),
        _ => None,
    }
}

/// Two-decimal string form sent in the `progress` field
pub fn format_fraction(fraction: f64) -> String {
    format!("{:.2}", fraction)
}

/// Value of the `finish` field
pub fn finish_flag(fraction: f64) -> u8 {
    if fraction >= FINISH_THRESHOLD { 1 } else { 0 }
}

/// Per-call uniqueness token: timestamp plus a random component
pub fn uniqueness_token(timestamp: i64) -> String {
    format!("{}_{}", timestamp, rand::random::<f64>())
}

/// Pause before the next iteration
///
/// When a session timeout is known and the interval exceeds it, the pause is
/// shortened to half the timeout, never below 30 seconds.
pub fn next_sleep(interval: Duration, session_timeout_secs: Option<u64>) -> Duration {
    match session_timeout_secs {
        Some(timeout) if interval > Duration::from_secs(timeout) => {
            Duration::from_secs(MIN_KEEPALIVE_SECS.max(timeout / 2))
        }
        _ => interval,
    }
}

/// Whole seconds elapsed, clamped to the run's duration
pub fn elapsed_seconds(elapsed: Duration, limit: Duration) -> u64 {
    elapsed.min(limit).as_secs()
}

/// Whether an unwrapped result reports the resource as completed
pub fn is_completion_signal(data: &Value) -> bool {
    data.get("completion")
        .and_then(Value::as_str)
        .is_some_and(|c| COMPLETION_MARKERS.iter().any(|m| c.trim().eq_ignore_ascii_case(m)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_fraction_unknown_target() {
        assert_eq!(progress_fraction(120, None), None);
        assert_eq!(progress_fraction(120, Some(0)), None);
    }

    #[test]
    fn test_fraction_values() {
        assert_eq!(progress_fraction(0, Some(600)), Some(0.0));
        assert_eq!(progress_fraction(300, Some(600)), Some(0.5));
        assert_eq!(progress_fraction(900, Some(600)), Some(1.0));
    }

    #[test]
    fn test_format_and_finish() {
        assert_eq!(format_fraction(0.5), "0.50");
        assert_eq!(format_fraction(1.0), "1.00");
        assert_eq!(finish_flag(0.998), 0);
        assert_eq!(finish_flag(0.999), 1);
        assert_eq!(finish_flag(1.0), 1);
    }

    #[test]
    fn test_uniqueness_token_shape() {
        let token = uniqueness_token(1_700_000_000_000);
        let (ts, random) = token.split_once('_').unwrap();
        assert_eq!(ts, "1700000000000");
        let r: f64 = random.parse().unwrap();
        assert!((0.0..1.0).contains(&r));
    }

    #[test]
    fn test_next_sleep() {
        let minute = Duration::from_secs(60);
        assert_eq!(next_sleep(minute, None), minute);
        assert_eq!(next_sleep(minute, Some(1440)), minute);
        assert_eq!(next_sleep(minute, Some(50)), Duration::from_secs(30));
        assert_eq!(next_sleep(Duration::from_secs(200), Some(120)), Duration::from_secs(60));
    }

    #[test]
    fn test_elapsed_clamped() {
        assert_eq!(elapsed_seconds(Duration::from_millis(61_500), Duration::from_secs(300)), 61);
        assert_eq!(elapsed_seconds(Duration::from_secs(400), Duration::from_secs(300)), 300);
    }

    #[test]
    fn test_completion_signal() {
        assert!(is_completion_signal(&json!({"status": "ok", "completion": "已完成"})));
        assert!(is_completion_signal(&json!({"completion": "Completed"})));
        assert!(!is_completion_signal(&json!({"completion": "未完成"})));
        assert!(!is_completion_signal(&json!({"status": "ok"})));
        assert!(!is_completion_signal(&json!([{"completion": "已完成"}])));
        assert!(!is_completion_signal(&Value::Null));
    }

    proptest! {
        #[test]
        fn prop_fraction_within_unit_interval(elapsed in any::<u64>(), target in any::<u64>()) {
            if let Some(f) = progress_fraction(elapsed, Some(target)) {
                prop_assert!((0.0..=1.0).contains(&f));
            }
        }

        #[test]
        fn prop_fraction_monotonic(a in 0u64..100_000, b in 0u64..100_000, target in 1u64..10_000) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            let f_lo = progress_fraction(lo, Some(target)).unwrap();
            let f_hi = progress_fraction(hi, Some(target)).unwrap();
            prop_assert!(f_lo <= f_hi);
        }
    }
}

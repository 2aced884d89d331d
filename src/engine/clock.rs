//! Elapsed-time display

use std::time::Duration;

/// Format a duration as `MM:SS`; minutes keep counting past the hour
pub fn format_clock(duration: Duration) -> String {
    let total = duration.as_secs();
    format!("{:02}:{:02}", total / 60, total % 60)
}

/// Convert a signed chrono duration to a non-negative std one
pub fn non_negative(duration: chrono::Duration) -> Duration {
    duration.to_std().unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_minutes_and_seconds() {
        assert_eq!(format_clock(Duration::from_secs(0)), "00:00");
        assert_eq!(format_clock(Duration::from_millis(15_900)), "00:15");
        assert_eq!(format_clock(Duration::from_secs(754)), "12:34");
        assert_eq!(format_clock(Duration::from_secs(3_725)), "62:05");
    }

    #[test]
    fn negative_spans_clamp_to_zero() {
        assert_eq!(non_negative(chrono::Duration::seconds(-3)), Duration::ZERO);
        assert_eq!(
            non_negative(chrono::Duration::milliseconds(1500)),
            Duration::from_millis(1500)
        );
    }
}

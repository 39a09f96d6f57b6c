//! Stream-time helpers. Unknown/unset instants are `None`; the
//! pseudo-variables `position` and `duration` map `None` to +∞ so that
//! comparisons against them behave.

use std::time::Duration;

/// Seconds to stream time. Negative or non-finite input means "unset".
pub fn secs_to_duration(secs: f64) -> Option<Duration> {
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    Some(Duration::from_secs_f64(secs))
}

pub fn duration_secs_f64(t: Option<Duration>) -> f64 {
    t.map(|d| d.as_secs_f64()).unwrap_or(f64::INFINITY)
}

/// `mm:ss.mmm` rendering, `none` when unset.
pub fn format_time(t: Option<Duration>) -> String {
    match t {
        Some(d) => {
            let total_ms = d.as_millis();
            let minutes = total_ms / 60_000;
            let seconds = (total_ms % 60_000) / 1000;
            let millis = total_ms % 1000;
            format!("{minutes}:{seconds:02}.{millis:03}")
        }
        None => "none".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_times_render_and_compare() {
        assert_eq!(format_time(None), "none");
        assert_eq!(duration_secs_f64(None), f64::INFINITY);
        assert_eq!(secs_to_duration(-1.0), None);
        assert_eq!(secs_to_duration(f64::NAN), None);
    }

    #[test]
    fn formatting_uses_minutes() {
        let t = secs_to_duration(65.25);
        assert_eq!(format_time(t), "1:05.250");
    }
}
